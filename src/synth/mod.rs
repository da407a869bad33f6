//! Synthetic test data
//!
//! Generates tissue curves with known parameters from the Parker input
//! function, optionally with Gaussian noise at a given contrast-to-noise
//! ratio. Noise is drawn from a seeded generator so every call with the
//! same options returns the same data.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::aif::aif_parker;
use crate::error::DcmriError;
use crate::fit::ParamRow;
use crate::models::{Kinetics, Model, Parametrized, Sequence, Tissue, TissueOptions};
use crate::tools::uniform_grid;

/// Settings of [`fake_tissue`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FakeTissueOptions {
    /// Acquisition duration in sec
    pub tacq: f64,
    /// Sampling interval in sec
    pub dt: f64,
    /// Bolus arrival time in sec
    pub bat: f64,
    pub tissue: TissueOptions,
    /// Ground-truth parameter values, defaults for the others
    pub truth: Vec<(String, f64)>,
    pub s0: f64,
    /// Precontrast R1 of blood in Hz
    pub r10b: f64,
    /// Contrast-to-noise ratio, infinite for noise-free data
    pub cnr: f64,
    pub seed: u64,
}

impl Default for FakeTissueOptions {
    fn default() -> Self {
        Self {
            tacq: 180.0,
            dt: 1.5,
            bat: 20.0,
            tissue: TissueOptions::new(Kinetics::TwoCX).with_baseline(10),
            truth: vec![
                ("Fp".to_string(), 0.1),
                ("vp".to_string(), 0.05),
                ("PS".to_string(), 0.003),
                ("ve".to_string(), 0.2),
            ],
            s0: 1.0,
            r10b: 1.0 / 1.4,
            cnr: f64::INFINITY,
            seed: 0,
        }
    }
}

impl FakeTissueOptions {
    pub fn with_cnr(mut self, cnr: f64) -> Self {
        self.cnr = cnr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_tissue(mut self, tissue: TissueOptions, truth: &[(&str, f64)]) -> Self {
        self.tissue = tissue;
        self.truth = truth.iter().map(|(s, v)| (s.to_string(), *v)).collect();
        self
    }
}

/// Synthetic acquisition of a tissue and its arterial input
#[derive(Debug, Clone, PartialEq)]
pub struct FakeTissue {
    pub time: Vec<f64>,
    /// Arterial blood concentration in mM
    pub aif: Vec<f64>,
    /// Arterial blood signal
    pub aif_signal: Vec<f64>,
    /// Tissue signal
    pub roi: Vec<f64>,
    /// Parameters used to generate `roi`, derived ones included
    pub truth: Vec<ParamRow>,
}

/// Generate a tissue curve with known parameters
pub fn fake_tissue(options: &FakeTissueOptions) -> Result<FakeTissue, DcmriError> {
    let time = uniform_grid(0.0, options.tacq, options.dt)?;
    let aif = aif_parker(&time, options.bat);
    let mut tissue = Tissue::new(options.tissue.clone(), &time, &aif)?;
    tissue.set_params(&[("S0", options.s0)])?;
    for (symbol, value) in &options.truth {
        tissue.set_params(&[(symbol.as_str(), *value)])?;
    }
    let mut roi = tissue.predict(&time)?;
    let blood = tissue.options().sequence;
    let r1 = tissue.options().r1;
    let mut aif_signal: Vec<f64> = aif
        .iter()
        .map(|c| blood.signal(options.s0, options.r10b + r1 * c))
        .collect();

    if options.cnr.is_finite() {
        let mut rng = StdRng::seed_from_u64(options.seed);
        for signal in [&mut roi, &mut aif_signal] {
            let baseline = signal[0];
            let peak = signal.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let sdev = (peak - baseline).abs() / options.cnr;
            if sdev > 0.0 {
                let normal = Normal::new(0.0, sdev)
                    .map_err(|e| DcmriError::InvalidState(format!("noise level: {e}")))?;
                signal.iter_mut().for_each(|s| *s += normal.sample(&mut rng));
            }
        }
        tracing::debug!(cnr = options.cnr, seed = options.seed, "Noise added");
    }

    Ok(FakeTissue {
        time,
        aif,
        aif_signal,
        roi,
        truth: tissue.export_params()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn noise_free_curve_is_reproducible() {
        let options = FakeTissueOptions::default();
        let a = fake_tissue(&options).unwrap();
        let b = fake_tissue(&options).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.time.len(), a.roi.len());
        let baseline = options.tissue.sequence.signal(options.s0, options.tissue.r10);
        assert_relative_eq!(a.roi[0], baseline, max_relative = 1e-9);
        let fp = a.truth.iter().find(|r| r.parameter == "Fp").unwrap();
        assert_eq!(fp.value, 0.1);
    }

    #[test]
    fn noise_depends_on_seed() {
        let clean = fake_tissue(&FakeTissueOptions::default()).unwrap();
        let noisy = fake_tissue(&FakeTissueOptions::default().with_cnr(20.0)).unwrap();
        let other = fake_tissue(&FakeTissueOptions::default().with_cnr(20.0).with_seed(7)).unwrap();
        assert_ne!(noisy.roi, clean.roi);
        assert_ne!(noisy.roi, other.roi);
        let peak = clean.roi.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = peak - clean.roi[0];
        let rms = (noisy
            .roi
            .iter()
            .zip(&clean.roi)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            / clean.roi.len() as f64)
            .sqrt();
        assert!(rms > 0.02 * range && rms < 0.1 * range);
    }

    #[test]
    fn input_signal_uses_the_tissue_sequence() {
        let sequence = Sequence::SaturationRecovery { tc: 0.5, fa: 20.0 };
        let mut options = FakeTissueOptions::default();
        options.tissue = options.tissue.clone().with_sequence(sequence);
        let data = fake_tissue(&options).unwrap();
        let r1 = options.tissue.r1;
        for (s, c) in data.aif_signal.iter().zip(&data.aif) {
            let expected = sequence.signal(options.s0, options.r10b + r1 * c);
            assert_relative_eq!(*s, expected, max_relative = 1e-12);
        }
        let steady = Sequence::default().signal(options.s0, options.r10b);
        assert!((data.aif_signal[0] - steady).abs() > 1e-3);
    }

    #[test]
    fn unknown_truth_parameter_is_an_error() {
        let options = FakeTissueOptions::default()
            .with_tissue(TissueOptions::new(Kinetics::WV), &[("Fp", 0.1)]);
        assert!(fake_tissue(&options).is_err());
    }
}
