//! Kidney with glomerular filtration into the tubules

use serde::{Deserialize, Serialize};

use super::{derived, parameter, sampled, signal_scale, Model, Parametrized, Sequence, Spec};
use crate::error::DcmriError;
use crate::fit::{Parameter, Parameters};
use crate::pk::{conc_comp, flux_comp};
use crate::tools::{check_grid, check_len};

const FP: Spec = ("Fp", "Plasma flow", "mL/sec/cm3");
const VP: Spec = ("vp", "Plasma volume", "mL/cm3");
const FF: Spec = ("FF", "Filtration fraction", "");
const FT: Spec = ("Ft", "Tubular flow", "mL/sec/cm3");
const TT: Spec = ("Tt", "Tubular mean transit time", "sec");

const GFR: Spec = ("GFR", "Glomerular filtration rate", "mL/sec");
const RPF: Spec = ("RPF", "Renal plasma flow", "mL/sec");
const TP: Spec = ("Tp", "Plasma mean transit time", "sec");
const FT_DERIVED: Spec = ("Ft", "Tubular flow", "mL/sec/cm3");

/// Kinetic model of the kidney
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KidneyKinetics {
    /// Plasma compartment filtered into a tubular compartment
    #[default]
    #[serde(rename = "2CF")]
    TwoCF,
    /// High-flow plasma with tubular uptake
    HF,
}

/// Settings of a [`Kidney`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KidneyOptions {
    pub kinetics: KidneyKinetics,
    pub sequence: Sequence,
    pub hct: f64,
    /// Relaxivity in Hz/mM
    pub r1: f64,
    /// Precontrast R1 in Hz
    pub r10: f64,
    pub n0: usize,
    pub sample_duration: f64,
    /// Kidney volume in mL
    pub volume: f64,
}

impl Default for KidneyOptions {
    fn default() -> Self {
        Self {
            kinetics: KidneyKinetics::TwoCF,
            sequence: Sequence::default(),
            hct: 0.45,
            r1: 5.0,
            r10: 1.0 / 1.2,
            n0: 1,
            sample_duration: 0.0,
            volume: 150.0,
        }
    }
}

impl KidneyOptions {
    pub fn new(kinetics: KidneyKinetics) -> Self {
        Self {
            kinetics,
            ..Default::default()
        }
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_baseline(mut self, n0: usize) -> Self {
        self.n0 = n0;
        self
    }
}

/// Kidney signal for a known arterial input
#[derive(Debug, Clone)]
pub struct Kidney {
    options: KidneyOptions,
    time: Vec<f64>,
    cp: Vec<f64>,
    params: Parameters,
}

impl Kidney {
    /// Kidney fed by `aif`, the arterial blood concentration (mM) on `time`
    pub fn new(options: KidneyOptions, time: &[f64], aif: &[f64]) -> Result<Self, DcmriError> {
        check_grid(time)?;
        check_len(aif, time)?;
        options.sequence.validate()?;
        if !(0.0..1.0).contains(&options.hct) {
            return Err(DcmriError::InvalidState(format!(
                "hematocrit {} outside [0, 1)",
                options.hct
            )));
        }
        let unbounded = (0.0, f64::INFINITY);
        let mut params = Parameters::new().with(signal_scale());
        match options.kinetics {
            KidneyKinetics::TwoCF => {
                params.push(parameter(FP, 0.03, unbounded));
                params.push(parameter(VP, 0.15, (0.0, 1.0)));
                params.push(parameter(FF, 0.1, (0.0, 0.3)));
                params.push(parameter(TT, 120.0, (0.0, 600.0)));
            }
            KidneyKinetics::HF => {
                params.push(parameter(VP, 0.15, (0.0, 1.0)));
                params.push(parameter(FT, 0.005, unbounded));
                params.push(parameter(TT, 120.0, (0.0, 600.0)));
            }
        }
        let cp = aif.iter().map(|c| c / (1.0 - options.hct)).collect();
        Ok(Self {
            options,
            time: time.to_vec(),
            cp,
            params,
        })
    }

    pub fn options(&self) -> &KidneyOptions {
        &self.options
    }

    /// Plasma and tubular amounts per tissue volume
    fn amounts(&self, params: &Parameters) -> Result<(Vec<f64>, Vec<f64>), DcmriError> {
        let (t, cp) = (self.time.as_slice(), self.cp.as_slice());
        let tt = params.value("Tt")?;
        match self.options.kinetics {
            KidneyKinetics::TwoCF => {
                let (fp, vp, ff) = (params.value("Fp")?, params.value("vp")?, params.value("FF")?);
                if fp == 0.0 {
                    return Ok((vec![0.0; t.len()], vec![0.0; t.len()]));
                }
                let j: Vec<f64> = cp.iter().map(|c| fp * c).collect();
                let tp = vp / fp;
                let np = conc_comp(&j, tp, t)?;
                let filtered: Vec<f64> = flux_comp(&j, tp, t)?.iter().map(|x| ff * x).collect();
                Ok((np, conc_comp(&filtered, tt, t)?))
            }
            KidneyKinetics::HF => {
                let (vp, ft) = (params.value("vp")?, params.value("Ft")?);
                let np = cp.iter().map(|c| vp * c).collect();
                let j: Vec<f64> = cp.iter().map(|c| ft * c).collect();
                Ok((np, conc_comp(&j, tt, t)?))
            }
        }
    }

    /// Tissue concentration in mM on the input time grid
    pub fn conc(&self) -> Result<Vec<f64>, DcmriError> {
        let (np, nt) = self.amounts(&self.params)?;
        Ok(np.iter().zip(&nt).map(|(a, b)| a + b).collect())
    }
}

impl Parametrized for Kidney {
    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn derived(&self) -> Result<Vec<Parameter>, DcmriError> {
        let vol = self.options.volume;
        match self.options.kinetics {
            KidneyKinetics::TwoCF => {
                let (fp, vp, ff) = (
                    self.params.value("Fp")?,
                    self.params.value("vp")?,
                    self.params.value("FF")?,
                );
                Ok(vec![
                    derived(FT_DERIVED, ff * fp),
                    derived(TP, if fp == 0.0 { f64::INFINITY } else { vp / fp }),
                    derived(GFR, ff * fp * vol),
                    derived(RPF, fp * vol),
                ])
            }
            KidneyKinetics::HF => Ok(vec![derived(GFR, self.params.value("Ft")? * vol)]),
        }
    }
}

impl Model for Kidney {
    fn simulate(&self, params: &Parameters, time: &[f64]) -> Result<Vec<f64>, DcmriError> {
        let o = &self.options;
        let (np, nt) = self.amounts(params)?;
        let c: Vec<f64> = np.iter().zip(&nt).map(|(a, b)| a + b).collect();
        let c = sampled(time, &self.time, &c, o.sample_duration)?;
        let r1: Vec<f64> = c.iter().map(|x| o.r10 + o.r1 * x).collect();
        Ok(o.sequence.signals(params.value("S0")?, &r1))
    }

    fn baseline(&self) -> usize {
        self.options.n0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aif::aif_parker;
    use approx::assert_relative_eq;

    #[test]
    fn filtration_rates_scale_with_volume() {
        let t: Vec<f64> = (0..300).map(|i| i as f64).collect();
        let aif = aif_parker(&t, 20.0);
        let mut kidney = Kidney::new(KidneyOptions::default().with_volume(200.0), &t, &aif).unwrap();
        kidney.set_params(&[("Fp", 0.05), ("FF", 0.2)]).unwrap();
        let v = kidney.params(&["GFR", "RPF", "Ft"]).unwrap();
        assert_relative_eq!(v[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(v[1], 10.0, epsilon = 1e-12);
        assert_relative_eq!(v[2], 0.01, epsilon = 1e-12);
    }

    #[test]
    fn high_flow_limit_of_filtration_model() {
        let t: Vec<f64> = (0..300).map(|i| i as f64).collect();
        let aif = aif_parker(&t, 20.0);
        let mut cf = Kidney::new(KidneyOptions::default(), &t, &aif).unwrap();
        cf.set_params(&[("Fp", 1000.0), ("vp", 0.15), ("FF", 1e-5), ("Tt", 100.0)])
            .unwrap();
        let mut hf = Kidney::new(KidneyOptions::new(KidneyKinetics::HF), &t, &aif).unwrap();
        hf.set_params(&[("vp", 0.15), ("Ft", 0.01), ("Tt", 100.0)]).unwrap();
        let a = cf.conc().unwrap();
        let b = hf.conc().unwrap();
        let peak = b.iter().cloned().fold(0.0, f64::max);
        for i in (0..t.len()).step_by(10) {
            assert_relative_eq!(a[i], b[i], epsilon = 1e-2 * peak);
        }
    }

    #[test]
    fn tubules_retain_filtered_indicator() {
        let t: Vec<f64> = (0..300).map(|i| i as f64).collect();
        let aif = aif_parker(&t, 20.0);
        let mut kidney = Kidney::new(KidneyOptions::default(), &t, &aif).unwrap();
        kidney.set_params(&[("Tt", 1e6)]).unwrap();
        let (_, nt) = kidney.amounts(kidney.parameters()).unwrap();
        assert!(nt.windows(2).all(|w| w[1] >= w[0] - 1e-12));
    }
}
