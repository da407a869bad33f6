//! Joint model of aorta and liver signals
//!
//! The aorta curve constrains the whole-body circulation, which in turn
//! provides the plasma input of the liver. Both curves share one set of
//! circulation parameters. With two scans the second bolus is injected into
//! the same circulation and the liver rates may change linearly between the
//! first and the last acquisition.

use serde::{Deserialize, Serialize};

use super::aorta::{circulation_derived, circulation_parameters, Circulation};
use super::liver::{hepatic_derived, hepatic_parameters, liver_relaxation, Hepatic};
use super::{
    calibrated_s0, fit_free, parameter, simulation_grid, Injection, LiverKinetics, Organs,
    Parametrized, Sequence, Spec,
};
use crate::error::DcmriError;
use crate::fit::{cost, FitError, FitResult, Metric, Parameter, Parameters, TrainOptions};
use crate::tools::sample;

const S0A: Spec = ("S0a", "Aorta signal scaling factor", "a.u.");
const S0L: Spec = ("S0l", "Liver signal scaling factor", "a.u.");
const S0A2: Spec = ("S0a2", "Aorta signal scaling factor, second scan", "a.u.");
const S0L2: Spec = ("S0l2", "Liver signal scaling factor, second scan", "a.u.");
const BAT2: Spec = ("BAT2", "Bolus arrival time, second scan", "sec");

// ============================================================================
// Data
// ============================================================================

/// Aorta and liver curves of one scan.
///
/// Times of all scans are on the same clock, so a second scan starts at
/// its delay after the first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub aorta_time: Vec<f64>,
    pub aorta: Vec<f64>,
    pub liver_time: Vec<f64>,
    pub liver: Vec<f64>,
}

impl Scan {
    pub fn new(
        aorta_time: Vec<f64>,
        aorta: Vec<f64>,
        liver_time: Vec<f64>,
        liver: Vec<f64>,
    ) -> Self {
        Self {
            aorta_time,
            aorta,
            liver_time,
            liver,
        }
    }

    /// Acquisition times without signals, for prediction
    pub fn times(aorta_time: Vec<f64>, liver_time: Vec<f64>) -> Self {
        Self {
            aorta_time,
            liver_time,
            ..Default::default()
        }
    }

    fn check(&self) -> Result<(), FitError> {
        for (t, s) in [(&self.aorta_time, &self.aorta), (&self.liver_time, &self.liver)] {
            if t.len() != s.len() {
                return Err(FitError::DimensionMismatch {
                    expected: t.len(),
                    found: s.len(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings of an [`AortaLiver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AortaLiverOptions {
    pub organs: Organs,
    pub kinetics: LiverKinetics,
    /// First injection
    pub injection: Injection,
    /// Volume of the second injection in mL/kg
    pub dose2: f64,
    /// Approximate start of the second scan, used to initialise `BAT2`
    pub second_scan_start: f64,
    pub aorta_sequence: Sequence,
    pub liver_sequence: Sequence,
    pub hct: f64,
    /// Relaxivity in blood and extracellular space in Hz/mM
    pub r1: f64,
    /// Hepatocellular relaxivity in Hz/mM
    pub r1h: f64,
    /// Precontrast R1 of blood in Hz
    pub r10a: f64,
    /// Precontrast R1 of liver in Hz
    pub r10l: f64,
    /// Precontrast R1 of blood before the second scan, `r10a` when unset
    pub r10a2: Option<f64>,
    /// Precontrast R1 of liver before the second scan, `r10l` when unset
    pub r10l2: Option<f64>,
    pub n0: usize,
    pub sample_duration: f64,
    pub resolution: f64,
    pub tolerance: f64,
}

impl Default for AortaLiverOptions {
    fn default() -> Self {
        Self {
            organs: Organs::Comp,
            kinetics: LiverKinetics::Stationary,
            injection: Injection {
                conc: 0.25,
                dose: 0.1,
                rate: 1.0,
                ..Default::default()
            },
            dose2: 0.1,
            second_scan_start: 3600.0,
            aorta_sequence: Sequence::default(),
            liver_sequence: Sequence::default(),
            hct: 0.45,
            r1: 6.4,
            r1h: 9.8,
            r10a: 1.0 / 1.6,
            r10l: 1.0 / 0.8,
            r10a2: None,
            r10l2: None,
            n0: 1,
            sample_duration: 0.0,
            resolution: 1.0,
            tolerance: 1e-3,
        }
    }
}

impl AortaLiverOptions {
    pub fn new(kinetics: LiverKinetics) -> Self {
        Self {
            kinetics,
            ..Default::default()
        }
    }

    pub fn with_organs(mut self, organs: Organs) -> Self {
        self.organs = organs;
        self
    }

    pub fn with_injection(mut self, injection: Injection) -> Self {
        self.injection = injection;
        self
    }

    pub fn with_second_scan(mut self, start: f64, dose2: f64) -> Self {
        self.second_scan_start = start;
        self.dose2 = dose2;
        self
    }

    pub fn with_sequences(mut self, aorta: Sequence, liver: Sequence) -> Self {
        self.aorta_sequence = aorta;
        self.liver_sequence = liver;
        self
    }

    pub fn with_r10(mut self, r10a: f64, r10l: f64) -> Self {
        self.r10a = r10a;
        self.r10l = r10l;
        self
    }

    /// Precontrast rates measured before the second scan
    pub fn with_second_r10(mut self, r10a: f64, r10l: f64) -> Self {
        self.r10a2 = Some(r10a);
        self.r10l2 = Some(r10l);
        self
    }

    pub fn with_baseline(mut self, n0: usize) -> Self {
        self.n0 = n0;
        self
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }
}

// ============================================================================
// Model
// ============================================================================

/// Aorta and liver signals after one or two injections
#[derive(Debug, Clone)]
pub struct AortaLiver {
    options: AortaLiverOptions,
    scans: usize,
    params: Parameters,
}

/// Relaxation rates of blood and liver on the simulation grid
struct Relaxation {
    grid: Vec<f64>,
    aorta: Vec<f64>,
    liver: Vec<f64>,
}

impl AortaLiver {
    /// Model of a single scan
    pub fn new(options: AortaLiverOptions) -> Result<Self, DcmriError> {
        Self::with_scans(options, 1)
    }

    /// Model of two scans with a second injection
    pub fn two_scan(options: AortaLiverOptions) -> Result<Self, DcmriError> {
        Self::with_scans(options, 2)
    }

    fn with_scans(options: AortaLiverOptions, scans: usize) -> Result<Self, DcmriError> {
        options.aorta_sequence.validate()?;
        options.liver_sequence.validate()?;
        if !(0.0..1.0).contains(&options.hct) {
            return Err(DcmriError::InvalidState(format!(
                "hematocrit {} outside [0, 1)",
                options.hct
            )));
        }
        if !(options.resolution > 0.0) {
            return Err(DcmriError::InvalidState(format!(
                "resolution {} must be positive",
                options.resolution
            )));
        }
        let scale = |spec: Spec| parameter(spec, 1.0, (0.0, f64::INFINITY));
        let mut params = Parameters::new().with(scale(S0A)).with(scale(S0L));
        if scans == 2 {
            params.push(scale(S0A2));
            params.push(scale(S0L2));
        }
        for p in circulation_parameters(options.organs) {
            params.push(p);
        }
        if scans == 2 {
            let bat2 = options.second_scan_start + 30.0;
            params.push(parameter(BAT2, bat2, (0.0, f64::INFINITY)));
        }
        for p in hepatic_parameters(options.kinetics) {
            params.push(p);
        }
        for symbol in ["S0a", "S0l", "S0a2", "S0l2"] {
            if params.contains(symbol) {
                params.set_free(symbol, false)?;
            }
        }
        Ok(Self {
            options,
            scans,
            params,
        })
    }

    pub fn options(&self) -> &AortaLiverOptions {
        &self.options
    }

    /// Number of scans the model expects
    pub fn scans(&self) -> usize {
        self.scans
    }

    fn check_scans(&self, scans: &[Scan]) -> Result<(), FitError> {
        if scans.len() != self.scans {
            return Err(FitError::DimensionMismatch {
                expected: self.scans,
                found: scans.len(),
            });
        }
        Ok(())
    }

    fn relaxation(&self, params: &Parameters, scans: &[Scan]) -> Result<Relaxation, DcmriError> {
        let o = &self.options;
        let times: Vec<&[f64]> = scans
            .iter()
            .flat_map(|s| [s.aorta_time.as_slice(), s.liver_time.as_slice()])
            .collect();
        let grid = simulation_grid(&times, o.resolution)?;
        let mut j = o.injection.flux(&grid, params.value("BAT")?)?;
        if self.scans == 2 {
            let second = o.injection.clone().with_dose(o.dose2);
            let j2 = second.flux(&grid, params.value("BAT2")?)?;
            j.iter_mut().zip(&j2).for_each(|(a, b)| *a += b);
        }
        let cb = Circulation::from_params(params, o.organs)?.aorta_conc(&j, &grid, o.tolerance)?;
        let cp: Vec<f64> = cb.iter().map(|c| c / (1.0 - o.hct)).collect();
        let (ne, nh) = Hepatic::from_params(params, o.kinetics)?.amounts(&cp, &grid)?;
        // precontrast rates switch to the second-scan values at its start
        let second = |t: f64| self.scans == 2 && t >= o.second_scan_start;
        let r10a = |t: f64| match o.r10a2 {
            Some(r) if second(t) => r,
            _ => o.r10a,
        };
        let r10l = |t: f64| match o.r10l2 {
            Some(r) if second(t) => r,
            _ => o.r10l,
        };
        let liver = liver_relaxation(0.0, o.r1, o.r1h, &ne, &nh)
            .into_iter()
            .zip(&grid)
            .map(|(r, &t)| r10l(t) + r)
            .collect();
        Ok(Relaxation {
            aorta: cb.iter().zip(&grid).map(|(c, &t)| r10a(t) + o.r1 * c).collect(),
            liver,
            grid,
        })
    }

    /// Predicted signals at the acquisition times of `scans`
    fn simulate(&self, params: &Parameters, scans: &[Scan]) -> Result<Vec<Scan>, DcmriError> {
        self.check_scans(scans)?;
        let o = &self.options;
        let r = self.relaxation(params, scans)?;
        let scales = [["S0a", "S0l"], ["S0a2", "S0l2"]];
        scans
            .iter()
            .zip(scales)
            .map(|(scan, [sa, sl])| -> Result<Scan, DcmriError> {
                let r1a = sample(&scan.aorta_time, &r.grid, &r.aorta, o.sample_duration)?;
                let r1l = sample(&scan.liver_time, &r.grid, &r.liver, o.sample_duration)?;
                Ok(Scan {
                    aorta_time: scan.aorta_time.clone(),
                    aorta: o.aorta_sequence.signals(params.value(sa)?, &r1a),
                    liver_time: scan.liver_time.clone(),
                    liver: o.liver_sequence.signals(params.value(sl)?, &r1l),
                })
            })
            .collect()
    }

    /// Signals for the current parameters at the acquisition times of
    /// `scans`; measured signals in `scans` are ignored
    pub fn predict(&self, scans: &[Scan]) -> Result<Vec<Scan>, DcmriError> {
        self.simulate(&self.params, scans)
    }

    /// Set every signal scale so that the precontrast signals match
    pub fn calibrate(&mut self, scans: &[Scan]) -> Result<(), DcmriError> {
        self.check_scans(scans)?;
        let n0 = self.options.n0;
        let scales = [["S0a", "S0l"], ["S0a2", "S0l2"]];
        for (k, (scan, [sa, sl])) in scans.iter().zip(scales).enumerate() {
            scan.check()?;
            let s0a = calibrated_s0(&self.params, sa, n0, &scan.aorta, |p| {
                Ok(self.simulate(p, scans)?.swap_remove(k).aorta)
            })?;
            let s0l = calibrated_s0(&self.params, sl, n0, &scan.liver, |p| {
                Ok(self.simulate(p, scans)?.swap_remove(k).liver)
            })?;
            self.params.set_value(sa, s0a)?;
            self.params.set_value(sl, s0l)?;
        }
        Ok(())
    }

    /// Fit the free parameters jointly to all curves.
    ///
    /// Each curve is weighted by its inverse squared maximum so that aorta
    /// and liver contribute on the same scale.
    pub fn train(
        &mut self,
        scans: &[Scan],
        options: &TrainOptions,
    ) -> Result<FitResult, DcmriError> {
        self.calibrate(scans)?;
        let mut ydata = Vec::new();
        let mut weights = Vec::new();
        for scan in scans {
            for curve in [&scan.aorta, &scan.liver] {
                let max = curve.iter().fold(0.0f64, |m, y| m.max(y.abs()));
                let w = if max > 0.0 { 1.0 / (max * max) } else { 1.0 };
                ydata.extend_from_slice(curve);
                weights.extend(std::iter::repeat(w).take(curve.len()));
            }
        }
        let mut params = self.params.clone();
        let fit = fit_free(&mut params, &ydata, Some(weights.as_slice()), options, |p| {
            let predicted = self.simulate(p, scans)?;
            Ok(predicted
                .into_iter()
                .flat_map(|s| s.aorta.into_iter().chain(s.liver))
                .collect())
        })?;
        self.params = params;
        Ok(fit)
    }

    /// Goodness of fit averaged over all curves
    pub fn cost(&self, scans: &[Scan], metric: Metric) -> Result<f64, DcmriError> {
        let predicted = self.predict(scans)?;
        let mut total = 0.0;
        for (scan, fit) in scans.iter().zip(&predicted) {
            total += cost(&scan.aorta, &fit.aorta, metric)?;
            total += cost(&scan.liver, &fit.liver, metric)?;
        }
        Ok(total / (2 * scans.len()) as f64)
    }
}

impl Parametrized for AortaLiver {
    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn derived(&self) -> Result<Vec<Parameter>, DcmriError> {
        let mut out = circulation_derived(&self.params)?;
        out.extend(hepatic_derived(&self.params, self.options.kinetics)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(start: f64, n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| start + dt * i as f64).collect()
    }

    fn one_scan() -> Vec<Scan> {
        let t = grid(0.0, 100, 3.0);
        vec![Scan::times(t.clone(), t)]
    }

    #[test]
    fn parameters_cover_both_organs() {
        let model = AortaLiver::two_scan(AortaLiverOptions::new(LiverKinetics::NonStationary))
            .unwrap();
        for symbol in ["S0a2", "S0l2", "BAT", "BAT2", "CO", "Te", "khe_i", "Th_f"] {
            assert!(model.parameters().contains(symbol), "{symbol}");
        }
        assert!(!model.parameters().get("S0l2").unwrap().free);
        let derived = model.params(&["CL", "Fe", "kbh_i"]).unwrap();
        assert_eq!(derived.len(), 3);
    }

    #[test]
    fn wrong_number_of_scans_is_rejected() {
        let model = AortaLiver::new(AortaLiverOptions::default()).unwrap();
        let mut scans = one_scan();
        scans.push(scans[0].clone());
        assert!(model.predict(&scans).is_err());
    }

    #[test]
    fn second_injection_enhances_second_scan() {
        let options = AortaLiverOptions::default().with_second_scan(300.0, 0.1);
        let mut model = AortaLiver::two_scan(options).unwrap();
        model.set_params(&[("BAT2", 330.0)]).unwrap();
        let scans = vec![
            Scan::times(grid(0.0, 90, 3.0), grid(0.0, 90, 3.0)),
            Scan::times(grid(300.0, 90, 3.0), grid(300.0, 90, 3.0)),
        ];
        let single = model.predict(&scans).unwrap();
        model.options.dose2 = 0.0;
        let without = model.predict(&scans).unwrap();
        for (a, b) in single[0].aorta.iter().zip(&without[0].aorta) {
            assert_relative_eq!(*a, *b, max_relative = 1e-3);
        }
        assert!(single[1].liver[80] > without[1].liver[80]);
    }

    #[test]
    fn second_scan_has_its_own_precontrast_rates() {
        let scans = vec![
            Scan::times(grid(0.0, 90, 3.0), grid(0.0, 90, 3.0)),
            Scan::times(grid(300.0, 90, 3.0), grid(300.0, 90, 3.0)),
        ];
        let options = AortaLiverOptions::default().with_second_scan(300.0, 0.1);
        let same = AortaLiver::two_scan(options.clone()).unwrap().predict(&scans).unwrap();
        let options = options.with_second_r10(1.0 / 1.2, 1.0 / 0.6);
        let changed = AortaLiver::two_scan(options).unwrap().predict(&scans).unwrap();
        assert_eq!(same[0], changed[0]);
        assert!(changed[1].aorta[0] > same[1].aorta[0]);
        assert!(changed[1].liver[0] > same[1].liver[0]);
    }

    #[test]
    fn calibration_matches_baselines() {
        let mut truth = AortaLiver::new(AortaLiverOptions::default().with_baseline(4)).unwrap();
        truth.set_params(&[("S0a", 250.0), ("S0l", 80.0)]).unwrap();
        let data = truth.predict(&one_scan()).unwrap();
        let mut model = AortaLiver::new(AortaLiverOptions::default().with_baseline(4)).unwrap();
        model.calibrate(&data).unwrap();
        let v = model.params(&["S0a", "S0l"]).unwrap();
        assert_relative_eq!(v[0], 250.0, max_relative = 1e-9);
        assert_relative_eq!(v[1], 80.0, max_relative = 1e-9);
    }

    #[test]
    fn trains_liver_uptake_jointly() {
        let options = AortaLiverOptions::default().with_baseline(4);
        let mut truth = AortaLiver::new(options.clone()).unwrap();
        truth
            .set_params(&[("S0a", 200.0), ("S0l", 100.0), ("khe", 0.01)])
            .unwrap();
        let data = truth.predict(&one_scan()).unwrap();
        let mut model = AortaLiver::new(options).unwrap();
        for symbol in ["BAT", "CO", "Thl", "Dhl", "To", "Eb", "Te", "De", "ve", "Th"] {
            model.parameters_mut().set_free(symbol, false).unwrap();
        }
        model.train(&data, &TrainOptions::default()).unwrap();
        let khe = model.params(&["khe"]).unwrap()[0];
        assert_relative_eq!(khe, 0.01, max_relative = 1e-2);
        assert!(model.cost(&data, Metric::Nrms).unwrap() < 0.1);
    }
}
