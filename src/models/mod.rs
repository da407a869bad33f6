//! Tracer-kinetic models of DCE-MRI signals
//!
//! Each model owns a [`Parameters`] table. [`Model::predict`] produces the
//! signal for the current values, [`Model::train`] fits the free
//! parameters to measured data after calibrating the signal scale `S0` on
//! the precontrast samples.
//!
//! # Example
//!
//! ```rust,no_run
//! use dcmri::aif::aif_parker;
//! use dcmri::fit::TrainOptions;
//! use dcmri::models::{Kinetics, Model, Parametrized, Tissue, TissueOptions};
//!
//! let t: Vec<f64> = (0..600).map(|i| i as f64 * 0.5).collect();
//! let aif = aif_parker(&t, 20.0);
//! let mut tissue = Tissue::new(TissueOptions::new(Kinetics::HF), &t, &aif).unwrap();
//! let signal = tissue.predict(&t).unwrap();
//! tissue.train(&t, &signal, &TrainOptions::default()).unwrap();
//! for row in tissue.export_params().unwrap() {
//!     println!("{}: {} {}", row.name, row.value, row.unit);
//! }
//! ```

mod aorta;
mod aorta_liver;
mod kidney;
mod liver;
mod sequence;
mod tissue;
mod tissue_array;

pub use aorta::{Aorta, AortaOptions, Injection, Organs};
pub use aorta_liver::{AortaLiver, AortaLiverOptions, Scan};
pub use kidney::{Kidney, KidneyKinetics, KidneyOptions};
pub use liver::{Liver, LiverKinetics, LiverOptions};
pub use sequence::Sequence;
pub use tissue::{Exchange, Kinetics, Tissue, TissueOptions, WaterExchangeRegime};
pub use tissue_array::{ParameterMaps, TissueArray};

use crate::error::DcmriError;
use crate::fit::{
    cost, curve_fit, FitError, FitResult, Metric, ParamRow, Parameter, Parameters, TrainOptions,
};
use crate::tools::{sample, uniform_grid};

// ============================================================================
// Traits
// ============================================================================

/// Access to the parameters of a model
pub trait Parametrized {
    fn parameters(&self) -> &Parameters;

    fn parameters_mut(&mut self) -> &mut Parameters;

    /// Quantities computed from the current parameter values
    fn derived(&self) -> Result<Vec<Parameter>, DcmriError> {
        Ok(Vec::new())
    }

    /// Values of the named parameters, derived ones included
    fn params(&self, symbols: &[&str]) -> Result<Vec<f64>, DcmriError> {
        let derived = self.derived()?;
        symbols
            .iter()
            .map(|s| match self.parameters().get(s) {
                Some(p) => Ok(p.value),
                None => derived
                    .iter()
                    .find(|p| p.symbol == *s)
                    .map(|p| p.value)
                    .ok_or_else(|| DcmriError::from(FitError::UnknownParameter(s.to_string()))),
            })
            .collect()
    }

    fn set_params(&mut self, values: &[(&str, f64)]) -> Result<(), DcmriError> {
        for (symbol, value) in values {
            self.parameters_mut().set_value(symbol, *value)?;
        }
        Ok(())
    }

    /// Rows `[parameter, name, value, unit, stdev]`, derived ones last
    fn export_params(&self) -> Result<Vec<ParamRow>, DcmriError> {
        let mut rows = self.parameters().rows();
        rows.extend(self.derived()?.iter().map(Parameter::row));
        Ok(rows)
    }
}

/// A model predicting one signal curve
pub trait Model: Parametrized {
    /// Signal at `time` for the parameter values in `params`
    fn simulate(&self, params: &Parameters, time: &[f64]) -> Result<Vec<f64>, DcmriError>;

    /// Number of precontrast samples
    fn baseline(&self) -> usize;

    fn predict(&self, time: &[f64]) -> Result<Vec<f64>, DcmriError> {
        self.simulate(self.parameters(), time)
    }

    /// Set `S0` so that the precontrast signal matches the data
    fn calibrate(&mut self, time: &[f64], signal: &[f64]) -> Result<(), DcmriError> {
        let s0 = calibrated_s0(self.parameters(), "S0", self.baseline(), signal, |p| {
            self.simulate(p, time)
        })?;
        self.parameters_mut().set_value("S0", s0)?;
        Ok(())
    }

    /// Fit the free parameters to `signal` measured at `time`
    fn train(
        &mut self,
        time: &[f64],
        signal: &[f64],
        options: &TrainOptions,
    ) -> Result<FitResult, DcmriError> {
        self.calibrate(time, signal)?;
        let mut params = self.parameters().clone();
        let fit = fit_free(&mut params, signal, None, options, |p| self.simulate(p, time))?;
        *self.parameters_mut() = params;
        Ok(fit)
    }

    fn cost(&self, time: &[f64], signal: &[f64], metric: Metric) -> Result<f64, DcmriError> {
        let yfit = self.predict(time)?;
        Ok(cost(signal, &yfit, metric)?)
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Mean of the first `n0` values
pub(crate) fn baseline_mean(values: &[f64], n0: usize) -> Result<f64, DcmriError> {
    if n0 == 0 || n0 > values.len() {
        return Err(DcmriError::Calibration(format!(
            "{n0} baseline samples requested from a curve of length {}",
            values.len()
        )));
    }
    Ok(values[..n0].iter().sum::<f64>() / n0 as f64)
}

/// Value of the scale parameter `symbol` that matches the baseline of the
/// simulated signal to the baseline of `signal`.
pub(crate) fn calibrated_s0<F>(
    params: &Parameters,
    symbol: &str,
    n0: usize,
    signal: &[f64],
    simulate: F,
) -> Result<f64, DcmriError>
where
    F: Fn(&Parameters) -> Result<Vec<f64>, DcmriError>,
{
    let mut unit = params.clone();
    unit.set_value(symbol, 1.0)?;
    let model = simulate(&unit)?;
    let reference = baseline_mean(&model, n0)?;
    let measured = baseline_mean(signal, n0)?;
    if reference == 0.0 || !reference.is_finite() {
        tracing::warn!(symbol, reference, "Model baseline cannot be scaled");
        return Err(DcmriError::Calibration(format!(
            "model baseline for {symbol} is {reference}"
        )));
    }
    Ok(measured / reference)
}

/// Fit the free parameters of `params` and store estimates and stdevs.
pub(crate) fn fit_free<F>(
    params: &mut Parameters,
    ydata: &[f64],
    weights: Option<&[f64]>,
    options: &TrainOptions,
    simulate: F,
) -> Result<FitResult, DcmriError>
where
    F: Fn(&Parameters) -> Result<Vec<f64>, DcmriError>,
{
    let template = params.clone();
    let p0 = params.free_values();
    let bounds = params.free_bounds();
    let model = |p: &[f64]| {
        let mut trial = template.clone();
        trial.set_free_values(p);
        simulate(&trial)
    };
    let fit = curve_fit(model, &p0, &bounds, ydata, weights, options)?;
    params.set_free_values(&fit.params);
    params.set_free_stdevs(&fit.stdev);
    tracing::debug!(
        free = ?params.free_symbols(),
        cost = fit.cost,
        iterations = fit.iterations,
        "Model trained"
    );
    Ok(fit)
}

/// Simulation grid covering every acquisition time in `times`
pub(crate) fn simulation_grid(times: &[&[f64]], resolution: f64) -> Result<Vec<f64>, DcmriError> {
    let (lo, hi) = times
        .iter()
        .flat_map(|t| t.iter())
        .fold((0.0f64, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    if !hi.is_finite() {
        return Err(DcmriError::InvalidState("no acquisition times".to_string()));
    }
    Ok(uniform_grid(lo, hi + resolution, resolution)?)
}

/// Relaxation rates sampled at the acquisition times.
pub(crate) fn sampled(
    time: &[f64],
    grid: &[f64],
    values: &[f64],
    duration: f64,
) -> Result<Vec<f64>, DcmriError> {
    Ok(sample(time, grid, values, duration)?)
}

/// Symbol, name and unit of a parameter known to the models
pub(crate) type Spec = (&'static str, &'static str, &'static str);

pub(crate) fn parameter(spec: Spec, value: f64, bounds: (f64, f64)) -> Parameter {
    Parameter::new(spec.0, spec.1, spec.2, value).with_bounds(bounds.0, bounds.1)
}

pub(crate) fn derived(spec: Spec, value: f64) -> Parameter {
    Parameter::new(spec.0, spec.1, spec.2, value).fixed()
}

pub(crate) const S0: Spec = ("S0", "Signal scaling factor", "a.u.");

pub(crate) fn signal_scale() -> Parameter {
    Parameter::new(S0.0, S0.1, S0.2, 1.0).fixed()
}
