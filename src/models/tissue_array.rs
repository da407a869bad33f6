//! Pixel-wise fitting of tissue curves
//!
//! Every row of the signal array is one pixel. Pixels are fitted
//! independently and in parallel, each starting from the same prototype
//! [`Tissue`]. A pixel whose fit fails is reported as `NaN` in every map.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use super::{Model, Parametrized, Tissue, TissueOptions};
use crate::error::DcmriError;
use crate::fit::{FitError, Metric, TrainOptions};

/// Fitted values of every parameter for every pixel
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMaps {
    /// Parameter symbols in column order, derived ones last
    pub symbols: Vec<String>,
    /// Values, pixels × parameters
    pub values: Array2<f64>,
    /// Standard deviations, pixels × parameters
    pub stdev: Array2<f64>,
    /// Goodness of fit per pixel
    pub cost: Array1<f64>,
}

impl ParameterMaps {
    /// Map of one parameter over all pixels
    pub fn map(&self, symbol: &str) -> Option<ArrayView1<'_, f64>> {
        let column = self.symbols.iter().position(|s| s == symbol)?;
        Some(self.values.column(column))
    }

    pub fn npixels(&self) -> usize {
        self.values.nrows()
    }
}

/// A [`Tissue`] model applied to many pixels sharing one arterial input
#[derive(Debug, Clone)]
pub struct TissueArray {
    prototype: Tissue,
    metric: Metric,
    show_progress: bool,
}

impl TissueArray {
    pub fn new(options: TissueOptions, time: &[f64], aif: &[f64]) -> Result<Self, DcmriError> {
        Ok(Self {
            prototype: Tissue::new(options, time, aif)?,
            metric: Metric::default(),
            show_progress: false,
        })
    }

    /// Initial values and free parameters shared by all pixels
    pub fn prototype_mut(&mut self) -> &mut Tissue {
        &mut self.prototype
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Fit every row of `signals`, acquired at `time`
    pub fn train(
        &self,
        time: &[f64],
        signals: ArrayView2<f64>,
        options: &TrainOptions,
    ) -> Result<ParameterMaps, DcmriError> {
        if signals.ncols() != time.len() {
            return Err(FitError::DimensionMismatch {
                expected: time.len(),
                found: signals.ncols(),
            }
            .into());
        }
        let symbols: Vec<String> = self
            .prototype
            .export_params()?
            .into_iter()
            .map(|row| row.parameter)
            .collect();
        let npixels = signals.nrows();
        let progress = if self.show_progress {
            let bar = ProgressBar::new(npixels as u64);
            bar.set_style(
                ProgressStyle::with_template("{bar:40} {pos}/{len} pixels [{elapsed}<{eta}]")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            Some(bar)
        } else {
            None
        };

        let fits: Vec<Option<(Vec<f64>, Vec<f64>, f64)>> = signals
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(pixel, signal)| {
                let signal = signal.to_vec();
                let fit = self.train_pixel(time, &signal, options);
                if let Some(bar) = &progress {
                    bar.inc(1);
                }
                match fit {
                    Ok(fit) => Some(fit),
                    Err(error) => {
                        tracing::warn!(pixel, %error, "Pixel fit failed");
                        None
                    }
                }
            })
            .collect();
        if let Some(bar) = progress {
            bar.finish();
        }

        let nparams = symbols.len();
        let mut values = Array2::from_elem((npixels, nparams), f64::NAN);
        let mut stdev = Array2::from_elem((npixels, nparams), f64::NAN);
        let mut cost = Array1::from_elem(npixels, f64::NAN);
        for (pixel, fit) in fits.into_iter().enumerate() {
            if let Some((v, s, c)) = fit {
                values.row_mut(pixel).assign(&Array1::from(v));
                stdev.row_mut(pixel).assign(&Array1::from(s));
                cost[pixel] = c;
            }
        }
        let failed = cost.iter().filter(|c| c.is_nan()).count();
        tracing::debug!(npixels, failed, "Pixel-wise fit done");
        Ok(ParameterMaps {
            symbols,
            values,
            stdev,
            cost,
        })
    }

    fn train_pixel(
        &self,
        time: &[f64],
        signal: &[f64],
        options: &TrainOptions,
    ) -> Result<(Vec<f64>, Vec<f64>, f64), DcmriError> {
        let mut tissue = self.prototype.clone();
        tissue.train(time, signal, options)?;
        let rows = tissue.export_params()?;
        let cost = tissue.cost(time, signal, self.metric)?;
        Ok((
            rows.iter().map(|r| r.value).collect(),
            rows.iter().map(|r| r.stdev).collect(),
            cost,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aif::aif_parker;
    use crate::models::Kinetics;
    use approx::assert_relative_eq;

    #[test]
    fn maps_recover_pixel_values() {
        let time: Vec<f64> = (0..150).map(|i| 2.0 * i as f64).collect();
        let aif = aif_parker(&time, 20.0);
        let options = TissueOptions::new(Kinetics::WV).with_baseline(5);
        let ktrans = [0.002, 0.005, 0.01];
        let mut signals = Array2::zeros((ktrans.len(), time.len()));
        for (row, k) in ktrans.iter().enumerate() {
            let mut tissue = Tissue::new(options.clone(), &time, &aif).unwrap();
            tissue.set_params(&[("S0", 100.0), ("Ktrans", *k), ("ve", 0.3)]).unwrap();
            signals
                .row_mut(row)
                .assign(&Array1::from(tissue.predict(&time).unwrap()));
        }
        let array = TissueArray::new(options, &time, &aif).unwrap();
        let maps = array
            .train(&time, signals.view(), &TrainOptions::default())
            .unwrap();
        let fitted = maps.map("Ktrans").unwrap();
        for (k, f) in ktrans.iter().zip(fitted.iter()) {
            assert_relative_eq!(*f, *k, max_relative = 1e-2);
        }
        assert!(maps.cost.iter().all(|c| *c < 1.0));
        assert!(maps.map("Te").is_some());
    }

    #[test]
    fn time_mismatch_is_rejected() {
        let time: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let aif = aif_parker(&time, 2.0);
        let array = TissueArray::new(TissueOptions::default(), &time, &aif).unwrap();
        let signals = Array2::zeros((2, 5));
        assert!(array
            .train(&time, signals.view(), &TrainOptions::default())
            .is_err());
    }
}
