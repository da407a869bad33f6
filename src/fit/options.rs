//! Training configuration and goodness-of-fit metrics

use serde::{Deserialize, Serialize};

use super::FitError;

// ============================================================================
// Configuration Types
// ============================================================================

/// Settings of the least-squares fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    /// Tolerance on the spread of the simplex costs (default: 1e-8)
    ///
    /// Costs are normalized by the weighted sum of squares of the data, so
    /// this is a relative tolerance.
    pub ftol: f64,

    /// Relative parameter change below which restarts stop (default: 1e-6)
    pub xtol: f64,

    /// Maximum number of Nelder-Mead iterations per run (default: 2000)
    pub max_iters: u64,

    /// Number of restarts from the best point found (default: 3)
    pub restarts: usize,

    /// Relative size of the initial simplex (default: 0.1)
    pub simplex_step: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-8,
            xtol: 1e-6,
            max_iters: 2000,
            restarts: 3,
            simplex_step: 0.1,
        }
    }
}

impl TrainOptions {
    /// Quick settings for pixel-wise fitting
    pub fn fast() -> Self {
        Self {
            ftol: 1e-6,
            xtol: 1e-4,
            max_iters: 500,
            restarts: 1,
            ..Default::default()
        }
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn with_max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_simplex_step(mut self, step: f64) -> Self {
        self.simplex_step = step;
        self
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Goodness-of-fit measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Metric {
    /// Root mean square of the residuals
    Rms,
    /// Residual norm as a percentage of the data norm
    #[default]
    Nrms,
    /// Sum of squared residuals
    Sse,
}

/// Goodness of fit between data `y` and prediction `yfit`.
pub fn cost(y: &[f64], yfit: &[f64], metric: Metric) -> Result<f64, FitError> {
    if y.len() != yfit.len() {
        return Err(FitError::DimensionMismatch {
            expected: y.len(),
            found: yfit.len(),
        });
    }
    if y.is_empty() {
        return Err(FitError::NotEnoughData {
            samples: 0,
            parameters: 0,
        });
    }
    let sse: f64 = y.iter().zip(yfit).map(|(a, b)| (a - b).powi(2)).sum();
    Ok(match metric {
        Metric::Sse => sse,
        Metric::Rms => (sse / y.len() as f64).sqrt(),
        Metric::Nrms => {
            let norm = y.iter().map(|a| a * a).sum::<f64>().sqrt();
            if norm == 0.0 {
                if sse == 0.0 {
                    0.0
                } else {
                    f64::INFINITY
                }
            } else {
                100.0 * sse.sqrt() / norm
            }
        }
    })
}
