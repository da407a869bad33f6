//! Nonlinear least-squares fitting
//!
//! [`curve_fit`] minimizes the weighted sum of squared residuals of a model
//! with Nelder-Mead. Bounded parameters are mapped to an unconstrained space
//! before the simplex search:
//!
//! ```text
//! both bounds:  p = lo + (hi - lo) (sin(u) + 1) / 2
//! lower only:   p = lo - 1 + sqrt(u² + 1)
//! upper only:   p = hi + 1 - sqrt(u² + 1)
//! ```
//!
//! The search is restarted from the best point until the relative parameter
//! change of a full run falls below `xtol`. Standard deviations follow from
//! the covariance `s² (JᵀJ)⁻¹` of the weighted residuals at the optimum.

mod options;
mod params;

pub use options::{cost, Metric, TrainOptions};
pub use params::{ParamRow, Parameter, Parameters};

use argmin::{
    core::{CostFunction, Error, Executor, State},
    solver::neldermead::NelderMead,
};
use nalgebra::DMatrix;
use thiserror::Error;

use crate::error::DcmriError;

/// Errors raised while fitting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Optimizer failed: {0}")]
    Optimizer(String),
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid bounds for {symbol}: [{lower}, {upper}]")]
    InvalidBounds {
        symbol: String,
        lower: f64,
        upper: f64,
    },
    #[error("Initial value {value} of parameter {index} is outside its bounds")]
    OutOfBounds { index: usize, value: f64 },
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Not enough data: {samples} samples for {parameters} free parameters")]
    NotEnoughData { samples: usize, parameters: usize },
    /// The model cannot be evaluated at the initial values
    #[error("Invalid starting point: {0}")]
    InvalidStart(String),
}

/// Outcome of [`curve_fit`]
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub params: Vec<f64>,
    pub stdev: Vec<f64>,
    /// Weighted sum of squared residuals at `params`
    pub cost: f64,
    /// Nelder-Mead iterations over all runs
    pub iterations: u64,
    /// Whether the restarts settled within `xtol`
    pub converged: bool,
}

// ============================================================================
// Bound transforms
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Transform {
    Free,
    Interval(f64, f64),
    Lower(f64),
    Upper(f64),
}

impl Transform {
    fn new(lower: f64, upper: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (true, true) => Transform::Interval(lower, upper),
            (true, false) => Transform::Lower(lower),
            (false, true) => Transform::Upper(upper),
            (false, false) => Transform::Free,
        }
    }

    fn bounded(self, u: f64) -> f64 {
        match self {
            Transform::Free => u,
            Transform::Interval(lo, hi) => lo + (hi - lo) * (u.sin() + 1.0) / 2.0,
            Transform::Lower(lo) => lo - 1.0 + (u * u + 1.0).sqrt(),
            Transform::Upper(hi) => hi + 1.0 - (u * u + 1.0).sqrt(),
        }
    }

    fn free(self, p: f64) -> f64 {
        match self {
            Transform::Free => p,
            Transform::Interval(lo, hi) => (2.0 * (p - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0).asin(),
            Transform::Lower(lo) => ((p - lo + 1.0).max(1.0).powi(2) - 1.0).sqrt(),
            Transform::Upper(hi) => ((hi - p + 1.0).max(1.0).powi(2) - 1.0).sqrt(),
        }
    }
}

// ============================================================================
// Cost function
// ============================================================================

struct WeightedResiduals<'a, F> {
    model: &'a F,
    transforms: &'a [Transform],
    ydata: &'a [f64],
    weights: &'a [f64],
    /// Weighted sum of squares of the data
    scale: f64,
}

impl<F> WeightedResiduals<'_, F>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, DcmriError>,
{
    fn bounded(&self, u: &[f64]) -> Vec<f64> {
        self.transforms
            .iter()
            .zip(u)
            .map(|(t, &x)| t.bounded(x))
            .collect()
    }

    /// Weighted SSE, infinite where the model is not defined
    fn sse(&self, p: &[f64]) -> f64 {
        match (self.model)(p) {
            Ok(yfit) if yfit.len() == self.ydata.len() => {
                let sse: f64 = self
                    .ydata
                    .iter()
                    .zip(&yfit)
                    .zip(self.weights)
                    .map(|((y, f), w)| w * (y - f).powi(2))
                    .sum();
                if sse.is_finite() {
                    sse
                } else {
                    f64::INFINITY
                }
            }
            _ => f64::INFINITY,
        }
    }
}

impl<F> CostFunction for WeightedResiduals<'_, F>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, DcmriError>,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.sse(&self.bounded(u)) / self.scale)
    }
}

fn optimizer(e: Error) -> FitError {
    FitError::Optimizer(e.to_string())
}

fn create_initial_simplex(initial_point: &[f64], step: f64) -> Vec<Vec<f64>> {
    let mut vertices = vec![initial_point.to_vec()];
    for i in 0..initial_point.len() {
        let perturbation = if initial_point[i].abs() < 1e-8 {
            step
        } else {
            step * initial_point[i]
        };
        let mut perturbed_point = initial_point.to_owned();
        perturbed_point[i] += perturbation;
        vertices.push(perturbed_point);
    }
    vertices
}

fn relative_change(old: &[f64], new: &[f64]) -> f64 {
    let diff = old
        .iter()
        .zip(new)
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt();
    let norm = old.iter().map(|a| a * a).sum::<f64>().sqrt();
    if diff == 0.0 {
        0.0
    } else {
        diff / norm.max(1e-12)
    }
}

// ============================================================================
// Fitting
// ============================================================================

/// Fit `model` to `ydata` by weighted least squares.
///
/// # Arguments
///
/// * `model` - Prediction for a parameter vector; errors count as an
///   infinite cost during the search
/// * `p0` - Initial values, inside `bounds`
/// * `bounds` - `(lower, upper)` per parameter, infinite for no bound
/// * `ydata` - Measured data
/// * `weights` - Weight of each squared residual, all 1 when `None`
/// * `options` - Tolerances and iteration limits
///
/// # Examples
///
/// ```rust
/// use dcmri::fit::{curve_fit, TrainOptions};
/// use dcmri::DcmriError;
///
/// let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
/// let y: Vec<f64> = x.iter().map(|t| 3.0 * (-t / 5.0).exp()).collect();
/// let model = |p: &[f64]| -> Result<Vec<f64>, DcmriError> {
///     Ok(x.iter().map(|t| p[0] * (-t / p[1]).exp()).collect())
/// };
/// let fit = curve_fit(
///     model,
///     &[1.0, 1.0],
///     &[(0.0, f64::INFINITY), (0.0, 100.0)],
///     &y,
///     None,
///     &TrainOptions::default(),
/// )
/// .unwrap();
/// assert!((fit.params[1] - 5.0).abs() < 1e-2);
/// ```
pub fn curve_fit<F>(
    model: F,
    p0: &[f64],
    bounds: &[(f64, f64)],
    ydata: &[f64],
    weights: Option<&[f64]>,
    options: &TrainOptions,
) -> Result<FitResult, DcmriError>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, DcmriError>,
{
    if bounds.len() != p0.len() {
        return Err(FitError::DimensionMismatch {
            expected: p0.len(),
            found: bounds.len(),
        }
        .into());
    }
    let weights = match weights {
        Some(w) if w.len() != ydata.len() => {
            return Err(FitError::DimensionMismatch {
                expected: ydata.len(),
                found: w.len(),
            }
            .into())
        }
        Some(w) => w.to_vec(),
        None => vec![1.0; ydata.len()],
    };
    for (i, (&p, &(lo, hi))) in p0.iter().zip(bounds).enumerate() {
        if lo.is_nan() || hi.is_nan() || lo >= hi {
            return Err(FitError::InvalidBounds {
                symbol: format!("p[{i}]"),
                lower: lo,
                upper: hi,
            }
            .into());
        }
        if !(lo..=hi).contains(&p) {
            return Err(FitError::OutOfBounds { index: i, value: p }.into());
        }
    }
    if ydata.len() < p0.len() {
        return Err(FitError::NotEnoughData {
            samples: ydata.len(),
            parameters: p0.len(),
        }
        .into());
    }
    let y0 = model(p0).map_err(|e| FitError::InvalidStart(e.to_string()))?;
    if y0.len() != ydata.len() {
        return Err(FitError::DimensionMismatch {
            expected: ydata.len(),
            found: y0.len(),
        }
        .into());
    }

    let transforms: Vec<Transform> = bounds.iter().map(|&(lo, hi)| Transform::new(lo, hi)).collect();
    let scale = {
        let s: f64 = ydata.iter().zip(&weights).map(|(y, w)| w * y * y).sum();
        if s > 0.0 && s.is_finite() {
            s
        } else {
            1.0
        }
    };
    let problem = || WeightedResiduals {
        model: &model,
        transforms: &transforms,
        ydata,
        weights: &weights,
        scale,
    };

    let start = problem().sse(p0);
    if !start.is_finite() {
        return Err(FitError::InvalidStart(format!("cost at p0 is {start}")).into());
    }
    if p0.is_empty() {
        return Ok(FitResult {
            params: Vec::new(),
            stdev: Vec::new(),
            cost: start,
            iterations: 0,
            converged: true,
        });
    }

    let mut u: Vec<f64> = transforms.iter().zip(p0).map(|(t, &p)| t.free(p)).collect();
    let mut p = p0.to_vec();
    let mut iterations = 0;
    let mut converged = false;

    for run in 0..=options.restarts {
        let simplex = create_initial_simplex(&u, options.simplex_step);
        let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(simplex)
            .with_sd_tolerance(options.ftol)
            .map_err(optimizer)?;
        let res = Executor::new(problem(), solver)
            .configure(|state| state.max_iters(options.max_iters))
            .run()
            .map_err(optimizer)?;
        iterations += res.state.get_iter();
        let Some(best) = res.state.get_best_param().cloned() else {
            break;
        };
        let p_new = problem().bounded(&best);
        let change = relative_change(&p, &p_new);
        tracing::debug!(
            run,
            change,
            cost = res.state.get_best_cost(),
            "Nelder-Mead run finished"
        );
        u = best;
        p = p_new;
        if change < options.xtol {
            converged = true;
            break;
        }
    }
    if !converged {
        tracing::warn!(
            restarts = options.restarts,
            "Fit did not settle within xtol = {}",
            options.xtol
        );
    }

    let sse = problem().sse(&p);
    let stdev = standard_deviations(&model, &p, ydata, &weights, sse);
    Ok(FitResult {
        params: p,
        stdev,
        cost: sse,
        iterations,
        converged,
    })
}

fn difference(a: &[f64], b: &[f64], h: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| (x - y) / h).collect()
}

/// Standard deviations from a central-difference Jacobian, one-sided near
/// the edge of the model domain.
fn standard_deviations<F>(model: &F, p: &[f64], ydata: &[f64], weights: &[f64], sse: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, DcmriError>,
{
    let (n, k) = (ydata.len(), p.len());
    if n <= k || !sse.is_finite() {
        return vec![0.0; k];
    }
    let Ok(yfit) = model(p) else {
        return vec![0.0; k];
    };
    let eval = |x: &[f64]| model(x).ok().filter(|y| y.len() == n);

    let mut jac = DMatrix::<f64>::zeros(n, k);
    for j in 0..k {
        let h = 1e-6 * p[j].abs().max(1e-6);
        let mut hi = p.to_vec();
        hi[j] += h;
        let mut lo = p.to_vec();
        lo[j] -= h;
        let column = match (eval(&hi), eval(&lo)) {
            (Some(a), Some(b)) => difference(&a, &b, 2.0 * h),
            (Some(a), None) => difference(&a, &yfit, h),
            (None, Some(b)) => difference(&yfit, &b, h),
            (None, None) => {
                tracing::warn!(parameter = j, "Cannot differentiate the model");
                vec![0.0; n]
            }
        };
        for i in 0..n {
            jac[(i, j)] = weights[i].sqrt() * column[i];
        }
    }

    let s2 = sse / (n - k) as f64;
    let jtj = jac.transpose() * &jac;
    let inv = match jtj.clone().try_inverse() {
        Some(m) => m,
        None => match jtj.pseudo_inverse(1e-12) {
            Ok(m) => m,
            Err(_) => return vec![0.0; k],
        },
    };
    (0..k).map(|j| (s2 * inv[(j, j)]).max(0.0).sqrt()).collect()
}
