//! MR signal models
//!
//! Forward models map relaxation rates to a signal; the `conc_*` functions
//! in [`inverse`] go the other way, from a measured signal to the indicator
//! concentration.
//!
//! Flip angles are in degrees, times in sec and rates in Hz. Where a
//! reference rate `r10` is accepted the signal is rescaled so that a tissue
//! with `R1 = r10` returns exactly `s0`.

pub mod inverse;
mod multi;

pub use inverse::{conc_lin, conc_src, conc_ss, conc_t2w, relax};
pub use multi::{signal_spgr_multi, signal_ss_multi, MultiCompartment, WaterExchange};

use thiserror::Error;

/// Errors raised by the signal models
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    /// Array dimensions that do not fit together
    #[error("Shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: String,
        expected: String,
        found: String,
    },

    /// Off-diagonal water flows mixing finite and infinite values
    #[error("Water exchange must be either finite or infinite between all compartments")]
    MixedExchange,

    /// Value outside its domain
    #[error("Invalid argument: {param} = {value}")]
    InvalidArgument { param: String, value: f64 },

    /// Linear system without a unique solution
    #[error("Singular magnetization system: {0}")]
    Singular(String),
}

pub(crate) fn invalid(param: &str, value: f64) -> SignalError {
    SignalError::InvalidArgument {
        param: param.to_string(),
        value,
    }
}

fn rescale(s: f64, reference: Option<f64>, signal: impl Fn(f64) -> f64) -> f64 {
    match reference {
        None => s,
        Some(r10) => {
            let sref = signal(r10);
            if sref == 0.0 {
                0.0
            } else {
                s / sref
            }
        }
    }
}

fn dsc(r1: f64, r2: f64, tr: f64, te: f64) -> f64 {
    (-te * r2).exp() * (1.0 - (-tr * r1).exp())
}

/// Signal of a dynamic susceptibility contrast (gradient echo) acquisition.
///
/// With a reference `r10` the T1 factor is rescaled so that `R1 = r10`
/// returns `s0 exp(-TE R2)`.
pub fn signal_dsc(r1: f64, r2: f64, s0: f64, tr: f64, te: f64, r10: Option<f64>) -> f64 {
    s0 * rescale(dsc(r1, r2, tr, te), r10, |r| dsc(r, 0.0, tr, te))
}

/// Signal of a T2-weighted acquisition.
///
/// The signal does not depend on R1, so no reference rate applies.
pub fn signal_t2w(r2: f64, s0: f64, te: f64) -> f64 {
    s0 * (-te * r2).exp()
}

fn ss(r1: f64, tr: f64, fa: f64) -> f64 {
    let (sin, cos) = fa.to_radians().sin_cos();
    let e = (-tr * r1).exp();
    sin * (1.0 - e) / (1.0 - cos * e)
}

/// Steady-state spoiled gradient echo.
///
/// ```text
/// S = S0 sin(FA) (1 - E) / (1 - cos(FA) E),   E = exp(-TR R1)
/// ```
///
/// # Examples
///
/// ```rust
/// use dcmri::sig::signal_ss;
///
/// // calibrated on the precontrast R1, the baseline returns S0
/// let s = signal_ss(5.0, 1.0, 1.0, 45.0, Some(1.0));
/// assert!((s - 5.0).abs() < 1e-12);
/// ```
pub fn signal_ss(s0: f64, r1: f64, tr: f64, fa: f64, r10: Option<f64>) -> f64 {
    s0 * rescale(ss(r1, tr, fa), r10, |r| ss(r, tr, fa))
}

fn spgr(r1: f64, tc: f64, tr: f64, fa: f64, tp: Option<f64>) -> f64 {
    let (sin, cos) = fa.to_radians().sin_cos();
    let e = (-tr * r1).exp();
    let c = cos * e;
    let mss = (1.0 - e) / (1.0 - c);
    let m0 = match tp {
        None => 1.0,
        Some(tp) => 1.0 - (-tp * r1).exp(),
    };
    let n = pulses(tc, tr);
    sin * (mss + (m0 - mss) * c.powf(n as f64))
}

pub(crate) fn pulses(tc: f64, tr: f64) -> u32 {
    if tr <= 0.0 {
        return 0;
    }
    (tc / tr).round().max(0.0) as u32
}

/// Spoiled gradient echo read out `TC/TR` pulses into the train.
///
/// With `tp = None` the train starts from fully relaxed magnetization.
/// With `tp = Some(TP)` a saturation pulse precedes the train by `TP`.
pub fn signal_spgr(
    s0: f64,
    r1: f64,
    tc: f64,
    tr: f64,
    fa: f64,
    tp: Option<f64>,
    r10: Option<f64>,
) -> f64 {
    s0 * rescale(spgr(r1, tc, tr, fa, tp), r10, |r| spgr(r, tc, tr, fa, tp))
}

fn free(r1: f64, tc: f64, fa: f64) -> f64 {
    fa.to_radians().sin() * (1.0 - (-tc * r1).exp())
}

/// Saturation recovery read out with a single pulse after a delay `TC`.
pub fn signal_free(s0: f64, r1: f64, tc: f64, fa: f64, r10: Option<f64>) -> f64 {
    s0 * rescale(free(r1, tc, fa), r10, |r| free(r, tc, fa))
}

/// Signal proportional to R1.
pub fn signal_lin(r1: f64, s0: f64, r10: Option<f64>) -> f64 {
    s0 * rescale(r1, r10, |r| r)
}
