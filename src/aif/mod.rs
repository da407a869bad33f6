//! Arterial input functions
//!
//! Population-average blood concentration curves (mM) that can stand in for
//! a measured arterial input when none is available.

use crate::tools::{check_grid, nexpconv, ToolsError};

// Parker et al (2006), MRM 56:993-1000, for a dose of 0.1 mmol/kg.
// Times in minutes, concentrations in mM.
const PARKER_A1: f64 = 0.809;
const PARKER_A2: f64 = 0.330;
const PARKER_T1: f64 = 0.17046;
const PARKER_T2: f64 = 0.365;
const PARKER_SIGMA1: f64 = 0.0563;
const PARKER_SIGMA2: f64 = 0.132;
const PARKER_ALPHA: f64 = 1.050;
const PARKER_BETA: f64 = 0.1685;
const PARKER_S: f64 = 38.078;
const PARKER_TAU: f64 = 0.483;

/// Parker population AIF in blood (mM).
///
/// # Arguments
///
/// * `t` - Time points in sec
/// * `bat` - Bolus arrival time in sec; the curve is zero before it
///
/// # Examples
///
/// ```rust
/// use dcmri::aif::aif_parker;
///
/// let t: Vec<f64> = (0..120).map(|i| i as f64).collect();
/// let cb = aif_parker(&t, 20.0);
/// assert_eq!(cb[10], 0.0);
/// assert!(cb[30] > 1.0);
/// ```
pub fn aif_parker(t: &[f64], bat: f64) -> Vec<f64> {
    let norm = (2.0 * std::f64::consts::PI).sqrt();
    t.iter()
        .map(|&ti| {
            if ti < bat {
                return 0.0;
            }
            let m = (ti - bat) / 60.0;
            let g1 = PARKER_A1 / (PARKER_SIGMA1 * norm)
                * (-(m - PARKER_T1).powi(2) / (2.0 * PARKER_SIGMA1.powi(2))).exp();
            let g2 = PARKER_A2 / (PARKER_SIGMA2 * norm)
                * (-(m - PARKER_T2).powi(2) / (2.0 * PARKER_SIGMA2.powi(2))).exp();
            let sigmoid =
                PARKER_ALPHA * (-PARKER_BETA * m).exp() / (1.0 + (-PARKER_S * (m - PARKER_TAU)).exp());
            g1 + g2 + sigmoid
        })
        .collect()
}

/// Gamma-variate first-pass bolus (mM).
///
/// The curve integrates to `area` (mM sec) and has mean transit time
/// `shape * scale` after the arrival time `bat`.
pub fn aif_gamma(
    t: &[f64],
    bat: f64,
    area: f64,
    shape: f64,
    scale: f64,
) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    let shifted: Vec<f64> = t.iter().map(|&ti| ti - bat).collect();
    let first = shifted.partition_point(|&x| x <= 0.0);
    let mut out = vec![0.0; t.len()];
    if first >= t.len() {
        return Ok(out);
    }
    // evaluate on a grid that starts exactly at the arrival time
    let mut grid = Vec::with_capacity(t.len() - first + 1);
    grid.push(0.0);
    grid.extend_from_slice(&shifted[first..]);
    let h = nexpconv(shape, scale, &grid)?;
    for (o, v) in out[first..].iter_mut().zip(h.into_iter().skip(1)) {
        *o = area * v;
    }
    Ok(out)
}
