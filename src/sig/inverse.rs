//! Concentrations from measured signals
//!
//! Each function estimates the signal scale from the baseline (the mean of
//! the first `n0` samples, which are taken to be precontrast) and inverts
//! the signal model sample by sample. Samples for which the model has no
//! physical solution are assigned `R1 = 0`, that is `C = -R10/r1`.

use super::{invalid, SignalError};

/// Relaxation rate of tissue with concentration `c` and relaxivity `r`.
pub fn relax(c: &[f64], r10: f64, r: f64) -> Vec<f64> {
    c.iter().map(|x| r10 + r * x).collect()
}

fn baseline(s: &[f64], n0: usize) -> Result<f64, SignalError> {
    if n0 == 0 || n0 > s.len() {
        return Err(invalid("n0", n0 as f64));
    }
    Ok(s[..n0].iter().sum::<f64>() / n0 as f64)
}

fn check_relaxivity(r: f64) -> Result<(), SignalError> {
    if !(r > 0.0) || !r.is_finite() {
        return Err(invalid("relaxivity", r));
    }
    Ok(())
}

/// Concentration from a T2-weighted signal with echo time `te`.
pub fn conc_t2w(s: &[f64], te: f64, r2: f64, n0: usize) -> Result<Vec<f64>, SignalError> {
    check_relaxivity(r2)?;
    if !(te > 0.0) {
        return Err(invalid("TE", te));
    }
    let s0 = baseline(s, n0)?;
    Ok(s.iter()
        .map(|&x| -(x / s0).ln() / te / r2)
        .collect())
}

/// Concentration from a steady-state spoiled gradient echo signal.
///
/// # Arguments
///
/// * `s` - Measured signal
/// * `tr` - Repetition time in sec
/// * `fa` - Flip angle in degrees
/// * `t10` - Precontrast T1 in sec
/// * `r1` - Relaxivity in Hz/mM
/// * `n0` - Number of precontrast samples
pub fn conc_ss(
    s: &[f64],
    tr: f64,
    fa: f64,
    t10: f64,
    r1: f64,
    n0: usize,
) -> Result<Vec<f64>, SignalError> {
    check_relaxivity(r1)?;
    if !(tr > 0.0) {
        return Err(invalid("TR", tr));
    }
    let sb = baseline(s, n0)?;
    let r10 = 1.0 / t10;
    let (sin, cos) = fa.to_radians().sin_cos();
    let e0 = (-tr * r10).exp();
    let s0 = sb * (1.0 - cos * e0) / (sin * (1.0 - e0));
    Ok(s.iter()
        .map(|&x| {
            let y = x / (s0 * sin);
            let e = (1.0 - y) / (1.0 - y * cos);
            let rate = if e.is_finite() && e > 0.0 && e <= 1.0 {
                -e.ln() / tr
            } else {
                0.0
            };
            (rate - r10) / r1
        })
        .collect())
}

/// Concentration from a saturation-recovery signal with delay `tc`.
pub fn conc_src(
    s: &[f64],
    tc: f64,
    t10: f64,
    r1: f64,
    n0: usize,
) -> Result<Vec<f64>, SignalError> {
    check_relaxivity(r1)?;
    if !(tc > 0.0) {
        return Err(invalid("TC", tc));
    }
    let sb = baseline(s, n0)?;
    let r10 = 1.0 / t10;
    let s0 = sb / (1.0 - (-tc * r10).exp());
    Ok(s.iter()
        .map(|&x| {
            let m = 1.0 - x / s0;
            let rate = if m.is_finite() && m > 0.0 && m <= 1.0 {
                -m.ln() / tc
            } else {
                0.0
            };
            (rate - r10) / r1
        })
        .collect())
}

/// Concentration from a signal proportional to R1.
pub fn conc_lin(s: &[f64], t10: f64, r1: f64, n0: usize) -> Result<Vec<f64>, SignalError> {
    check_relaxivity(r1)?;
    let sb = baseline(s, n0)?;
    let r10 = 1.0 / t10;
    Ok(s.iter().map(|&x| (r10 * x / sb - r10) / r1).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sig::{signal_free, signal_ss};
    use approx::assert_relative_eq;

    #[test]
    fn ss_inverts_forward_model() {
        let (tr, fa, t10, r1) = (0.005, 15.0, 1.4, 4.5);
        let c = [0.0, 0.0, 0.5, 2.0, 1.0];
        let s: Vec<f64> = c
            .iter()
            .map(|&ci| signal_ss(3.0, 1.0 / t10 + r1 * ci, tr, fa, None))
            .collect();
        let est = conc_ss(&s, tr, fa, t10, r1, 2).unwrap();
        for (a, b) in c.iter().zip(est.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn src_inverts_forward_model() {
        let (tc, t10, r1) = (0.3, 1.2, 5.0);
        let c = [0.0, 0.3, 1.5];
        let s: Vec<f64> = c
            .iter()
            .map(|&ci| signal_free(2.0, 1.0 / t10 + r1 * ci, tc, 90.0, None))
            .collect();
        let est = conc_src(&s, tc, t10, r1, 1).unwrap();
        for (a, b) in c.iter().zip(est.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn baseline_longer_than_signal_is_rejected() {
        assert!(conc_lin(&[1.0, 2.0], 1.0, 1.0, 3).is_err());
        assert!(conc_lin(&[1.0, 2.0], 1.0, 1.0, 0).is_err());
    }

    #[test]
    fn relax_is_linear() {
        assert_eq!(relax(&[0.0, 2.0], 1.0, 0.5), vec![1.0, 2.0]);
    }
}
