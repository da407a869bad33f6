//! Two compartments exchanging indicator
//!
//! The amounts `N = (N0, N1)` obey `dN/dt = -K N + J` with the rate matrix
//!
//! ```text
//! K[i][i] = 1/T[i]
//! K[j][i] = -E[j][i]/T[i]     (j != i)
//! ```
//!
//! `T[i]` is the mean transit time of compartment `i` and `E[j][i]` the
//! fraction of its outflow that goes to compartment `j`. The diagonal
//! `E[i][i]` is the fraction that leaves the system. `T[i] = inf` blocks all
//! outflow from compartment `i`.

use nalgebra::Matrix2;

use crate::tools::{check_grid, check_len, expconv, trapz, ToolsError};

fn rate_matrix(tc: [f64; 2], e: [[f64; 2]; 2]) -> Result<Matrix2<f64>, ToolsError> {
    for (i, &ti) in tc.iter().enumerate() {
        if ti.is_nan() || ti <= 0.0 {
            return Err(ToolsError::InvalidArgument {
                param: format!("T[{i}]"),
                value: ti,
            });
        }
    }
    for (i, row) in e.iter().enumerate() {
        for (j, &eij) in row.iter().enumerate() {
            if eij.is_nan() || !(0.0..=1.0).contains(&eij) {
                return Err(ToolsError::InvalidArgument {
                    param: format!("E[{i}][{j}]"),
                    value: eij,
                });
            }
        }
    }
    let k = |i: usize| 1.0 / tc[i];
    Ok(Matrix2::new(
        k(0),
        -e[0][1] * k(1),
        -e[1][0] * k(0),
        k(1),
    ))
}

/// `exp(-λ t) ⊛ J`, with `λ = 0` a plain integral.
fn decay(j: &[f64], lambda: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    if lambda <= 1e-15 {
        return trapz(j, t);
    }
    let tc = 1.0 / lambda;
    Ok(expconv(j, tc, t)?.into_iter().map(|x| tc * x).collect())
}

/// Amounts in a two-compartment exchange system.
///
/// # Arguments
///
/// * `j` - Influx into each compartment
/// * `tc` - Mean transit time of each compartment
/// * `e` - Extraction fractions, see the module documentation
/// * `t` - Time grid
pub fn conc_2cx(
    j: [&[f64]; 2],
    tc: [f64; 2],
    e: [[f64; 2]; 2],
    t: &[f64],
) -> Result<[Vec<f64>; 2], ToolsError> {
    check_grid(t)?;
    check_len(j[0], t)?;
    check_len(j[1], t)?;
    let k = rate_matrix(tc, e)?;

    let half_trace = 0.5 * k.trace();
    let disc = (half_trace * half_trace - k.determinant()).max(0.0);
    let root = disc.sqrt();
    let (l1, l2) = (half_trace + root, half_trace - root);
    let n = t.len();

    if root <= 1e-9 * half_trace.abs() {
        // Degenerate spectrum: exp(-Kt) = exp(-λt)(I - (K - λI)t)
        let lambda = half_trace;
        let m = k - Matrix2::identity() * lambda;
        let mut out = [vec![0.0; n], vec![0.0; n]];
        for src in 0..2 {
            let d1 = decay(j[src], lambda, t)?;
            let d2 = decay(&d1, lambda, t)?;
            for dst in 0..2 {
                let diag = if dst == src { 1.0 } else { 0.0 };
                for i in 0..n {
                    out[dst][i] += diag * d1[i] - m[(dst, src)] * d2[i];
                }
            }
        }
        return Ok(out);
    }

    let p1 = (k - Matrix2::identity() * l2) / (l1 - l2);
    let p2 = (k - Matrix2::identity() * l1) / (l2 - l1);
    let mut out = [vec![0.0; n], vec![0.0; n]];
    for src in 0..2 {
        let d1 = decay(j[src], l1, t)?;
        let d2 = decay(j[src], l2, t)?;
        for dst in 0..2 {
            for i in 0..n {
                out[dst][i] += p1[(dst, src)] * d1[i] + p2[(dst, src)] * d2[i];
            }
        }
    }
    Ok(out)
}

/// Outflux to outside the system from each compartment of [`conc_2cx`].
pub fn flux_2cx(
    j: [&[f64]; 2],
    tc: [f64; 2],
    e: [[f64; 2]; 2],
    t: &[f64],
) -> Result<[Vec<f64>; 2], ToolsError> {
    let [n0, n1] = conc_2cx(j, tc, e, t)?;
    let out = |n: Vec<f64>, i: usize| -> Vec<f64> {
        let rate = e[i][i] / tc[i];
        n.into_iter().map(|x| rate * x).collect()
    };
    Ok([out(n0, 0), out(n1, 1)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pk::conc_comp;
    use approx::assert_relative_eq;

    fn grid(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    fn bolus(t: &[f64]) -> Vec<f64> {
        t.iter()
            .map(|&x| if (2.0..6.0).contains(&x) { 0.5 } else { 0.0 })
            .collect()
    }

    #[test]
    fn uncoupled_compartments_match_single_compartments() {
        let t = grid(601, 0.5);
        let j0 = bolus(&t);
        let j1: Vec<f64> = j0.iter().map(|x| 2.0 * x).collect();
        let e = [[1.0, 0.0], [0.0, 1.0]];
        let [c0, c1] = conc_2cx([&j0, &j1], [5.0, 20.0], e, &t).unwrap();
        let r0 = conc_comp(&j0, 5.0, &t).unwrap();
        let r1 = conc_comp(&j1, 20.0, &t).unwrap();
        for i in 0..t.len() {
            assert_relative_eq!(c0[i], r0[i], epsilon = 1e-9);
            assert_relative_eq!(c1[i], r1[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn exchange_conserves_mass() {
        let t = grid(2001, 0.25);
        let j0 = bolus(&t);
        let zero = vec![0.0; t.len()];
        let tc = [4.0, 30.0];
        let e = [[0.7, 1.0], [0.3, 0.0]];
        let [c0, c1] = conc_2cx([&j0, &zero], tc, e, &t).unwrap();
        let [f0, f1] = flux_2cx([&j0, &zero], tc, e, &t).unwrap();
        assert!(f1.iter().all(|&x| x == 0.0));
        let injected = trapz(&j0, &t).unwrap();
        let released = trapz(&f0, &t).unwrap();
        for i in (0..t.len()).step_by(100) {
            assert_relative_eq!(c0[i] + c1[i] + released[i], injected[i], epsilon = 1e-2);
        }
    }

    #[test]
    fn degenerate_spectrum_is_continuous() {
        let t = grid(401, 0.5);
        let j0 = bolus(&t);
        let zero = vec![0.0; t.len()];
        let e = [[1.0, 0.0], [0.0, 1.0]];
        let [a, _] = conc_2cx([&j0, &zero], [10.0, 10.0], e, &t).unwrap();
        let [b, _] = conc_2cx([&j0, &zero], [10.0, 10.0 + 1e-6], e, &t).unwrap();
        for i in 0..t.len() {
            assert_relative_eq!(a[i], b[i], epsilon = 1e-5);
        }
    }
}
