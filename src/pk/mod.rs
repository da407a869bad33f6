//! Pharmacokinetic building blocks
//!
//! Each element describes how an indicator flux `J` (mmol/sec, or mM when
//! used as a normalized propagation of a concentration) entering a space is
//! retained and released. For every element four quantities are available:
//!
//! - `conc_*`: amount retained per unit volume at each time
//! - `flux_*`: outflux at each time
//! - `res_*`: residue function, fraction of a unit impulse still inside
//! - `prop_*`: propagator, the outflux produced by a unit impulse
//!
//! Time constants are mean transit times in sec. Kernels are functions of
//! the lag `t - t[0]`.

mod exchange;

pub use exchange::{conc_2cx, flux_2cx};

use crate::tools::{
    check_grid, check_len, conv, expconv, nexpconv, stepconv, trapz, ToolsError,
};

fn invalid(param: &str, value: f64) -> ToolsError {
    ToolsError::InvalidArgument {
        param: param.to_string(),
        value,
    }
}

/// Discrete unit impulse at lag `tau`, with unit trapezoid area.
fn dirac(t: &[f64], tau: f64) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    let n = t.len();
    let mut d = vec![0.0; n];
    if n < 2 {
        return Ok(d);
    }
    let t0 = t[0];
    let k = t.partition_point(|&x| x - t0 < tau);
    if k >= n {
        return Ok(d);
    }
    let width = if k == 0 {
        t[1] - t[0]
    } else if k == n - 1 {
        t[n - 1] - t[n - 2]
    } else {
        t[k + 1] - t[k - 1]
    };
    d[k] = 2.0 / width;
    Ok(d)
}

// ============================================================================
// Trap: no outflow
// ============================================================================

pub fn conc_trap(j: &[f64], t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    trapz(j, t)
}

pub fn flux_trap(j: &[f64]) -> Vec<f64> {
    vec![0.0; j.len()]
}

pub fn res_trap(t: &[f64]) -> Vec<f64> {
    vec![1.0; t.len()]
}

pub fn prop_trap(t: &[f64]) -> Vec<f64> {
    vec![0.0; t.len()]
}

// ============================================================================
// Pass: no retention
// ============================================================================

/// Amount in a space the indicator passes through instantly with transit `T`.
pub fn conc_pass(j: &[f64], tc: f64) -> Vec<f64> {
    j.iter().map(|x| tc * x).collect()
}

pub fn flux_pass(j: &[f64]) -> Vec<f64> {
    j.to_vec()
}

pub fn res_pass(tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    Ok(dirac(t, 0.0)?.into_iter().map(|x| tc * x).collect())
}

pub fn prop_pass(t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    dirac(t, 0.0)
}

// ============================================================================
// Comp: well-mixed compartment
// ============================================================================

fn check_transit(tc: f64) -> Result<(), ToolsError> {
    if tc.is_nan() || tc < 0.0 {
        return Err(invalid("T", tc));
    }
    Ok(())
}

/// Amount in a compartment with mean transit time `T`.
///
/// `T = inf` is a trap and `T = 0` a pass.
pub fn conc_comp(j: &[f64], tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_transit(tc)?;
    if tc.is_infinite() {
        return conc_trap(j, t);
    }
    if tc == 0.0 {
        check_len(j, t)?;
        return Ok(vec![0.0; t.len()]);
    }
    Ok(expconv(j, tc, t)?.into_iter().map(|x| tc * x).collect())
}

pub fn flux_comp(j: &[f64], tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_transit(tc)?;
    expconv(j, tc, t)
}

pub fn res_comp(tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    check_transit(tc)?;
    if tc == 0.0 {
        return res_pass(0.0, t);
    }
    let t0 = t[0];
    Ok(t.iter().map(|&x| (-(x - t0) / tc).exp()).collect())
}

pub fn prop_comp(tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    check_transit(tc)?;
    if tc == 0.0 {
        return prop_pass(t);
    }
    if tc.is_infinite() {
        return Ok(prop_trap(t));
    }
    let t0 = t[0];
    Ok(t.iter().map(|&x| (-(x - t0) / tc).exp() / tc).collect())
}

// ============================================================================
// Plug: pure delay
// ============================================================================

pub fn flux_plug(j: &[f64], tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_transit(tc)?;
    if tc.is_infinite() {
        check_len(j, t)?;
        return Ok(flux_trap(j));
    }
    stepconv(j, tc, 0.0, t)
}

pub fn conc_plug(j: &[f64], tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    let out = flux_plug(j, tc, t)?;
    let net: Vec<f64> = j.iter().zip(out.iter()).map(|(a, b)| a - b).collect();
    trapz(&net, t)
}

pub fn res_plug(tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    check_transit(tc)?;
    let t0 = t[0];
    Ok(t.iter()
        .map(|&x| if x - t0 < tc { 1.0 } else { 0.0 })
        .collect())
}

pub fn prop_plug(tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_transit(tc)?;
    dirac(t, tc)
}

// ============================================================================
// Chain: dispersed delay
// ============================================================================

fn check_dispersion(d: f64) -> Result<(), ToolsError> {
    if d.is_nan() || !(0.0..=1.0).contains(&d) {
        return Err(invalid("D", d));
    }
    Ok(())
}

/// Propagator of a chain with mean transit `T` and dispersion `D`.
///
/// The chain is a gamma variate of shape `1/D`: `D = 1` reduces to a
/// compartment and `D = 0` to a plug.
pub fn prop_chain(tc: f64, d: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_transit(tc)?;
    check_dispersion(d)?;
    if d == 0.0 {
        return prop_plug(tc, t);
    }
    if tc == 0.0 {
        return prop_pass(t);
    }
    if tc.is_infinite() {
        check_grid(t)?;
        return Ok(prop_trap(t));
    }
    let n = 1.0 / d;
    nexpconv(n, tc / n, t)
}

pub fn res_chain(tc: f64, d: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_dispersion(d)?;
    if d == 0.0 {
        return res_plug(tc, t);
    }
    let h = prop_chain(tc, d, t)?;
    Ok(trapz(&h, t)?.into_iter().map(|x| 1.0 - x).collect())
}

pub fn flux_chain(j: &[f64], tc: f64, d: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_transit(tc)?;
    check_dispersion(d)?;
    if d == 0.0 {
        return flux_plug(j, tc, t);
    }
    if d == 1.0 {
        return flux_comp(j, tc, t);
    }
    if tc == 0.0 {
        check_len(j, t)?;
        return Ok(flux_pass(j));
    }
    if tc.is_infinite() {
        check_len(j, t)?;
        return Ok(flux_trap(j));
    }
    let h = prop_chain(tc, d, t)?;
    conv(&h, j, t)
}

pub fn conc_chain(j: &[f64], tc: f64, d: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    let out = flux_chain(j, tc, d, t)?;
    let net: Vec<f64> = j.iter().zip(out.iter()).map(|(a, b)| a - b).collect();
    trapz(&net, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    fn bolus(t: &[f64]) -> Vec<f64> {
        t.iter()
            .map(|&x| if (5.0..10.0).contains(&x) { 1.0 } else { 0.0 })
            .collect()
    }

    fn last(v: &[f64]) -> f64 {
        v[v.len() - 1]
    }

    #[test]
    fn trap_retains_everything() {
        let t = grid(101, 0.5);
        let j = bolus(&t);
        let c = conc_trap(&j, &t).unwrap();
        assert_relative_eq!(last(&c), last(&trapz(&j, &t).unwrap()));
        assert!(flux_trap(&j).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn pass_impulses_have_unit_area() {
        let t = grid(20, 0.5);
        let p = prop_pass(&t).unwrap();
        assert_relative_eq!(last(&trapz(&p, &t).unwrap()), 1.0);
        let r = res_pass(3.0, &t).unwrap();
        assert_relative_eq!(last(&trapz(&r, &t).unwrap()), 3.0);
    }

    #[test]
    fn comp_conserves_mass() {
        let t = grid(1001, 0.2);
        let j = bolus(&t);
        let c = conc_comp(&j, 8.0, &t).unwrap();
        let out = flux_comp(&j, 8.0, &t).unwrap();
        let injected = trapz(&j, &t).unwrap();
        let released = trapz(&out, &t).unwrap();
        for i in (0..t.len()).step_by(50) {
            assert_relative_eq!(c[i] + released[i], injected[i], epsilon = 1e-2);
        }
    }

    #[test]
    fn comp_limits() {
        let t = grid(50, 1.0);
        let j = bolus(&t);
        assert_eq!(
            conc_comp(&j, f64::INFINITY, &t).unwrap(),
            conc_trap(&j, &t).unwrap()
        );
        assert!(conc_comp(&j, 0.0, &t).unwrap().iter().all(|&x| x == 0.0));
        assert!(conc_comp(&j, -2.0, &t).is_err());
    }

    #[test]
    fn plug_delays_outflux() {
        let t = grid(101, 0.5);
        let j = bolus(&t);
        let out = flux_plug(&j, 10.0, &t).unwrap();
        assert_eq!(out[20], 0.0);
        assert_relative_eq!(out[34], 1.0);
        let c = conc_plug(&j, 10.0, &t).unwrap();
        assert_relative_eq!(last(&c), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn chain_interpolates_between_plug_and_comp() {
        let t = grid(801, 0.25);
        let j = bolus(&t);
        let comp = flux_comp(&j, 10.0, &t).unwrap();
        let chain = flux_chain(&j, 10.0, 1.0, &t).unwrap();
        assert_eq!(comp, chain);

        let dispersed = flux_chain(&j, 10.0, 0.3, &t).unwrap();
        let area_in = last(&trapz(&j, &t).unwrap());
        let area_out = last(&trapz(&dispersed, &t).unwrap());
        assert_relative_eq!(area_in, area_out, epsilon = 2e-2);

        let r = res_chain(10.0, 0.3, &t).unwrap();
        assert_relative_eq!(r[0], 1.0);
        assert!(last(&r) < 1e-3);
    }
}
