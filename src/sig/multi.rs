//! Spoiled gradient echo signals of tissues made of several water compartments
//!
//! Between pulses the longitudinal magnetization `M` (per unit tissue volume,
//! equilibrium `v_i` in compartment `i`) obeys the linear system
//!
//! ```text
//! dM/dt = -A M + b
//! A[i][i] = R1[i] + (sum_{k != i} Fw[k][i] + Fw[i][i]) / v[i]
//! A[i][k] = -Fw[i][k] / v[k]
//! b[i]    = R1[i] v[i] + j[i]
//! ```
//!
//! where `Fw[i][k]` is the water flow from compartment `k` into `i`,
//! `Fw[i][i]` the water outflow from `i` and `j[i]` the inflow of fresh
//! magnetization. Relaxation over an interval is evaluated with the matrix
//! exponential of the augmented system, so singular `A` needs no special
//! treatment.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1};

use super::{invalid, pulses, SignalError};

/// Water exchange between the compartments of a tissue
#[derive(Debug, Clone, PartialEq)]
pub enum WaterExchange {
    /// Compartments relax independently
    None,
    /// Water mixes instantly; the tissue behaves as a single compartment
    Fast,
    /// Water flows in mL/sec/cm3, see the module documentation
    Flows(DMatrix<f64>),
}

impl WaterExchange {
    /// Same water flow between every pair of compartments.
    ///
    /// `0` means no exchange and `inf` fast exchange.
    pub fn uniform(fw: f64, ncomp: usize) -> Result<Self, SignalError> {
        if fw.is_nan() || fw < 0.0 {
            return Err(invalid("Fw", fw));
        }
        if fw == 0.0 {
            return Ok(WaterExchange::None);
        }
        if fw.is_infinite() {
            return Ok(WaterExchange::Fast);
        }
        let flows = DMatrix::from_fn(ncomp, ncomp, |i, k| if i == k { 0.0 } else { fw });
        Ok(WaterExchange::Flows(flows))
    }
}

enum Regime {
    Independent,
    Fast { outflow: f64 },
    Coupled(DMatrix<f64>),
}

/// Description of a multi-compartment tissue for the signal models
#[derive(Debug, Clone)]
pub struct MultiCompartment {
    v: Vec<f64>,
    r1: Array2<f64>,
    exchange: WaterExchange,
    inflow: Option<Array2<f64>>,
    r10: Option<Vec<f64>>,
}

impl MultiCompartment {
    /// Compartments with volume fractions `v` and relaxation rates `r1`.
    ///
    /// `r1` has one row per compartment and one column per time point.
    pub fn new(v: Vec<f64>, r1: Array2<f64>) -> Self {
        Self {
            v,
            r1,
            exchange: WaterExchange::None,
            inflow: None,
            r10: None,
        }
    }

    /// Compartments with time-independent relaxation rates
    pub fn constant(v: Vec<f64>, r1: &[f64]) -> Self {
        let r1 = Array2::from_shape_fn((r1.len(), 1), |(i, _)| r1[i]);
        Self::new(v, r1)
    }

    pub fn with_exchange(mut self, exchange: WaterExchange) -> Self {
        self.exchange = exchange;
        self
    }

    /// Inflow of fresh magnetization, same shape as `r1`
    pub fn with_inflow(mut self, j: Array2<f64>) -> Self {
        self.inflow = Some(j);
        self
    }

    /// Relaxation rates at which the signal equals `S0`
    pub fn with_reference(mut self, r10: Vec<f64>) -> Self {
        self.r10 = Some(r10);
        self
    }

    pub fn ncomp(&self) -> usize {
        self.v.len()
    }

    pub fn ntimes(&self) -> usize {
        self.r1.ncols()
    }

    fn validate(&self) -> Result<Regime, SignalError> {
        let nc = self.v.len();
        if nc == 0 {
            return Err(SignalError::ShapeMismatch {
                what: "v".to_string(),
                expected: "at least one compartment".to_string(),
                found: "0".to_string(),
            });
        }
        if let Some(&bad) = self.v.iter().find(|x| !x.is_finite() || **x < 0.0) {
            return Err(invalid("v", bad));
        }
        if self.r1.nrows() != nc || self.r1.ncols() == 0 {
            return Err(SignalError::ShapeMismatch {
                what: "R1".to_string(),
                expected: format!("{nc} rows"),
                found: format!("{:?}", self.r1.shape()),
            });
        }
        if let Some(j) = &self.inflow {
            if j.shape() != self.r1.shape() {
                return Err(SignalError::ShapeMismatch {
                    what: "j".to_string(),
                    expected: format!("{:?}", self.r1.shape()),
                    found: format!("{:?}", j.shape()),
                });
            }
        }
        if let Some(r10) = &self.r10 {
            if r10.len() != nc {
                return Err(SignalError::ShapeMismatch {
                    what: "R10".to_string(),
                    expected: format!("{nc} values"),
                    found: format!("{}", r10.len()),
                });
            }
        }
        match &self.exchange {
            WaterExchange::None => Ok(Regime::Independent),
            WaterExchange::Fast => Ok(Regime::Fast { outflow: 0.0 }),
            WaterExchange::Flows(fw) => {
                if fw.nrows() != nc || fw.ncols() != nc {
                    return Err(SignalError::ShapeMismatch {
                        what: "Fw".to_string(),
                        expected: format!("({nc}, {nc})"),
                        found: format!("({}, {})", fw.nrows(), fw.ncols()),
                    });
                }
                if let Some(&bad) = fw.iter().find(|x| x.is_nan() || **x < 0.0) {
                    return Err(invalid("Fw", bad));
                }
                let outflow: f64 = fw.diagonal().iter().sum();
                if !outflow.is_finite() {
                    return Err(invalid("Fw", outflow));
                }
                let offdiag = nc * (nc - 1);
                let infinite = (0..nc)
                    .flat_map(|i| (0..nc).map(move |k| (i, k)))
                    .filter(|&(i, k)| i != k && fw[(i, k)].is_infinite())
                    .count();
                if infinite > 0 && infinite < offdiag {
                    return Err(SignalError::MixedExchange);
                }
                if infinite > 0 {
                    return Ok(Regime::Fast { outflow });
                }
                if let Some(&bad) = self.v.iter().find(|x| **x == 0.0) {
                    return Err(invalid("v", bad));
                }
                Ok(Regime::Coupled(fw.clone()))
            }
        }
    }

    /// Per-compartment system matrix and source for one time point
    fn system(
        &self,
        regime: &Regime,
        r1: ArrayView1<f64>,
        j: Option<ArrayView1<f64>>,
    ) -> (DMatrix<f64>, DVector<f64>, DVector<f64>) {
        let nc = self.v.len();
        let jv = |i: usize| j.map_or(0.0, |j| j[i]);
        match regime {
            Regime::Independent => {
                let a = DMatrix::from_fn(nc, nc, |i, k| if i == k { r1[i] } else { 0.0 });
                let b = DVector::from_fn(nc, |i, _| r1[i] * self.v[i] + jv(i));
                (a, b, DVector::from_column_slice(&self.v))
            }
            Regime::Fast { outflow } => {
                let volume: f64 = self.v.iter().sum();
                let relax: f64 = (0..nc).map(|i| self.v[i] * r1[i]).sum();
                let inflow: f64 = (0..nc).map(jv).sum();
                let a = DMatrix::from_element(1, 1, (relax + outflow) / volume);
                let b = DVector::from_element(1, relax + inflow);
                (a, b, DVector::from_element(1, volume))
            }
            Regime::Coupled(fw) => {
                let a = DMatrix::from_fn(nc, nc, |i, k| {
                    if i == k {
                        let out: f64 = (0..nc).filter(|&m| m != i).map(|m| fw[(m, i)]).sum();
                        r1[i] + (out + fw[(i, i)]) / self.v[i]
                    } else {
                        -fw[(i, k)] / self.v[k]
                    }
                });
                let b = DVector::from_fn(nc, |i, _| r1[i] * self.v[i] + jv(i));
                (a, b, DVector::from_column_slice(&self.v))
            }
        }
    }
}

/// Free relaxation over `tau`: `M(tau) = E M(0) + c`
fn relaxation(a: &DMatrix<f64>, b: &DVector<f64>, tau: f64) -> (DMatrix<f64>, DVector<f64>) {
    let n = a.nrows();
    let mut aug = DMatrix::zeros(n + 1, n + 1);
    aug.view_mut((0, 0), (n, n)).copy_from(&(-a * tau));
    aug.view_mut((0, n), (n, 1)).copy_from(&(b * tau));
    let ex = aug.exp();
    let e = ex.view((0, 0), (n, n)).into_owned();
    let c = ex.view((0, n), (n, 1)).into_owned();
    (e, DVector::from_column_slice(c.as_slice()))
}

fn steady_state(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    tr: f64,
    cos: f64,
) -> Result<DVector<f64>, SignalError> {
    let (e, c) = relaxation(a, b, tr);
    let n = a.nrows();
    let lhs = DMatrix::identity(n, n) - e * cos;
    lhs.lu()
        .solve(&c)
        .ok_or_else(|| SignalError::Singular("steady state".to_string()))
}

fn pulse_train(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    relaxed: &DVector<f64>,
    n: u32,
    tr: f64,
    cos: f64,
    tp: Option<f64>,
) -> DVector<f64> {
    let mut m = match tp {
        None => relaxed.clone(),
        Some(tp) => relaxation(a, b, tp).1,
    };
    let (e, c) = relaxation(a, b, tr);
    for _ in 0..n {
        m = &e * (m * cos) + &c;
    }
    m
}

fn calibrated(
    tissue: &MultiCompartment,
    regime: &Regime,
    raw: Array1<f64>,
    signal: impl Fn(&DMatrix<f64>, &DVector<f64>, &DVector<f64>) -> Result<f64, SignalError>,
) -> Result<Array1<f64>, SignalError> {
    let Some(r10) = &tissue.r10 else {
        return Ok(raw);
    };
    let r10 = Array1::from_vec(r10.clone());
    let j0 = tissue.inflow.as_ref().map(|j| j.column(0));
    let (a, b, relaxed) = tissue.system(regime, r10.view(), j0);
    let reference = signal(&a, &b, &relaxed)?;
    if reference == 0.0 {
        return Ok(Array1::zeros(raw.len()));
    }
    Ok(raw / reference)
}

/// Steady-state spoiled gradient echo signal of a multi-compartment tissue.
///
/// Returns one signal value per column of the relaxation rates.
///
/// # Errors
///
/// Fails when the dimensions of `v`, `R1`, `j`, `R10` and the exchange
/// matrix disagree, or when the exchange mixes finite and infinite flows.
pub fn signal_ss_multi(
    s0: f64,
    tissue: &MultiCompartment,
    tr: f64,
    fa: f64,
) -> Result<Array1<f64>, SignalError> {
    let regime = tissue.validate()?;
    let (sin, cos) = fa.to_radians().sin_cos();
    let nt = tissue.ntimes();
    if sin == 0.0 {
        return Ok(Array1::zeros(nt));
    }
    let signal = |a: &DMatrix<f64>, b: &DVector<f64>, _: &DVector<f64>| {
        steady_state(a, b, tr, cos).map(|m| sin * m.sum())
    };
    let mut raw = Array1::zeros(nt);
    for k in 0..nt {
        let j = tissue.inflow.as_ref().map(|j| j.column(k));
        let (a, b, relaxed) = tissue.system(&regime, tissue.r1.column(k), j);
        raw[k] = signal(&a, &b, &relaxed)?;
    }
    Ok(calibrated(tissue, &regime, raw, signal)? * s0)
}

/// Spoiled gradient echo of a multi-compartment tissue read out `TC/TR`
/// pulses into the train, optionally after a saturation `TP` earlier.
pub fn signal_spgr_multi(
    s0: f64,
    tissue: &MultiCompartment,
    tc: f64,
    tr: f64,
    fa: f64,
    tp: Option<f64>,
) -> Result<Array1<f64>, SignalError> {
    let regime = tissue.validate()?;
    let (sin, cos) = fa.to_radians().sin_cos();
    let nt = tissue.ntimes();
    if sin == 0.0 {
        return Ok(Array1::zeros(nt));
    }
    let n = pulses(tc, tr);
    let signal = |a: &DMatrix<f64>, b: &DVector<f64>, relaxed: &DVector<f64>| {
        Ok::<f64, SignalError>(sin * pulse_train(a, b, relaxed, n, tr, cos, tp).sum())
    };
    let mut raw = Array1::zeros(nt);
    for k in 0..nt {
        let j = tissue.inflow.as_ref().map(|j| j.column(k));
        let (a, b, relaxed) = tissue.system(&regime, tissue.r1.column(k), j);
        raw[k] = signal(&a, &b, &relaxed)?;
    }
    Ok(calibrated(tissue, &regime, raw, signal)? * s0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sig::{signal_spgr, signal_ss};
    use approx::assert_relative_eq;

    #[test]
    fn fast_exchange_equals_single_compartment_with_mean_r1() {
        let tissue = MultiCompartment::constant(vec![0.3, 0.7], &[2.0, 0.5])
            .with_exchange(WaterExchange::Fast);
        let s = signal_ss_multi(1.0, &tissue, 0.005, 15.0).unwrap();
        let r1 = 0.3 * 2.0 + 0.7 * 0.5;
        assert_relative_eq!(s[0], signal_ss(1.0, r1, 0.005, 15.0, None), epsilon = 1e-12);
    }

    #[test]
    fn no_exchange_sums_compartments() {
        let tissue = MultiCompartment::constant(vec![0.3, 0.7], &[2.0, 0.5]);
        let s = signal_ss_multi(1.0, &tissue, 0.005, 15.0).unwrap();
        let expected = 0.3 * signal_ss(1.0, 2.0, 0.005, 15.0, None)
            + 0.7 * signal_ss(1.0, 0.5, 0.005, 15.0, None);
        assert_relative_eq!(s[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn spgr_single_compartment_matches_scalar_model() {
        let tissue = MultiCompartment::constant(vec![1.0], &[1.2]);
        for tp in [None, Some(0.3)] {
            let s = signal_spgr_multi(1.0, &tissue, 0.1, 0.004, 10.0, tp).unwrap();
            let e = signal_spgr(1.0, 1.2, 0.1, 0.004, 10.0, tp, None);
            assert_relative_eq!(s[0], e, epsilon = 1e-10);
        }
    }

    #[test]
    fn restricted_exchange_lies_between_limits() {
        let v = vec![0.2, 0.8];
        let r1 = [5.0, 0.8];
        let tr = 0.005;
        let fa = 20.0;
        let none = signal_ss_multi(1.0, &MultiCompartment::constant(v.clone(), &r1), tr, fa)
            .unwrap()[0];
        let fast = signal_ss_multi(
            1.0,
            &MultiCompartment::constant(v.clone(), &r1).with_exchange(WaterExchange::Fast),
            tr,
            fa,
        )
        .unwrap()[0];
        let exchange = WaterExchange::uniform(1.0, 2).unwrap();
        let mid = signal_ss_multi(
            1.0,
            &MultiCompartment::constant(v, &r1).with_exchange(exchange),
            tr,
            fa,
        )
        .unwrap()[0];
        assert!(mid > none.min(fast) && mid < none.max(fast));
    }
}
