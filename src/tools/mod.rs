//! Operations on functions sampled on a time grid
//!
//! Every function here treats its input as piecewise linear between the
//! samples. Grids must be strictly increasing but need not be uniform.
//!
//! # Convolution kernels
//!
//! | Function | Kernel |
//! |----------|--------|
//! | [`expconv`] | `exp(-t/T)/T` |
//! | [`biexpconv`] | `exp(-t/T1)/T1 * exp(-t/T2)/T2` |
//! | [`nexpconv`] | gamma variate, `n` identical exponentials |
//! | [`stepconv`] | box on `[T(1-D), T(1+D)]` |
//! | [`conv`] | any sampled kernel |

use statrs::function::gamma::ln_gamma;
use thiserror::Error;

/// Errors raised by the sampled-function utilities
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolsError {
    /// Function and time grid differ in length
    #[error("Length mismatch: expected {expected} samples, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    /// The time grid has no samples
    #[error("Time grid is empty")]
    EmptyGrid,

    /// The time grid must be strictly increasing
    #[error("Time grid is not increasing at index {index}")]
    NonIncreasing { index: usize },

    /// Argument outside its domain
    #[error("Invalid argument: {param} = {value}")]
    InvalidArgument { param: String, value: f64 },
}

pub(crate) fn check_grid(t: &[f64]) -> Result<(), ToolsError> {
    if t.is_empty() {
        return Err(ToolsError::EmptyGrid);
    }
    if let Some(i) = t.windows(2).position(|w| w[1] <= w[0] || w[1].is_nan()) {
        return Err(ToolsError::NonIncreasing { index: i + 1 });
    }
    Ok(())
}

pub(crate) fn check_len(f: &[f64], t: &[f64]) -> Result<(), ToolsError> {
    if f.len() != t.len() {
        return Err(ToolsError::LengthMismatch {
            expected: t.len(),
            found: f.len(),
        });
    }
    Ok(())
}

fn invalid(param: &str, value: f64) -> ToolsError {
    ToolsError::InvalidArgument {
        param: param.to_string(),
        value,
    }
}

/// Uniform grid from `start` to at least `stop` with step `dt`
pub fn uniform_grid(start: f64, stop: f64, dt: f64) -> Result<Vec<f64>, ToolsError> {
    if !(dt > 0.0) || !dt.is_finite() {
        return Err(invalid("dt", dt));
    }
    if !(stop >= start) {
        return Err(invalid("stop", stop));
    }
    let n = ((stop - start) / dt).ceil() as usize + 1;
    Ok((0..n).map(|i| start + i as f64 * dt).collect())
}

/// Cumulative trapezoidal integral of `f`, starting at zero.
///
/// # Examples
///
/// ```rust
/// use dcmri::tools::trapz;
///
/// let t = vec![0.0, 1.0, 3.0];
/// let f = vec![2.0, 2.0, 2.0];
/// let area = trapz(&f, &t).unwrap();
/// assert_eq!(area, vec![0.0, 2.0, 6.0]);
/// ```
pub fn trapz(f: &[f64], t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    check_len(f, t)?;
    let mut out = Vec::with_capacity(t.len());
    let mut acc = 0.0;
    out.push(acc);
    for i in 1..t.len() {
        acc += 0.5 * (f[i] + f[i - 1]) * (t[i] - t[i - 1]);
        out.push(acc);
    }
    Ok(out)
}

/// Linear interpolation at a single point, clamped to the end values.
///
/// `xp` must be increasing and as long as `fp`; callers validate.
pub(crate) fn interp1(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len();
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    // first index with xp[i] > x, guaranteed in 1..n
    let i = xp.partition_point(|&v| v <= x);
    let w = (x - xp[i - 1]) / (xp[i] - xp[i - 1]);
    fp[i - 1] + w * (fp[i] - fp[i - 1])
}

/// Linear interpolation of `(xp, fp)` at the points `x`.
///
/// Points outside the range of `xp` take the nearest end value.
pub fn interp(x: &[f64], xp: &[f64], fp: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(xp)?;
    check_len(fp, xp)?;
    Ok(x.iter().map(|&xi| interp1(xi, xp, fp)).collect())
}

/// Convolve `f` with the normalized exponential `exp(-t/T)/T`.
///
/// The result is exact for piecewise-linear `f`. `T = 0` returns `f`
/// unchanged and `T = inf` returns zeros.
pub fn expconv(f: &[f64], tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    check_len(f, t)?;
    if tc.is_nan() || tc < 0.0 {
        return Err(invalid("T", tc));
    }
    if tc == 0.0 {
        return Ok(f.to_vec());
    }
    if tc.is_infinite() {
        return Ok(vec![0.0; t.len()]);
    }
    let mut g = vec![0.0; t.len()];
    for i in 0..t.len() - 1 {
        let x = (t[i + 1] - t[i]) / tc;
        let e = (-x).exp();
        let e0 = -(-x).exp_m1();
        let e1 = x - e0;
        let df = (f[i + 1] - f[i]) / x;
        g[i + 1] = e * g[i] + f[i] * e0 + df * e1;
    }
    Ok(g)
}

/// Convolution of two normalized exponentials with time constants `T1` and `T2`.
pub fn biexpconv(t1: f64, t2: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    if !(t1 > 0.0) || !t1.is_finite() {
        return Err(invalid("T1", t1));
    }
    if !(t2 > 0.0) || !t2.is_finite() {
        return Err(invalid("T2", t2));
    }
    let t0 = t[0];
    if t1 == t2 {
        return Ok(t
            .iter()
            .map(|&ti| {
                let u = ti - t0;
                u * (-u / t1).exp() / (t1 * t1)
            })
            .collect());
    }
    Ok(t
        .iter()
        .map(|&ti| {
            let u = ti - t0;
            ((-u / t1).exp() - (-u / t2).exp()) / (t1 - t2)
        })
        .collect())
}

/// Convolution of `n` identical normalized exponentials with time constant `T`.
///
/// This is the gamma variate with shape `n` and scale `T`, so the mean is
/// `n T`. `n` may be any real number `>= 1`.
pub fn nexpconv(n: f64, tc: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    if !(n >= 1.0) || !n.is_finite() {
        return Err(invalid("n", n));
    }
    if !(tc > 0.0) || !tc.is_finite() {
        return Err(invalid("T", tc));
    }
    let t0 = t[0];
    let lg = ln_gamma(n);
    Ok(t
        .iter()
        .map(|&ti| {
            let u = (ti - t0) / tc;
            if u <= 0.0 {
                if n == 1.0 {
                    1.0 / tc
                } else {
                    0.0
                }
            } else {
                ((n - 1.0) * u.ln() - u - lg).exp() / tc
            }
        })
        .collect())
}

/// Convolve `f` with a normalized step kernel on `[T(1-D), T(1+D)]`.
///
/// `D = 0` is a pure delay of `f` by `T`; `f` is taken to be zero before
/// the start of the grid.
pub fn stepconv(f: &[f64], tc: f64, d: f64, t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    check_len(f, t)?;
    if tc.is_nan() || tc < 0.0 || tc.is_infinite() {
        return Err(invalid("T", tc));
    }
    if d.is_nan() || !(0.0..=1.0).contains(&d) {
        return Err(invalid("D", d));
    }
    let t0 = t[0];
    let tmin = tc * (1.0 - d);
    let tmax = tc * (1.0 + d);
    if tmax - tmin <= 0.0 {
        return Ok(t
            .iter()
            .map(|&ti| {
                let x = ti - tc;
                if x < t0 {
                    0.0
                } else {
                    interp1(x, t, f)
                }
            })
            .collect());
    }
    let area = trapz(f, t)?;
    let cumulative = |x: f64| if x <= t0 { 0.0 } else { interp1(x, t, &area) };
    Ok(t
        .iter()
        .map(|&ti| (cumulative(ti - tmin) - cumulative(ti - tmax)) / (tmax - tmin))
        .collect())
}

fn is_uniform(t: &[f64]) -> bool {
    if t.len() < 3 {
        return true;
    }
    let dt = t[1] - t[0];
    t.windows(2)
        .all(|w| ((w[1] - w[0]) - dt).abs() <= 1e-9 * dt.abs().max(1.0))
}

fn uconv(h: &[f64], f: &[f64], dt: f64) -> Vec<f64> {
    let n = f.len();
    let mut g = vec![0.0; n];
    // lags past the last nonzero kernel value contribute nothing
    let support = h.iter().rposition(|&x| x != 0.0).map_or(0, |i| i + 1);
    for k in 1..n {
        let mut acc = 0.0;
        for i in (k + 1).saturating_sub(support)..=k {
            acc += h[k - i] * f[i];
        }
        acc -= 0.5 * (h[k] * f[0] + h[0] * f[k]);
        g[k] = dt * acc;
    }
    g
}

/// Convolve two sampled functions on the grid `t`.
///
/// `h` is the kernel as a function of the lag `t - t[0]`. Uniform grids are
/// integrated directly with the trapezoid rule. Other grids are resampled
/// onto a uniform grid with the smallest spacing of `t` first.
pub fn conv(h: &[f64], f: &[f64], t: &[f64]) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    check_len(h, t)?;
    check_len(f, t)?;
    if t.len() == 1 {
        return Ok(vec![0.0]);
    }
    if is_uniform(t) {
        return Ok(uconv(h, f, t[1] - t[0]));
    }
    let dt = t
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    let tu = uniform_grid(t[0], t[t.len() - 1], dt)?;
    let hu = interp(&tu, t, h)?;
    let fu = interp(&tu, t, f)?;
    let gu = uconv(&hu, &fu, dt);
    interp(t, &tu, &gu)
}

/// Sample `f` at the acquisition times `tp`.
///
/// With `dt > 0` each sample is the average of `f` over a window of
/// duration `dt` centred on the acquisition time, clipped to the grid.
pub fn sample(tp: &[f64], t: &[f64], f: &[f64], dt: f64) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    check_len(f, t)?;
    if dt.is_nan() || dt < 0.0 {
        return Err(invalid("dt", dt));
    }
    if dt == 0.0 {
        return interp(tp, t, f);
    }
    let area = trapz(f, t)?;
    let (first, last) = (t[0], t[t.len() - 1]);
    Ok(tp
        .iter()
        .map(|&x| {
            let a = (x - 0.5 * dt).max(first);
            let b = (x + 0.5 * dt).min(last);
            if b <= a {
                interp1(x, t, f)
            } else {
                (interp1(b, t, &area) - interp1(a, t, &area)) / (b - a)
            }
        })
        .collect())
}

/// Flux (mmol/sec) of a contrast agent injected at constant rate.
///
/// # Arguments
///
/// * `weight` - Body weight in kg
/// * `conc` - Stock concentration of the agent in M (mmol/mL)
/// * `dose` - Injected volume in mL/kg
/// * `rate` - Injection rate in mL/sec
/// * `start` - Start of the injection in sec
///
/// Each sample holds the flux averaged over its surrounding half-intervals,
/// so the trapezoid integral of the result equals the injected amount
/// whenever the injection lies inside the grid.
pub fn inj_step(
    t: &[f64],
    weight: f64,
    conc: f64,
    dose: f64,
    rate: f64,
    start: f64,
) -> Result<Vec<f64>, ToolsError> {
    check_grid(t)?;
    if !(rate > 0.0) {
        return Err(invalid("rate", rate));
    }
    for (param, value) in [("weight", weight), ("conc", conc), ("dose", dose)] {
        if value.is_nan() || value < 0.0 {
            return Err(invalid(param, value));
        }
    }
    let duration = weight * dose / rate;
    let flux = conc * rate;
    let stop = start + duration;
    let n = t.len();
    if n == 1 || duration == 0.0 {
        return Ok(vec![0.0; n]);
    }
    Ok((0..n)
        .map(|i| {
            let lo = if i == 0 { t[0] } else { 0.5 * (t[i - 1] + t[i]) };
            let hi = if i == n - 1 {
                t[n - 1]
            } else {
                0.5 * (t[i] + t[i + 1])
            };
            let overlap = (hi.min(stop) - lo.max(start)).max(0.0);
            flux * overlap / (hi - lo)
        })
        .collect())
}
