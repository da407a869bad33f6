//! Liver with hepatocellular uptake of the indicator
//!
//! The extracellular space (volume `ve`) is a chain with mean transit `Te`
//! and dispersion `De` fed by the arterial plasma. Hepatocytes take up
//! indicator from the extracellular space at rate `khe` and excrete it to
//! the bile with mean transit `Th`, so that `kbh = (1 - ve) / Th`. In the
//! non-stationary model `khe` and `Th` vary linearly over the acquisition.

use serde::{Deserialize, Serialize};

use super::{derived, parameter, sampled, signal_scale, Model, Parametrized, Sequence, Spec};
use crate::error::DcmriError;
use crate::fit::{Parameter, Parameters};
use crate::pk::{conc_comp, flux_chain};
use crate::tools::{check_grid, check_len};

const TE: Spec = ("Te", "Extracellular transit time", "sec");
const DE: Spec = ("De", "Extracellular dispersion", "");
const VE: Spec = ("ve", "Liver extracellular volume fraction", "mL/cm3");
const KHE: Spec = ("khe", "Intracellular uptake rate", "mL/sec/cm3");
const TH: Spec = ("Th", "Hepatocellular mean transit time", "sec");
const KHE_I: Spec = ("khe_i", "Intracellular uptake rate at the start", "mL/sec/cm3");
const KHE_F: Spec = ("khe_f", "Intracellular uptake rate at the end", "mL/sec/cm3");
const TH_I: Spec = ("Th_i", "Hepatocellular mean transit time at the start", "sec");
const TH_F: Spec = ("Th_f", "Hepatocellular mean transit time at the end", "sec");

const KBH: Spec = ("kbh", "Biliary excretion rate", "mL/sec/cm3");
const KBH_I: Spec = ("kbh_i", "Biliary excretion rate at the start", "mL/sec/cm3");
const KBH_F: Spec = ("kbh_f", "Biliary excretion rate at the end", "mL/sec/cm3");
const FE: Spec = ("Fe", "Extracellular flow", "mL/sec/cm3");
const KHE_AVG: Spec = ("khe", "Average intracellular uptake rate", "mL/sec/cm3");

/// Time dependence of the hepatocellular rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiverKinetics {
    #[default]
    Stationary,
    /// `khe` and `Th` change linearly between the first and last time point
    NonStationary,
}

/// Settings of a [`Liver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiverOptions {
    pub kinetics: LiverKinetics,
    pub sequence: Sequence,
    pub hct: f64,
    /// Extracellular relaxivity in Hz/mM
    pub r1: f64,
    /// Hepatocellular relaxivity in Hz/mM
    pub r1h: f64,
    /// Precontrast R1 in Hz
    pub r10: f64,
    pub n0: usize,
    pub sample_duration: f64,
}

impl Default for LiverOptions {
    fn default() -> Self {
        Self {
            kinetics: LiverKinetics::Stationary,
            sequence: Sequence::default(),
            hct: 0.45,
            r1: 6.4,
            r1h: 9.8,
            r10: 1.0 / 0.8,
            n0: 1,
            sample_duration: 0.0,
        }
    }
}

impl LiverOptions {
    pub fn new(kinetics: LiverKinetics) -> Self {
        Self {
            kinetics,
            ..Default::default()
        }
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_relaxivities(mut self, r1: f64, r1h: f64) -> Self {
        self.r1 = r1;
        self.r1h = r1h;
        self
    }

    pub fn with_r10(mut self, r10: f64) -> Self {
        self.r10 = r10;
        self
    }

    pub fn with_baseline(mut self, n0: usize) -> Self {
        self.n0 = n0;
        self
    }

    pub fn with_sample_duration(mut self, dt: f64) -> Self {
        self.sample_duration = dt;
        self
    }
}

// ============================================================================
// Hepatic kinetics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Uptake {
    Stationary { khe: f64, th: f64 },
    Linear { khe: [f64; 2], th: [f64; 2] },
}

/// Extracellular and hepatocellular kinetics
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Hepatic {
    te: f64,
    de: f64,
    ve: f64,
    uptake: Uptake,
}

impl Hepatic {
    pub(crate) fn from_params(
        params: &Parameters,
        kinetics: LiverKinetics,
    ) -> Result<Self, DcmriError> {
        let uptake = match kinetics {
            LiverKinetics::Stationary => Uptake::Stationary {
                khe: params.value("khe")?,
                th: params.value("Th")?,
            },
            LiverKinetics::NonStationary => Uptake::Linear {
                khe: [params.value("khe_i")?, params.value("khe_f")?],
                th: [params.value("Th_i")?, params.value("Th_f")?],
            },
        };
        Ok(Self {
            te: params.value("Te")?,
            de: params.value("De")?,
            ve: params.value("ve")?,
            uptake,
        })
    }

    /// Extracellular and hepatocellular amounts per tissue volume for the
    /// arterial plasma concentration `cp`
    pub(crate) fn amounts(
        &self,
        cp: &[f64],
        t: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>), DcmriError> {
        let ce = flux_chain(cp, self.te, self.de, t)?;
        let ne: Vec<f64> = ce.iter().map(|c| self.ve * c).collect();
        let nh = match self.uptake {
            Uptake::Stationary { khe, th } => {
                let j: Vec<f64> = ce.iter().map(|c| khe * c).collect();
                conc_comp(&j, th, t)?
            }
            Uptake::Linear { khe, th } => {
                let khe = ramp(khe, t);
                let th = ramp(th, t);
                if let Some(bad) = th.iter().find(|x| x.is_nan() || **x < 0.0) {
                    return Err(DcmriError::InvalidState(format!(
                        "negative hepatocellular transit time {bad}"
                    )));
                }
                let j: Vec<f64> = ce.iter().zip(&khe).map(|(c, k)| k * c).collect();
                comp_varying(&j, &th, t)
            }
        };
        Ok((ne, nh))
    }
}

/// Linear change from `values[0]` at the first time point to `values[1]`
/// at the last
fn ramp(values: [f64; 2], t: &[f64]) -> Vec<f64> {
    let (first, last) = (t[0], t[t.len() - 1]);
    if last == first {
        return vec![values[0]; t.len()];
    }
    t.iter()
        .map(|&x| values[0] + (values[1] - values[0]) * (x - first) / (last - first))
        .collect()
}

/// Compartment with a time-varying mean transit time.
///
/// Exact for piecewise-linear influx when the transit time is constant over
/// each interval; the interval midpoint is used otherwise.
fn comp_varying(j: &[f64], tc: &[f64], t: &[f64]) -> Vec<f64> {
    let mut n = vec![0.0; t.len()];
    for i in 0..t.len().saturating_sub(1) {
        let dt = t[i + 1] - t[i];
        let tau = 0.5 * (tc[i] + tc[i + 1]);
        n[i + 1] = if tau == 0.0 {
            0.0
        } else if tau.is_infinite() {
            n[i] + 0.5 * dt * (j[i] + j[i + 1])
        } else {
            let x = dt / tau;
            let e = (-x).exp();
            if x < 1e-6 {
                e * n[i] + 0.5 * dt * (j[i] + j[i + 1])
            } else {
                e * n[i] + tau * (j[i] * (1.0 - e) + (j[i + 1] - j[i]) * (1.0 - (1.0 - e) / x))
            }
        };
    }
    n
}

pub(crate) fn hepatic_parameters(kinetics: LiverKinetics) -> Vec<Parameter> {
    let mut params = vec![
        parameter(TE, 30.0, (0.0, 60.0)),
        parameter(DE, 0.85, (0.0, 1.0)),
        parameter(VE, 0.3, (0.01, 0.6)),
    ];
    match kinetics {
        LiverKinetics::Stationary => {
            params.push(parameter(KHE, 0.003, (0.0, 0.1)));
            params.push(parameter(TH, 1800.0, (600.0, 36000.0)));
        }
        LiverKinetics::NonStationary => {
            params.push(parameter(KHE_I, 0.003, (0.0, 0.1)));
            params.push(parameter(KHE_F, 0.003, (0.0, 0.1)));
            params.push(parameter(TH_I, 1800.0, (600.0, 36000.0)));
            params.push(parameter(TH_F, 1800.0, (600.0, 36000.0)));
        }
    }
    params
}

pub(crate) fn hepatic_derived(
    params: &Parameters,
    kinetics: LiverKinetics,
) -> Result<Vec<Parameter>, DcmriError> {
    let (te, ve) = (params.value("Te")?, params.value("ve")?);
    let fe = if te == 0.0 { f64::INFINITY } else { ve / te };
    let mut out = vec![derived(FE, fe)];
    match kinetics {
        LiverKinetics::Stationary => {
            out.push(derived(KBH, (1.0 - ve) / params.value("Th")?));
        }
        LiverKinetics::NonStationary => {
            let khe = 0.5 * (params.value("khe_i")? + params.value("khe_f")?);
            out.push(derived(KHE_AVG, khe));
            out.push(derived(KBH_I, (1.0 - ve) / params.value("Th_i")?));
            out.push(derived(KBH_F, (1.0 - ve) / params.value("Th_f")?));
        }
    }
    Ok(out)
}

/// R1 of liver tissue from extracellular and hepatocellular amounts
pub(crate) fn liver_relaxation(r10: f64, r1: f64, r1h: f64, ne: &[f64], nh: &[f64]) -> Vec<f64> {
    ne.iter()
        .zip(nh)
        .map(|(e, h)| r10 + r1 * e + r1h * h)
        .collect()
}

// ============================================================================
// Model
// ============================================================================

/// Liver signal for a known arterial input
#[derive(Debug, Clone)]
pub struct Liver {
    options: LiverOptions,
    time: Vec<f64>,
    cp: Vec<f64>,
    params: Parameters,
}

impl Liver {
    /// Liver fed by `aif`, the arterial blood concentration (mM) on `time`
    pub fn new(options: LiverOptions, time: &[f64], aif: &[f64]) -> Result<Self, DcmriError> {
        check_grid(time)?;
        check_len(aif, time)?;
        options.sequence.validate()?;
        if !(0.0..1.0).contains(&options.hct) {
            return Err(DcmriError::InvalidState(format!(
                "hematocrit {} outside [0, 1)",
                options.hct
            )));
        }
        let cp = aif.iter().map(|c| c / (1.0 - options.hct)).collect();
        let mut params = Parameters::new().with(signal_scale());
        for p in hepatic_parameters(options.kinetics) {
            params.push(p);
        }
        Ok(Self {
            options,
            time: time.to_vec(),
            cp,
            params,
        })
    }

    pub fn options(&self) -> &LiverOptions {
        &self.options
    }

    /// Extracellular and hepatocellular concentrations (mM per tissue
    /// volume) on the input time grid
    pub fn conc(&self) -> Result<(Vec<f64>, Vec<f64>), DcmriError> {
        Hepatic::from_params(&self.params, self.options.kinetics)?.amounts(&self.cp, &self.time)
    }
}

impl Parametrized for Liver {
    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn derived(&self) -> Result<Vec<Parameter>, DcmriError> {
        hepatic_derived(&self.params, self.options.kinetics)
    }
}

impl Model for Liver {
    fn simulate(&self, params: &Parameters, time: &[f64]) -> Result<Vec<f64>, DcmriError> {
        let o = &self.options;
        let hepatic = Hepatic::from_params(params, o.kinetics)?;
        let (ne, nh) = hepatic.amounts(&self.cp, &self.time)?;
        let ne = sampled(time, &self.time, &ne, o.sample_duration)?;
        let nh = sampled(time, &self.time, &nh, o.sample_duration)?;
        let r1 = liver_relaxation(o.r10, o.r1, o.r1h, &ne, &nh);
        Ok(o.sequence.signals(params.value("S0")?, &r1))
    }

    fn baseline(&self) -> usize {
        self.options.n0
    }
}
