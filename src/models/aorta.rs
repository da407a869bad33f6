//! Whole-body circulation seen from the aorta
//!
//! The injected flux enters the heart-lung system, modelled as a chain with
//! mean transit `Thl` and dispersion `Dhl`. A fraction `Eb` of the aortic
//! outflux is extracted by the body; the rest passes through the organs and
//! returns to the heart. The recirculation loop is solved pass by pass
//! until the returning indicator is negligible.

use serde::{Deserialize, Serialize};

use super::{
    derived, parameter, sampled, signal_scale, simulation_grid, Model, Parametrized, Sequence,
    Spec,
};
use crate::error::DcmriError;
use crate::fit::{Parameter, Parameters};
use crate::pk::{flux_2cx, flux_chain, flux_comp, prop_chain};
use crate::tools::{conv, inj_step, trapz, ToolsError};

const BAT: Spec = ("BAT", "Bolus arrival time", "sec");
const CO: Spec = ("CO", "Cardiac output", "mL/sec");
const THL: Spec = ("Thl", "Heart-lung mean transit time", "sec");
const DHL: Spec = ("Dhl", "Heart-lung transit time dispersion", "");
const TO: Spec = ("To", "Organs mean transit time", "sec");
const EB: Spec = ("Eb", "Body extraction fraction", "");
const TX: Spec = ("Tx", "Organs extravascular mean transit time", "sec");
const EO: Spec = ("Eo", "Organs extraction fraction", "");

const CL: Spec = ("CL", "Whole-body clearance", "mL/sec");
const TC: Spec = ("Tc", "Mean circulation time", "sec");

/// Passes through the circulation before giving up on convergence
const MAX_PASSES: usize = 1000;

// ============================================================================
// Configuration Types
// ============================================================================

/// Model of the systemic organs between aorta and heart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Organs {
    /// One compartment with transit time `To`
    #[default]
    #[serde(rename = "comp")]
    Comp,
    /// Blood (`To`) exchanging with an extravascular space (`Tx`, `Eo`)
    #[serde(rename = "2cx")]
    TwoCX,
}

/// Bolus injection at constant rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Injection {
    /// Body weight in kg
    pub weight: f64,
    /// Stock concentration in M (mmol/mL)
    pub conc: f64,
    /// Injected volume in mL/kg
    pub dose: f64,
    /// Injection rate in mL/sec
    pub rate: f64,
}

impl Default for Injection {
    fn default() -> Self {
        Self {
            weight: 70.0,
            conc: 0.5,
            dose: 0.2,
            rate: 2.0,
        }
    }
}

impl Injection {
    /// Injected flux in mmol/sec for an injection starting at `start`
    pub fn flux(&self, t: &[f64], start: f64) -> Result<Vec<f64>, ToolsError> {
        inj_step(t, self.weight, self.conc, self.dose, self.rate, start)
    }

    pub fn with_dose(mut self, dose: f64) -> Self {
        self.dose = dose;
        self
    }
}

/// Settings of an [`Aorta`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AortaOptions {
    pub organs: Organs,
    pub injection: Injection,
    pub sequence: Sequence,
    /// Blood relaxivity in Hz/mM
    pub r1: f64,
    /// Precontrast R1 of blood in Hz
    pub r10: f64,
    /// Number of precontrast samples
    pub n0: usize,
    /// Duration of one acquisition in sec
    pub sample_duration: f64,
    /// Step of the simulation grid in sec
    pub resolution: f64,
    /// Fraction of the injected amount still recirculating that ends the
    /// recirculation passes
    pub tolerance: f64,
}

impl Default for AortaOptions {
    fn default() -> Self {
        Self {
            organs: Organs::Comp,
            injection: Injection::default(),
            sequence: Sequence::default(),
            r1: 5.0,
            r10: 1.0 / 1.6,
            n0: 1,
            sample_duration: 0.0,
            resolution: 0.5,
            tolerance: 1e-3,
        }
    }
}

impl AortaOptions {
    pub fn new(organs: Organs) -> Self {
        Self {
            organs,
            ..Default::default()
        }
    }

    pub fn with_injection(mut self, injection: Injection) -> Self {
        self.injection = injection;
        self
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_relaxivity(mut self, r1: f64) -> Self {
        self.r1 = r1;
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

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

// ============================================================================
// Circulation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum OrganKinetics {
    Comp,
    TwoCX { te: f64, eo: f64 },
}

/// Parameters of the recirculation loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Circulation {
    co: f64,
    thl: f64,
    dhl: f64,
    to: f64,
    eb: f64,
    organs: OrganKinetics,
}

impl Circulation {
    pub(crate) fn from_params(params: &Parameters, organs: Organs) -> Result<Self, DcmriError> {
        let organs = match organs {
            Organs::Comp => OrganKinetics::Comp,
            Organs::TwoCX => OrganKinetics::TwoCX {
                te: params.value("Tx")?,
                eo: params.value("Eo")?,
            },
        };
        Ok(Self {
            co: params.value("CO")?,
            thl: params.value("Thl")?,
            dhl: params.value("Dhl")?,
            to: params.value("To")?,
            eb: params.value("Eb")?,
            organs,
        })
    }

    fn organ_outflux(&self, j: &[f64], t: &[f64]) -> Result<Vec<f64>, DcmriError> {
        match self.organs {
            OrganKinetics::Comp => Ok(flux_comp(j, self.to, t)?),
            OrganKinetics::TwoCX { te, eo } => {
                let zero = vec![0.0; t.len()];
                let e = [[1.0 - eo, 1.0], [eo, 0.0]];
                let [venous, _] = flux_2cx([j, &zero], [self.to, te], e, t)?;
                Ok(venous)
            }
        }
    }

    /// Aortic flux of one pass through the heart and lungs
    fn heart_lung(
        &self,
        kernel: Option<&[f64]>,
        j: &[f64],
        t: &[f64],
    ) -> Result<Vec<f64>, DcmriError> {
        match kernel {
            Some(h) => Ok(conv(h, j, t)?),
            None => Ok(flux_chain(j, self.thl, self.dhl, t)?),
        }
    }

    /// Blood concentration in the aorta (mM) for an injected flux `j`
    /// (mmol/sec).
    ///
    /// Each pass propagates the venous return of the previous one. Passes
    /// stop once the indicator returning within the time window falls below
    /// `tolerance` times the injected amount.
    pub(crate) fn aorta_conc(
        &self,
        j: &[f64],
        t: &[f64],
        tolerance: f64,
    ) -> Result<Vec<f64>, DcmriError> {
        if !(self.co > 0.0) {
            return Err(DcmriError::InvalidState(format!(
                "cardiac output {} must be positive",
                self.co
            )));
        }
        if !(0.0..=1.0).contains(&self.eb) {
            return Err(DcmriError::InvalidState(format!(
                "body extraction {} outside [0, 1]",
                self.eb
            )));
        }
        // the general chain kernel is reused across passes
        let general = self.dhl > 0.0 && self.dhl < 1.0 && self.thl > 0.0;
        let kernel = if general && self.thl.is_finite() {
            Some(truncated(prop_chain(self.thl, self.dhl, t)?))
        } else {
            None
        };
        let injected = trapz(j, t)?.last().copied().unwrap_or(0.0);
        let mut aorta = vec![0.0; t.len()];
        let mut inflow = j.to_vec();
        let mut converged = false;
        for pass in 0..MAX_PASSES {
            let outflow = self.heart_lung(kernel.as_deref(), &inflow, t)?;
            for (a, x) in aorta.iter_mut().zip(&outflow) {
                *a += x;
            }
            let organ_in: Vec<f64> = outflow.iter().map(|x| (1.0 - self.eb) * x).collect();
            inflow = self.organ_outflux(&organ_in, t)?;
            let returned = trapz(&inflow, t)?.last().copied().unwrap_or(0.0);
            if returned <= tolerance * injected {
                tracing::debug!(passes = pass + 1, "Recirculation converged");
                converged = true;
                break;
            }
        }
        if !converged {
            tracing::warn!(
                passes = MAX_PASSES,
                "Recirculation did not converge, Thl = {}, To = {}",
                self.thl,
                self.to
            );
        }
        // mmol/sec over mL/sec is M
        Ok(aorta.into_iter().map(|x| 1000.0 * x / self.co).collect())
    }
}

/// Zero the tail of a unimodal kernel once it drops below a negligible
/// fraction of its peak.
fn truncated(mut h: Vec<f64>) -> Vec<f64> {
    let (peak_index, peak) = h
        .iter()
        .copied()
        .enumerate()
        .fold((0, 0.0), |best, (i, x)| if x > best.1 { (i, x) } else { best });
    if let Some(end) = h[peak_index..].iter().position(|&x| x < 1e-12 * peak) {
        h[peak_index + end..].iter_mut().for_each(|x| *x = 0.0);
    }
    h
}

// ============================================================================
// Model
// ============================================================================

/// Signal of blood in the aorta after a bolus injection
#[derive(Debug, Clone)]
pub struct Aorta {
    options: AortaOptions,
    params: Parameters,
}

pub(crate) fn circulation_parameters(organs: Organs) -> Vec<Parameter> {
    let unbounded = (0.0, f64::INFINITY);
    let mut params = vec![
        parameter(BAT, 30.0, unbounded),
        parameter(CO, 100.0, unbounded),
        parameter(THL, 10.0, (0.0, 30.0)),
        parameter(DHL, 0.2, (0.05, 0.95)),
        parameter(TO, 20.0, (0.0, 60.0)),
        parameter(EB, 0.05, (0.01, 0.15)),
    ];
    if organs == Organs::TwoCX {
        params.push(parameter(TX, 120.0, (0.0, 800.0)));
        params.push(parameter(EO, 0.15, (0.0, 0.5)));
    }
    params
}

pub(crate) fn circulation_derived(params: &Parameters) -> Result<Vec<Parameter>, DcmriError> {
    let (co, eb) = (params.value("CO")?, params.value("Eb")?);
    let (thl, to) = (params.value("Thl")?, params.value("To")?);
    Ok(vec![derived(CL, eb * co), derived(TC, thl + to)])
}

impl Aorta {
    pub fn new(options: AortaOptions) -> Result<Self, DcmriError> {
        options.sequence.validate()?;
        if !(options.resolution > 0.0) {
            return Err(DcmriError::InvalidState(format!(
                "resolution {} must be positive",
                options.resolution
            )));
        }
        let mut params = Parameters::new().with(signal_scale());
        for p in circulation_parameters(options.organs) {
            params.push(p);
        }
        Ok(Self { options, params })
    }

    pub fn options(&self) -> &AortaOptions {
        &self.options
    }

    fn simulate_conc(&self, params: &Parameters, time: &[f64]) -> Result<Vec<f64>, DcmriError> {
        let o = &self.options;
        let grid = simulation_grid(&[time], o.resolution)?;
        let j = o.injection.flux(&grid, params.value("BAT")?)?;
        let circulation = Circulation::from_params(params, o.organs)?;
        let c = circulation.aorta_conc(&j, &grid, o.tolerance)?;
        sampled(time, &grid, &c, o.sample_duration)
    }

    /// Blood concentration (mM) at `time` for the current parameters
    pub fn conc(&self, time: &[f64]) -> Result<Vec<f64>, DcmriError> {
        self.simulate_conc(&self.params, time)
    }
}

impl Parametrized for Aorta {
    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn derived(&self) -> Result<Vec<Parameter>, DcmriError> {
        circulation_derived(&self.params)
    }
}

impl Model for Aorta {
    fn simulate(&self, params: &Parameters, time: &[f64]) -> Result<Vec<f64>, DcmriError> {
        let o = &self.options;
        let c = self.simulate_conc(params, time)?;
        let r1: Vec<f64> = c.iter().map(|x| o.r10 + o.r1 * x).collect();
        Ok(o.sequence.signals(params.value("S0")?, &r1))
    }

    fn baseline(&self) -> usize {
        self.options.n0
    }
}
