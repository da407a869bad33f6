//! Tissue fed by a known arterial input
//!
//! The kinetic model gives the indicator amounts in the blood and the
//! interstitium. With fast water exchange everywhere (`FF`) the tissue
//! relaxes as a single compartment. Otherwise blood, interstitium and cells
//! are separate water compartments, merged where exchange is fast, and the
//! signal comes from the multi-compartment spoiled gradient echo model.

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{derived, parameter, sampled, signal_scale, Model, Parametrized, Sequence, Spec};
use crate::error::DcmriError;
use crate::fit::{Parameter, Parameters};
use crate::pk::{conc_2cx, conc_comp};
use crate::sig::{MultiCompartment, WaterExchange};
use crate::tools::{check_grid, check_len, trapz};

const FP: Spec = ("Fp", "Plasma flow", "mL/sec/cm3");
const VP: Spec = ("vp", "Plasma volume", "mL/cm3");
const PS: Spec = ("PS", "Permeability-surface area product", "mL/sec/cm3");
const VE: Spec = ("ve", "Extravascular extracellular volume", "mL/cm3");
const V: Spec = ("v", "Extracellular volume", "mL/cm3");
const KTRANS: Spec = ("Ktrans", "Volume transfer constant", "mL/sec/cm3");
const PSE: Spec = ("PSe", "Transendothelial water permeability", "mL/sec/cm3");
const PSC: Spec = ("PSc", "Transcytolemmal water permeability", "mL/sec/cm3");

const FB: Spec = ("Fb", "Blood flow", "mL/sec/cm3");
const VB: Spec = ("vb", "Blood volume", "mL/cm3");
const E: Spec = ("E", "Extraction fraction", "");
const TP: Spec = ("Tp", "Plasma mean transit time", "sec");
const TE: Spec = ("Te", "Extravascular transit time", "sec");
const T: Spec = ("T", "Extracellular mean transit time", "sec");

// ============================================================================
// Configuration Types
// ============================================================================

/// Kinetic model of the indicator in the tissue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kinetics {
    /// Uptake without outflow
    U,
    /// Plasma compartment without exchange
    NX,
    /// Fast exchange between plasma and interstitium
    FX,
    /// Weakly vascularized (Tofts)
    WV,
    /// High-flow uptake (Patlak)
    HFU,
    /// High flow (extended Tofts)
    HF,
    /// Two-compartment uptake
    #[serde(rename = "2CU")]
    TwoCU,
    /// Two-compartment exchange
    #[serde(rename = "2CX")]
    TwoCX,
}

impl Kinetics {
    pub const ALL: [Kinetics; 8] = [
        Kinetics::U,
        Kinetics::NX,
        Kinetics::FX,
        Kinetics::WV,
        Kinetics::HFU,
        Kinetics::HF,
        Kinetics::TwoCU,
        Kinetics::TwoCX,
    ];

    /// Whether blood and interstitium are resolved separately
    pub fn resolves_interstitium(&self) -> bool {
        matches!(self, Kinetics::TwoCX | Kinetics::HF | Kinetics::WV)
    }
}

impl fmt::Display for Kinetics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kinetics::U => "U",
            Kinetics::NX => "NX",
            Kinetics::FX => "FX",
            Kinetics::WV => "WV",
            Kinetics::HFU => "HFU",
            Kinetics::HF => "HF",
            Kinetics::TwoCU => "2CU",
            Kinetics::TwoCX => "2CX",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Kinetics {
    type Err = DcmriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kinetics::ALL
            .into_iter()
            .find(|k| k.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| DcmriError::Unsupported {
                model: "Tissue".to_string(),
                reason: format!("unknown kinetics '{s}'"),
            })
    }
}

/// Water exchange across one barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    Fast,
    /// Finite, with a fitted permeability
    Restricted,
    None,
}

impl Exchange {
    fn letter(self) -> char {
        match self {
            Exchange::Fast => 'F',
            Exchange::Restricted => 'R',
            Exchange::None => 'N',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'F' => Some(Exchange::Fast),
            'R' => Some(Exchange::Restricted),
            'N' => Some(Exchange::None),
            _ => None,
        }
    }
}

/// Water exchange across the endothelium and the cell membrane, written
/// as two letters such as `FF` or `RN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WaterExchangeRegime {
    /// Blood and interstitium
    pub blood: Exchange,
    /// Interstitium and cells
    pub cells: Exchange,
}

impl WaterExchangeRegime {
    pub const FAST: WaterExchangeRegime = WaterExchangeRegime {
        blood: Exchange::Fast,
        cells: Exchange::Fast,
    };

    pub fn is_fast(&self) -> bool {
        *self == Self::FAST
    }
}

impl Default for WaterExchangeRegime {
    fn default() -> Self {
        Self::FAST
    }
}

impl fmt::Display for WaterExchangeRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.blood.letter(), self.cells.letter())
    }
}

impl FromStr for WaterExchangeRegime {
    type Err = DcmriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let letters: Vec<Exchange> = s.chars().filter_map(Exchange::from_letter).collect();
        match letters.as_slice() {
            [blood, cells] if s.chars().count() == 2 => Ok(Self {
                blood: *blood,
                cells: *cells,
            }),
            _ => Err(DcmriError::Unsupported {
                model: "Tissue".to_string(),
                reason: format!("water exchange '{s}' is not two of F, R, N"),
            }),
        }
    }
}

impl TryFrom<String> for WaterExchangeRegime {
    type Error = DcmriError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WaterExchangeRegime> for String {
    fn from(w: WaterExchangeRegime) -> Self {
        w.to_string()
    }
}

/// Settings of a [`Tissue`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TissueOptions {
    pub kinetics: Kinetics,
    pub water_exchange: WaterExchangeRegime,
    pub sequence: Sequence,
    /// Hematocrit
    pub hct: f64,
    /// Relaxivity in Hz/mM
    pub r1: f64,
    /// Precontrast R1 in Hz
    pub r10: f64,
    /// Number of precontrast samples
    pub n0: usize,
    /// Duration of one acquisition in sec
    pub sample_duration: f64,
}

impl Default for TissueOptions {
    fn default() -> Self {
        Self {
            kinetics: Kinetics::HF,
            water_exchange: WaterExchangeRegime::FAST,
            sequence: Sequence::default(),
            hct: 0.45,
            r1: 5.0,
            r10: 1.0,
            n0: 1,
            sample_duration: 0.0,
        }
    }
}

impl TissueOptions {
    pub fn new(kinetics: Kinetics) -> Self {
        Self {
            kinetics,
            ..Default::default()
        }
    }

    pub fn with_water_exchange(mut self, regime: WaterExchangeRegime) -> Self {
        self.water_exchange = regime;
        self
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_hct(mut self, hct: f64) -> Self {
        self.hct = hct;
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
}

// ============================================================================
// Model
// ============================================================================

/// Tissue with an arterial input function
#[derive(Debug, Clone)]
pub struct Tissue {
    options: TissueOptions,
    time: Vec<f64>,
    /// Arterial plasma concentration in mM
    ca: Vec<f64>,
    params: Parameters,
}

fn ratio(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        if a == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        a / b
    }
}

fn scaled(f: &[f64], k: f64) -> Vec<f64> {
    f.iter().map(|x| k * x).collect()
}

fn unsupported(reason: String) -> DcmriError {
    DcmriError::Unsupported {
        model: "Tissue".to_string(),
        reason,
    }
}

impl Tissue {
    /// Tissue fed by `aif`, the arterial blood concentration (mM) on the
    /// time grid `time`.
    pub fn new(options: TissueOptions, time: &[f64], aif: &[f64]) -> Result<Self, DcmriError> {
        check_grid(time)?;
        check_len(aif, time)?;
        options.sequence.validate()?;
        if !(0.0..1.0).contains(&options.hct) {
            return Err(DcmriError::InvalidState(format!(
                "hematocrit {} outside [0, 1)",
                options.hct
            )));
        }
        let regime = options.water_exchange;
        if !regime.is_fast() {
            if !options.kinetics.resolves_interstitium() {
                return Err(unsupported(format!(
                    "water exchange {regime} requires 2CX, HF or WV kinetics, not {}",
                    options.kinetics
                )));
            }
            if options.sequence == Sequence::Linear {
                return Err(unsupported(format!(
                    "water exchange {regime} needs a magnetization model"
                )));
            }
        }
        let ca = scaled(aif, 1.0 / (1.0 - options.hct));
        let params = Self::default_parameters(&options);
        Ok(Self {
            options,
            time: time.to_vec(),
            ca,
            params,
        })
    }

    fn default_parameters(options: &TissueOptions) -> Parameters {
        let unbounded = (0.0, f64::INFINITY);
        let fraction = (0.0, 1.0);
        let mut params = Parameters::new().with(signal_scale());
        let kinetic = match options.kinetics {
            Kinetics::U => vec![parameter(FP, 0.01, unbounded)],
            Kinetics::NX => vec![parameter(FP, 0.01, unbounded), parameter(VP, 0.05, fraction)],
            Kinetics::FX => vec![parameter(FP, 0.01, unbounded), parameter(V, 0.3, fraction)],
            Kinetics::WV => vec![parameter(KTRANS, 0.003, unbounded), parameter(VE, 0.2, fraction)],
            Kinetics::HFU => vec![parameter(VP, 0.05, fraction), parameter(KTRANS, 0.003, unbounded)],
            Kinetics::HF => vec![
                parameter(VP, 0.05, fraction),
                parameter(KTRANS, 0.003, unbounded),
                parameter(VE, 0.2, fraction),
            ],
            Kinetics::TwoCU => vec![
                parameter(FP, 0.01, unbounded),
                parameter(VP, 0.05, fraction),
                parameter(PS, 0.003, unbounded),
            ],
            Kinetics::TwoCX => vec![
                parameter(FP, 0.01, unbounded),
                parameter(VP, 0.05, fraction),
                parameter(PS, 0.003, unbounded),
                parameter(VE, 0.2, fraction),
            ],
        };
        for p in kinetic {
            params.push(p);
        }
        let regime = options.water_exchange;
        let has_blood = options.kinetics != Kinetics::WV;
        if has_blood && regime.blood == Exchange::Restricted {
            params.push(parameter(PSE, 0.05, unbounded));
        }
        if regime.cells == Exchange::Restricted {
            params.push(parameter(PSC, 0.03, unbounded));
        }
        params
    }

    pub fn options(&self) -> &TissueOptions {
        &self.options
    }

    /// Time grid of the arterial input
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Indicator amounts per tissue volume in the blood and the
    /// interstitium, on the input time grid
    fn amounts(&self, params: &Parameters) -> Result<(Vec<f64>, Vec<f64>), DcmriError> {
        let (t, ca) = (self.time.as_slice(), self.ca.as_slice());
        let zeros = || vec![0.0; t.len()];
        let p = |s: &str| params.value(s);
        Ok(match self.options.kinetics {
            Kinetics::U => (scaled(&trapz(ca, t)?, p("Fp")?), zeros()),
            Kinetics::NX => {
                let (fp, vp) = (p("Fp")?, p("vp")?);
                (conc_comp(&scaled(ca, fp), ratio(vp, fp), t)?, zeros())
            }
            Kinetics::FX => {
                let (fp, v) = (p("Fp")?, p("v")?);
                (conc_comp(&scaled(ca, fp), ratio(v, fp), t)?, zeros())
            }
            Kinetics::WV => {
                let (ktrans, ve) = (p("Ktrans")?, p("ve")?);
                (zeros(), conc_comp(&scaled(ca, ktrans), ratio(ve, ktrans), t)?)
            }
            Kinetics::HFU => {
                let (vp, ktrans) = (p("vp")?, p("Ktrans")?);
                (scaled(ca, vp), scaled(&trapz(ca, t)?, ktrans))
            }
            Kinetics::HF => {
                let (vp, ktrans, ve) = (p("vp")?, p("Ktrans")?, p("ve")?);
                (
                    scaled(ca, vp),
                    conc_comp(&scaled(ca, ktrans), ratio(ve, ktrans), t)?,
                )
            }
            Kinetics::TwoCU => {
                let (fp, vp, ps) = (p("Fp")?, p("vp")?, p("PS")?);
                if fp + ps == 0.0 {
                    return Ok((zeros(), zeros()));
                }
                let nb = conc_comp(&scaled(ca, fp), vp / (fp + ps), t)?;
                let cp = if vp > 0.0 {
                    scaled(&nb, 1.0 / vp)
                } else {
                    scaled(ca, fp / (fp + ps))
                };
                (nb, scaled(&trapz(&cp, t)?, ps))
            }
            Kinetics::TwoCX => {
                let (fp, vp, ps, ve) = (p("Fp")?, p("vp")?, p("PS")?, p("ve")?);
                if fp + ps == 0.0 {
                    return Ok((zeros(), zeros()));
                }
                let j = scaled(ca, fp);
                let zero = zeros();
                let tc = [vp / (fp + ps), ratio(ve, ps)];
                let e = [[fp / (fp + ps), 1.0], [ps / (fp + ps), 0.0]];
                let [nb, ne] = conc_2cx([&j, &zero], tc, e, t)?;
                (nb, ne)
            }
        })
    }

    /// Tissue concentration in mM on the input time grid
    pub fn conc(&self) -> Result<Vec<f64>, DcmriError> {
        let (nb, ne) = self.amounts(&self.params)?;
        Ok(nb.iter().zip(&ne).map(|(b, e)| b + e).collect())
    }

    /// Blood volume fraction for the compartment model
    fn blood_volume(&self, params: &Parameters) -> Result<f64, DcmriError> {
        match self.options.kinetics {
            Kinetics::WV => Ok(0.0),
            _ => Ok(params.value("vp")? / (1.0 - self.options.hct)),
        }
    }

    fn exchange_flow(
        &self,
        params: &Parameters,
        exchange: Exchange,
        symbol: &str,
    ) -> Result<f64, DcmriError> {
        match exchange {
            Exchange::Restricted => Ok(params.value(symbol)?),
            Exchange::None => Ok(0.0),
            Exchange::Fast => Ok(f64::INFINITY),
        }
    }

    fn multi_compartment_signal(
        &self,
        params: &Parameters,
        time: &[f64],
        nb: &[f64],
        ne: &[f64],
    ) -> Result<Vec<f64>, DcmriError> {
        let o = &self.options;
        let vb = self.blood_volume(params)?;
        let ve = params.value("ve")?;
        let vc = 1.0 - vb - ve;
        if vc < 0.0 {
            return Err(DcmriError::InvalidState(format!(
                "blood and interstitial volumes add up to {}",
                vb + ve
            )));
        }
        let nt = time.len();
        let volumes = [vb, ve, vc];
        let amounts = [
            sampled(time, &self.time, nb, o.sample_duration)?,
            sampled(time, &self.time, ne, o.sample_duration)?,
            vec![0.0; nt],
        ];
        // water flows between blood-interstitium and interstitium-cells
        let fbe = self.exchange_flow(params, o.water_exchange.blood, "PSe")?;
        let fec = self.exchange_flow(params, o.water_exchange.cells, "PSc")?;
        let flow = |i: usize, k: usize| match (i.min(k), i.max(k)) {
            (0, 1) => fbe,
            (1, 2) => fec,
            _ => 0.0,
        };

        let groups: Vec<Vec<usize>> = match (o.water_exchange.blood, o.water_exchange.cells) {
            (Exchange::Fast, _) => vec![vec![0, 1], vec![2]],
            (_, Exchange::Fast) => vec![vec![0], vec![1, 2]],
            _ => vec![vec![0], vec![1], vec![2]],
        };
        let groups: Vec<Vec<usize>> = groups
            .into_iter()
            .filter(|g| g.iter().map(|&i| volumes[i]).sum::<f64>() > 0.0)
            .collect();
        let v: Vec<f64> = groups
            .iter()
            .map(|g| g.iter().map(|&i| volumes[i]).sum())
            .collect();
        let r1 = Array2::from_shape_fn((groups.len(), nt), |(g, k)| {
            let n: f64 = groups[g].iter().map(|&i| amounts[i][k]).sum();
            o.r10 + o.r1 * n / v[g]
        });
        let s0 = params.value("S0")?;
        if groups.len() == 1 {
            return Ok(o.sequence.signals(s0, &r1.row(0).to_vec()));
        }
        let fw = DMatrix::from_fn(groups.len(), groups.len(), |a, b| {
            if a == b {
                return 0.0;
            }
            groups[a]
                .iter()
                .flat_map(|&i| groups[b].iter().map(move |&k| (i, k)))
                .map(|(i, k)| flow(i, k))
                .sum()
        });
        let tissue = MultiCompartment::new(v, r1).with_exchange(WaterExchange::Flows(fw));
        Ok(o.sequence.signals_multi(s0, &tissue)?.to_vec())
    }
}

impl Parametrized for Tissue {
    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn derived(&self) -> Result<Vec<Parameter>, DcmriError> {
        let p = |s: &str| self.params.value(s);
        let hct = self.options.hct;
        Ok(match self.options.kinetics {
            Kinetics::U => vec![derived(FB, p("Fp")? / (1.0 - hct))],
            Kinetics::NX => {
                let (fp, vp) = (p("Fp")?, p("vp")?);
                vec![
                    derived(FB, fp / (1.0 - hct)),
                    derived(VB, vp / (1.0 - hct)),
                    derived(TP, ratio(vp, fp)),
                ]
            }
            Kinetics::FX => {
                let (fp, v) = (p("Fp")?, p("v")?);
                vec![derived(FB, fp / (1.0 - hct)), derived(T, ratio(v, fp))]
            }
            Kinetics::WV => vec![derived(TE, ratio(p("ve")?, p("Ktrans")?))],
            Kinetics::HFU => vec![derived(VB, p("vp")? / (1.0 - hct))],
            Kinetics::HF => {
                let (vp, ktrans, ve) = (p("vp")?, p("Ktrans")?, p("ve")?);
                vec![
                    derived(VB, vp / (1.0 - hct)),
                    derived(V, vp + ve),
                    derived(TE, ratio(ve, ktrans)),
                ]
            }
            Kinetics::TwoCU | Kinetics::TwoCX => {
                let (fp, vp, ps) = (p("Fp")?, p("vp")?, p("PS")?);
                let mut d = vec![
                    derived(FB, fp / (1.0 - hct)),
                    derived(VB, vp / (1.0 - hct)),
                    derived(KTRANS, ratio(fp * ps, fp + ps)),
                    derived(E, ratio(ps, fp + ps)),
                    derived(TP, ratio(vp, fp + ps)),
                ];
                if self.options.kinetics == Kinetics::TwoCX {
                    let ve = p("ve")?;
                    d.push(derived(V, vp + ve));
                    d.push(derived(TE, ratio(ve, ps)));
                }
                d
            }
        })
    }
}

impl Model for Tissue {
    fn simulate(&self, params: &Parameters, time: &[f64]) -> Result<Vec<f64>, DcmriError> {
        let (nb, ne) = self.amounts(params)?;
        let o = &self.options;
        if o.water_exchange.is_fast() {
            let c: Vec<f64> = nb.iter().zip(&ne).map(|(b, e)| b + e).collect();
            let c = sampled(time, &self.time, &c, o.sample_duration)?;
            let r1: Vec<f64> = c.iter().map(|x| o.r10 + o.r1 * x).collect();
            return Ok(o.sequence.signals(params.value("S0")?, &r1));
        }
        self.multi_compartment_signal(params, time, &nb, &ne)
    }

    fn baseline(&self) -> usize {
        self.options.n0
    }
}
