use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::sig::{
    invalid, signal_free, signal_lin, signal_spgr, signal_spgr_multi, signal_ss,
    signal_ss_multi, MultiCompartment, SignalError,
};

/// MR acquisition used to read out a relaxation rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Sequence {
    /// Steady-state spoiled gradient echo
    SteadyState { tr: f64, fa: f64 },
    /// Single readout at delay `tc` after a saturation pulse
    SaturationRecovery { tc: f64, fa: f64 },
    /// Spoiled gradient echo read `tc/tr` pulses into the train, after an
    /// optional saturation `tp` earlier
    Spgr {
        tr: f64,
        fa: f64,
        tc: f64,
        tp: Option<f64>,
    },
    /// Signal proportional to R1
    Linear,
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::SteadyState { tr: 0.005, fa: 15.0 }
    }
}

impl Sequence {
    pub fn validate(&self) -> Result<(), SignalError> {
        match *self {
            Sequence::SteadyState { tr, .. } if !(tr > 0.0) => Err(invalid("TR", tr)),
            Sequence::SaturationRecovery { tc, .. } if tc.is_nan() || tc < 0.0 => {
                Err(invalid("TC", tc))
            }
            Sequence::Spgr { tr, .. } if !(tr > 0.0) => Err(invalid("TR", tr)),
            Sequence::Spgr { tc, .. } if tc.is_nan() || tc < 0.0 => Err(invalid("TC", tc)),
            _ => Ok(()),
        }
    }

    /// Signal of a tissue with relaxation rate `r1`, scaled by `s0`
    pub fn signal(&self, s0: f64, r1: f64) -> f64 {
        match *self {
            Sequence::SteadyState { tr, fa } => signal_ss(s0, r1, tr, fa, None),
            Sequence::SaturationRecovery { tc, fa } => signal_free(s0, r1, tc, fa, None),
            Sequence::Spgr { tr, fa, tc, tp } => signal_spgr(s0, r1, tc, tr, fa, tp, None),
            Sequence::Linear => signal_lin(r1, s0, None),
        }
    }

    pub fn signals(&self, s0: f64, r1: &[f64]) -> Vec<f64> {
        r1.iter().map(|&r| self.signal(s0, r)).collect()
    }

    /// Signal of a tissue with several water compartments
    pub fn signals_multi(
        &self,
        s0: f64,
        tissue: &MultiCompartment,
    ) -> Result<Array1<f64>, SignalError> {
        match *self {
            Sequence::SteadyState { tr, fa } => signal_ss_multi(s0, tissue, tr, fa),
            // a single pulse after the saturation delay
            Sequence::SaturationRecovery { tc, fa } => {
                signal_spgr_multi(s0, tissue, 0.0, 1.0, fa, Some(tc))
            }
            Sequence::Spgr { tr, fa, tc, tp } => signal_spgr_multi(s0, tissue, tc, tr, fa, tp),
            Sequence::Linear => Err(SignalError::ShapeMismatch {
                what: "sequence".to_string(),
                expected: "a sequence with a magnetization model".to_string(),
                found: "Linear".to_string(),
            }),
        }
    }
}
