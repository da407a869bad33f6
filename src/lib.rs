//! Tracer-kinetic modelling of dynamic contrast-enhanced MRI
//!
//! The crate is layered bottom-up:
//!
//! * [`tools`] integrates, interpolates and convolves sampled functions
//! * [`aif`] provides population arterial input functions
//! * [`pk`] builds compartmental kinetics from those tools
//! * [`sig`] turns relaxation rates into MR signals and back
//! * [`fit`] is a bounded nonlinear least-squares engine
//! * [`models`] combines all of the above into trainable tissue models
//!
//! [`data`] reads ROI curves and collects fitted parameters, [`synth`]
//! generates curves with known ground truth.

pub mod aif;
pub mod data;
pub mod error;
pub mod fit;
pub mod models;
pub mod pk;
pub mod sig;
pub mod synth;
pub mod tools;

pub use error::DcmriError;

/// Commonly used types and traits
pub mod prelude {
    pub use crate::aif::{aif_gamma, aif_parker};
    pub use crate::data::{read_curves, Curves, ParamTable};
    pub use crate::error::DcmriError;
    pub use crate::fit::{curve_fit, Metric, ParamRow, Parameters, TrainOptions};
    pub use crate::models::{
        Aorta, AortaLiver, AortaLiverOptions, AortaOptions, Kidney, KidneyKinetics,
        KidneyOptions, Kinetics, Liver, LiverKinetics, LiverOptions, Model, Parametrized, Scan,
        Sequence, Tissue, TissueArray, TissueOptions, WaterExchangeRegime,
    };
    pub use crate::synth::{fake_tissue, FakeTissueOptions};
}
