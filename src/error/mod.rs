use thiserror::Error;

use crate::data::DataError;
use crate::fit::FitError;
use crate::sig::SignalError;
use crate::tools::ToolsError;

#[derive(Error, Debug)]
pub enum DcmriError {
    #[error(transparent)]
    Tools(#[from] ToolsError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Data(#[from] DataError),
    /// The requested combination of model options has no implementation
    #[error("{model}: {reason}")]
    Unsupported { model: String, reason: String },
    /// Parameter values that put the model outside its physical domain
    #[error("Invalid model state: {0}")]
    InvalidState(String),
    /// Baseline signal could not be used to scale the model
    #[error("Cannot calibrate S0: {0}")]
    Calibration(String),
}
