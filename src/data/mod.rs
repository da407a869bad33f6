//! ROI time curves and tables of fitted parameters
//!
//! Curves are read from CSV files with a `time` column followed by one
//! column per region of interest. Lines starting with `#` are comments.
//! Fitted parameters of many subjects and visits are collected in a
//! [`ParamTable`] that can be written to CSV or JSON.

mod curves;
mod table;

pub use curves::{parse_curves, read_curves, Curves};
pub use table::{ParamTable, TableRow};

use thiserror::Error;

/// Errors raised while reading or writing data files
#[derive(Error, Debug)]
pub enum DataError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No time column in header")]
    MissingTime,
    #[error("Cannot parse '{value}' in column {column}, row {row}")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Time must increase, row {row} has {time}")]
    NonIncreasingTime { row: usize, time: f64 },
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),
    #[error("Curve {name} has {found} values for {expected} time points")]
    Length {
        name: String,
        expected: usize,
        found: usize,
    },
}
