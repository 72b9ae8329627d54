use thiserror::Error;

use crate::link::LinkSettingsBuilderError;

#[derive(Debug, Error)]
pub enum LabError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid link settings: {0}")]
    Settings(#[from] LinkSettingsBuilderError),

    #[error("{what} must be between {min} and {max}, got {value}")]
    OutOfRange {
        what: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("{path}: column '{column}' not found")]
    MissingColumn { path: String, column: &'static str },

    #[error("{0}: no samples")]
    NoSamples(String),
}

pub type Result<T> = std::result::Result<T, LabError>;

/// Why a telemetry line matched a marker but produced no fields.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("missing '{0}' segment")]
    MissingSegment(&'static str),

    #[error("not a number: '{0}'")]
    BadNumber(String),

    #[error("expected 1 or at least 3 '|' separated segments, got {0}")]
    SegmentCount(usize),
}
