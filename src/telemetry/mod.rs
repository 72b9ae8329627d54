//! Parsing of the free-text telemetry the rig boards print over serial.
//!
//! Lines are matched against marker literals by [`Classifier`], turned into
//! typed [`LineKind`]s, and batched into [`Record`]s by [`RecordAccumulator`]
//! (flow rig) or paired into [`PressureReading`]s by [`PressureSampler`]
//! (actuator rig).

mod accumulate;
mod classify;

pub use accumulate::{PressureReading, PressureSampler, RecordAccumulator};
pub use classify::{Classifier, LineKind, PumpDrive, Rule, Thermo};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Line printed by the flow rig after each full round of readings.
pub const TERMINATOR: &str = "========================================";

/// One extracted measurement or status value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

/// Fields gathered for one batch, keyed by name (`temp1`, `caudal2`, ...).
pub type Record = BTreeMap<String, FieldValue>;

pub fn is_terminator(line: &str) -> bool {
    line.contains(TERMINATOR)
}

/// The actuator board announces the end of a movement in Spanish.
pub fn is_completion(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("completada") || lower.contains("completado")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_needs_full_rule() {
        assert!(is_terminator(TERMINATOR));
        assert!(is_terminator(&format!("  {}  ", TERMINATOR)));
        assert!(!is_terminator("====="));
    }

    #[test]
    fn completion_is_case_insensitive() {
        assert!(is_completion("Extension COMPLETADA"));
        assert!(is_completion("Movimiento completado"));
        assert!(!is_completion("Moviendo..."));
    }

    #[test]
    fn field_value_display() {
        assert_eq!(FieldValue::from(1.5).to_string(), "1.5");
        assert_eq!(FieldValue::from("ON").to_string(), "ON");
        assert_eq!(FieldValue::from("ON").as_f64(), None);
        assert_eq!(FieldValue::from(2.0).as_str(), None);
    }
}
