use chrono::{DateTime, Local};
use std::mem;

use super::{Classifier, LineKind, Record, Thermo, is_completion, is_terminator};

/// Merges fields line by line and releases them as one record per batch.
#[derive(Debug, Clone)]
pub struct RecordAccumulator {
    classifier: Classifier,
    pending: Record,
}

impl RecordAccumulator {
    pub fn new(classifier: Classifier) -> Self {
        RecordAccumulator {
            classifier,
            pending: Record::new(),
        }
    }

    /// Returns the finished record when `line` closes a non-empty batch.
    pub fn feed(&mut self, line: &str) -> Option<Record> {
        let line = line.trim();
        if let Some(kind) = self.classifier.classify(line) {
            kind.merge_into(&mut self.pending);
        }
        if (is_terminator(line) || is_completion(line)) && !self.pending.is_empty() {
            return Some(mem::take(&mut self.pending));
        }
        None
    }

    pub fn pending(&self) -> &Record {
        &self.pending
    }
}

/// One pressure sample, with the temperature that came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureReading {
    pub at: DateTime<Local>,
    pub kpa: f64,
    /// `None` when the sensor reported an error.
    pub celsius: Option<f64>,
}

/// Pairs pressure and temperature values into readings.
///
/// The board prints both on one line, or a `Pressure:` line followed by a
/// `Temperature:` line. A lone pressure is held until its temperature arrives.
#[derive(Debug, Clone)]
pub struct PressureSampler {
    classifier: Classifier,
    held_kpa: Option<f64>,
}

impl Default for PressureSampler {
    fn default() -> Self {
        PressureSampler {
            classifier: Classifier::actuator_rig(),
            held_kpa: None,
        }
    }
}

impl PressureSampler {
    pub fn new(classifier: Classifier) -> Self {
        PressureSampler {
            classifier,
            held_kpa: None,
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<PressureReading> {
        self.feed_at(line, Local::now())
    }

    pub fn feed_at(&mut self, line: &str, at: DateTime<Local>) -> Option<PressureReading> {
        match self.classifier.classify(line)? {
            LineKind::Pressure {
                kpa,
                temperature: Some(t),
            } => {
                self.held_kpa = None;
                Some(reading(at, kpa, t))
            }
            LineKind::Pressure {
                kpa,
                temperature: None,
            } => {
                self.held_kpa = Some(kpa);
                None
            }
            LineKind::Temperature(t) => self.held_kpa.take().map(|kpa| reading(at, kpa, t)),
            _ => None,
        }
    }
}

fn reading(at: DateTime<Local>, kpa: f64, t: Thermo) -> PressureReading {
    PressureReading {
        at,
        kpa,
        celsius: t.celsius(),
    }
}
