use chrono::{DateTime, Local};
use csv::{Writer, WriterBuilder};
use log::{info, warn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::telemetry::PressureReading;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
pub const PRESSURE_COLUMN: &str = "Presion (kPa)";
pub const TEMPERATURE_COLUMN: &str = "Temperatura (C)";

/// Actuator movement that a CSV session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Compression
    Extension,
    /// Expansion
    Retraction,
}

impl Operation {
    /// Tag used in file names and in the metadata row.
    pub fn tag(self) -> &'static str {
        match self {
            Operation::Extension => "extension",
            Operation::Retraction => "retraccion",
        }
    }
}

struct Session {
    path: PathBuf,
    operation: Operation,
    writer: Writer<File>,
    rows: usize,
}

/// A finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub path: PathBuf,
    pub operation: Operation,
    pub rows: usize,
}

/// Writes pressure readings to one CSV file per operation. At most one file
/// is open at a time.
pub struct CsvLogger {
    dir: PathBuf,
    session: Option<Session>,
}

impl CsvLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvLogger {
            dir: dir.into(),
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    pub fn current_operation(&self) -> Option<Operation> {
        self.session.as_ref().map(|s| s.operation)
    }

    pub fn rows(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.rows)
    }

    /// Opens a new file for `operation`, closing any open session first.
    pub fn start(&mut self, operation: Operation, now: DateTime<Local>) -> Result<PathBuf> {
        if let Some(previous) = self.stop() {
            info!(
                "Closed {} ({} rows) before starting a new session",
                previous.path.display(),
                previous.rows
            );
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.unused_path(operation, now);
        let mut writer = WriterBuilder::new().flexible(true).from_path(&path)?;
        writer.write_record(["Timestamp", PRESSURE_COLUMN, TEMPERATURE_COLUMN, "Tipo"])?;
        writer.write_record(["", "", "", operation.tag()])?;
        writer.write_record(["Timestamp", PRESSURE_COLUMN, TEMPERATURE_COLUMN])?;
        writer.flush()?;

        info!("CSV logging started: {}", path.display());
        self.session = Some(Session {
            path: path.clone(),
            operation,
            writer,
            rows: 0,
        });
        Ok(path)
    }

    /// Appends and flushes one row. Returns `false` when no session is open.
    pub fn append(&mut self, reading: &PressureReading) -> Result<bool> {
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };
        let temperature = match reading.celsius {
            Some(c) => c.to_string(),
            None => "ERROR".to_string(),
        };
        session.writer.write_record([
            reading.at.format(TIMESTAMP_FORMAT).to_string(),
            reading.kpa.to_string(),
            temperature,
        ])?;
        session.writer.flush()?;
        session.rows += 1;
        Ok(true)
    }

    pub fn stop(&mut self) -> Option<SessionSummary> {
        let mut session = self.session.take()?;
        if let Err(e) = session.writer.flush() {
            warn!("Failed to flush {}: {}", session.path.display(), e);
        }
        info!(
            "CSV logging finished: {} ({} rows)",
            session.path.display(),
            session.rows
        );
        Some(SessionSummary {
            path: session.path,
            operation: session.operation,
            rows: session.rows,
        })
    }

    fn unused_path(&self, operation: Operation, now: DateTime<Local>) -> PathBuf {
        let stem = format!("presion_{}_{}", operation.tag(), now.format("%Y%m%d_%H%M%S"));
        let mut path = self.dir.join(format!("{}.csv", stem));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.csv", stem, n));
            n += 1;
        }
        path
    }
}

impl Drop for CsvLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("labtermo-csv-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn at(sec: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 9, 30, 14, 30, sec).unwrap()
    }

    fn reading(sec: u32, kpa: f64, celsius: Option<f64>) -> PressureReading {
        PressureReading {
            at: at(sec),
            kpa,
            celsius,
        }
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn writes_metadata_then_rows() {
        let dir = scratch_dir("rows");
        let mut logger = CsvLogger::new(&dir);
        let path = logger.start(Operation::Retraction, at(52)).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "presion_retraccion_20240930_143052.csv"
        );

        assert!(logger.append(&reading(53, 101.3, None)).unwrap());
        assert!(logger.append(&reading(54, 108.5, Some(24.5))).unwrap());

        // flushed per row, readable while the session is still open
        assert_eq!(
            lines(&path),
            vec![
                "Timestamp,Presion (kPa),Temperatura (C),Tipo",
                ",,,retraccion",
                "Timestamp,Presion (kPa),Temperatura (C)",
                "2024-09-30 14:30:53.000,101.3,ERROR",
                "2024-09-30 14:30:54.000,108.5,24.5",
            ]
        );
        let summary = logger.stop().unwrap();
        assert_eq!(summary.rows, 2);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn append_without_session_is_a_no_op() {
        let mut logger = CsvLogger::new(scratch_dir("idle"));
        assert!(!logger.append(&reading(0, 100.0, None)).unwrap());
        assert!(logger.stop().is_none());
    }

    #[test]
    fn new_session_closes_the_previous_one() {
        let dir = scratch_dir("switch");
        let mut logger = CsvLogger::new(&dir);
        let first = logger.start(Operation::Extension, at(0)).unwrap();
        logger.append(&reading(1, 100.0, Some(20.0))).unwrap();

        let second = logger.start(Operation::Retraction, at(5)).unwrap();
        assert_ne!(first, second);
        logger.append(&reading(6, 90.0, Some(20.0))).unwrap();
        logger.append(&reading(7, 80.0, Some(20.0))).unwrap();

        assert_eq!(lines(&first).len(), 4);
        assert_eq!(lines(&second).len(), 5);
        assert_eq!(logger.current_operation(), Some(Operation::Retraction));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn same_second_gets_a_suffix() {
        let dir = scratch_dir("suffix");
        let mut logger = CsvLogger::new(&dir);
        let first = logger.start(Operation::Extension, at(9)).unwrap();
        let second = logger.start(Operation::Extension, at(9)).unwrap();
        assert_ne!(first, second);
        assert!(second.to_str().unwrap().ends_with("_1.csv"));
        let _ = fs::remove_dir_all(&dir);
    }
}
