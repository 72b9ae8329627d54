//! Offline analysis of the CSV files written by the actuator rig.

use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use log::warn;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::csv_log::{PRESSURE_COLUMN, TEMPERATURE_COLUMN, TIMESTAMP_FORMAT};
use crate::error::{LabError, Result};

/// Rows before the data header: the file header and the operation tag row.
const METADATA_ROWS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExperimentKind {
    Extension,
    Retraction,
    Unknown,
}

impl ExperimentKind {
    pub fn from_file_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("extension") {
            ExperimentKind::Extension
        } else if name.contains("retraccion") {
            ExperimentKind::Retraction
        } else {
            ExperimentKind::Unknown
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExperimentKind::Extension => "Extension (compression)",
            ExperimentKind::Retraction => "Retraction (expansion)",
            ExperimentKind::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: Option<NaiveDateTime>,
    pub kpa: f64,
    pub celsius: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Experiment {
    pub name: String,
    pub kind: ExperimentKind,
    pub samples: Vec<Sample>,
}

impl Experiment {
    pub fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_reader(&name, File::open(path)?)
    }

    pub fn from_reader<R: Read>(name: &str, reader: R) -> Result<Self> {
        let mut csv = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let mut rows = csv.records().skip(METADATA_ROWS);

        let missing = || LabError::MissingColumn {
            path: name.to_string(),
            column: PRESSURE_COLUMN,
        };
        let header = rows.next().transpose()?.ok_or_else(missing)?;
        let column = |label: &str| header.iter().position(|h| h.trim() == label);
        let pressure = column(PRESSURE_COLUMN).ok_or_else(missing)?;
        let temperature = column(TEMPERATURE_COLUMN);
        let timestamp = column("Timestamp");

        let mut samples = Vec::new();
        for (i, row) in rows.enumerate() {
            let row = row?;
            let Some(kpa) = row
                .get(pressure)
                .and_then(|p| p.trim().parse::<f64>().ok())
            else {
                warn!("{}: skipping data row {} with no pressure", name, i + 1);
                continue;
            };
            samples.push(Sample {
                timestamp: timestamp
                    .and_then(|c| row.get(c))
                    .and_then(|t| NaiveDateTime::parse_from_str(t.trim(), TIMESTAMP_FORMAT).ok()),
                kpa,
                celsius: temperature
                    .and_then(|c| row.get(c))
                    .and_then(|t| t.trim().parse::<f64>().ok()),
            });
        }

        Ok(Experiment {
            name: name.to_string(),
            kind: ExperimentKind::from_file_name(name),
            samples,
        })
    }

    pub fn pressures(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.kpa).collect()
    }

    pub fn summary(&self) -> Option<Summary> {
        let p = self.pressures();
        let (&initial, &last) = (p.first()?, p.last()?);
        let n = p.len();
        let mean = p.iter().sum::<f64>() / n as f64;
        let std_dev = (n > 1).then(|| {
            let var = p.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        });
        Some(Summary {
            file: self.name.clone(),
            kind: self.kind,
            initial_kpa: initial,
            final_kpa: last,
            max_kpa: p.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min_kpa: p.iter().copied().fold(f64::INFINITY, f64::min),
            mean_kpa: mean,
            change_kpa: last - initial,
            std_dev_kpa: std_dev,
            samples: n,
        })
    }

    /// |∫P dV| in joules, with the volume (litres) assumed to change linearly
    /// over the samples.
    pub fn estimate_work(&self, initial_l: f64, final_l: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let pa: Vec<f64> = self.samples.iter().map(|s| s.kpa * 1000.0).collect();
        let m3 = linspace(initial_l / 1000.0, final_l / 1000.0, pa.len());
        Some(trapezoid(&pa, &m3).abs())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub file: String,
    pub kind: ExperimentKind,
    pub initial_kpa: f64,
    pub final_kpa: f64,
    pub max_kpa: f64,
    pub min_kpa: f64,
    pub mean_kpa: f64,
    pub change_kpa: f64,
    /// Sample standard deviation; needs two samples.
    pub std_dev_kpa: Option<f64>,
    pub samples: usize,
}

impl Summary {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let kpa = |v: f64| format!("{:.2}", v);
        vec![
            ("Type", self.kind.label().to_string()),
            ("Initial pressure (kPa)", kpa(self.initial_kpa)),
            ("Final pressure (kPa)", kpa(self.final_kpa)),
            ("Maximum pressure (kPa)", kpa(self.max_kpa)),
            ("Minimum pressure (kPa)", kpa(self.min_kpa)),
            ("Mean pressure (kPa)", kpa(self.mean_kpa)),
            ("Pressure change (kPa)", kpa(self.change_kpa)),
            (
                "Standard deviation (kPa)",
                self.std_dev_kpa.map_or_else(|| "n/a".to_string(), kpa),
            ),
            ("Samples", self.samples.to_string()),
        ]
    }

    pub fn report(&self) -> String {
        let mut out = String::new();
        for (label, value) in self.rows() {
            let _ = writeln!(out, "{:.<40} {}", label, value);
        }
        out
    }

    /// One line per file, as printed by a directory survey.
    pub fn brief(&self) -> String {
        format!(
            "{} | {} | ΔP {:.2} kPa | Pmax {:.2} kPa",
            self.file,
            self.kind.label(),
            self.change_kpa,
            self.max_kpa
        )
    }

    pub fn save_yaml(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(yaml.as_bytes())?;
        Ok(())
    }
}

/// Side by side summaries of two experiments.
pub fn comparison_report(left: &Summary, right: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<28} {:>24} {:>24}", "", left.file, right.file);
    for ((label, a), (_, b)) in left.rows().into_iter().zip(right.rows()) {
        let _ = writeln!(out, "{:<28} {:>24} {:>24}", label, a, b);
    }
    out
}

/// `<stem>_summary.yaml` next to the data file.
pub fn summary_path(data: &Path) -> PathBuf {
    let stem = data
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    data.with_file_name(format!("{}_summary.yaml", stem))
}

/// CSV files directly inside `dir`, sorted by name.
pub fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    y.windows(2)
        .zip(x.windows(2))
        .map(|(y, x)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
        .sum()
}
