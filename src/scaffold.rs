//! Creates the lab directory layout. Safe to run again: nothing that
//! already exists is touched.

use log::{debug, info};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, LabConfig};
use crate::error::Result;

const DIRECTORIES: &[&str] = &[
    "termodinamica/primeraley/arduino/control_actuador",
    "termodinamica/primeraley/ejemplos",
    "termodinamica/primeraley/datos",
    "termodinamica/primeraley/docs/datasheets",
    "termodinamica/primeraley/docs/diagramas",
    "termodinamica/primeraley/docs/experimentos",
    "termodinamica/segundaley/docs",
    "termodinamica/segundaley/datos",
];

const FIRST_LAW_README: &str = "# Directorio de Datos - Primera Ley

Este directorio contiene los archivos CSV generados por los experimentos de Primera Ley.

## Nomenclatura de Archivos

- `presion_extension_YYYYMMDD_HHMMSS.csv`: Experimentos de extensión (compresión)
- `presion_retraccion_YYYYMMDD_HHMMSS.csv`: Experimentos de retracción (expansión)

## Estructura de CSV

Cada archivo contiene:
1. Metadata (2 primeras filas)
2. Headers de datos
3. Timestamp y mediciones de presión y temperatura
";

const SECOND_LAW_README: &str = "# Directorio de Datos - Segunda Ley

Este directorio contendrá los datos de experimentos de Segunda Ley.
";

pub const EXAMPLE_CSV: &str = "Timestamp,Presion (kPa),Tipo
,,extension
Timestamp,Presion (kPa)
2024-09-30 14:30:52.123,101.3
2024-09-30 14:30:52.623,108.5
2024-09-30 14:30:53.123,115.2
2024-09-30 14:30:53.623,122.8
2024-09-30 14:30:54.123,130.4
2024-09-30 14:30:54.623,138.6
2024-09-30 14:30:55.123,146.2
2024-09-30 14:30:55.623,153.8
2024-09-30 14:30:56.123,161.5
2024-09-30 14:30:56.623,168.9
";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScaffoldReport {
    pub created: Vec<PathBuf>,
    pub existing: Vec<PathBuf>,
}

impl ScaffoldReport {
    fn note(&mut self, path: PathBuf, created: bool) {
        if created {
            info!("Created {}", path.display());
            self.created.push(path);
        } else {
            debug!("{} already exists", path.display());
            self.existing.push(path);
        }
    }
}

/// Writes `contents` to a new file; `false` if the file was already there.
fn create_new(path: &Path, contents: &[u8]) -> Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(contents)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn scaffold(root: &Path) -> Result<ScaffoldReport> {
    let mut report = ScaffoldReport::default();

    for dir in DIRECTORIES {
        let path = root.join(dir);
        let created = !path.is_dir();
        fs::create_dir_all(&path)?;
        report.note(path, created);
    }

    let first = root.join("termodinamica/primeraley/datos");
    let second = root.join("termodinamica/segundaley/datos");

    let mut files: Vec<(PathBuf, Vec<u8>)> = vec![
        (first.join(".gitkeep"), Vec::new()),
        (second.join(".gitkeep"), Vec::new()),
        (first.join("README.md"), FIRST_LAW_README.into()),
        (second.join("README.md"), SECOND_LAW_README.into()),
        (first.join("ejemplo_extension.csv"), EXAMPLE_CSV.into()),
    ];

    let config = LabConfig {
        data_dir: PathBuf::from("termodinamica/primeraley/datos"),
        ..LabConfig::default()
    };
    files.push((root.join(CONFIG_FILE), serde_yaml::to_string(&config)?.into_bytes()));

    for (path, contents) in files {
        let created = create_new(&path, &contents)?;
        report.note(path, created);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Experiment;

    fn root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("labtermo-scaffold-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn creates_layout_once() {
        let root = root("once");
        let first = scaffold(&root).unwrap();
        assert_eq!(first.created.len(), DIRECTORIES.len() + 6);
        assert!(first.existing.is_empty());
        assert!(root.join("termodinamica/primeraley/docs/diagramas").is_dir());
        assert!(root.join("termodinamica/segundaley/datos/.gitkeep").is_file());

        let second = scaffold(&root).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.existing.len(), first.created.len());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn never_overwrites() {
        let root = root("keep");
        let readme = root.join("termodinamica/primeraley/datos/README.md");
        fs::create_dir_all(readme.parent().unwrap()).unwrap();
        fs::write(&readme, "mine").unwrap();

        let report = scaffold(&root).unwrap();
        assert!(report.existing.contains(&readme));
        assert_eq!(fs::read_to_string(&readme).unwrap(), "mine");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn example_csv_and_config_are_usable() {
        let root = root("usable");
        scaffold(&root).unwrap();
        let exp = Experiment::load(&root.join("termodinamica/primeraley/datos/ejemplo_extension.csv")).unwrap();
        assert_eq!(exp.samples.len(), 10);
        let config = LabConfig::load(&root.join(CONFIG_FILE)).unwrap();
        assert_eq!(config.pumps.baud, 115_200);
        let _ = fs::remove_dir_all(&root);
    }
}
