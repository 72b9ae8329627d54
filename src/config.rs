use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::link::{LinkSettings, LinkSettingsBuilder};

pub const CONFIG_FILE: &str = "labtermo.yaml";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RigConfig {
    pub baud: u32,
    pub timeout_ms: u64,
    pub reset_delay_ms: u64,
    pub disconnect_grace_ms: u64,
}

impl RigConfig {
    fn actuator() -> Self {
        RigConfig {
            baud: 9600,
            timeout_ms: 1000,
            reset_delay_ms: 0,
            disconnect_grace_ms: 0,
        }
    }

    fn pumps() -> Self {
        RigConfig {
            baud: 115_200,
            timeout_ms: 1000,
            reset_delay_ms: 2000,
            disconnect_grace_ms: 500,
        }
    }

    pub fn link_settings(&self, port: &str) -> Result<LinkSettings> {
        Ok(LinkSettingsBuilder::default()
            .port(port)
            .baud(self.baud)
            .timeout(Duration::from_millis(self.timeout_ms))
            .reset_delay(Duration::from_millis(self.reset_delay_ms))
            .disconnect_grace(Duration::from_millis(self.disconnect_grace_ms))
            .build()?)
    }
}

/// A rig section as written in YAML; absent keys keep the rig's own profile.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RigOverrides {
    baud: Option<u32>,
    timeout_ms: Option<u64>,
    reset_delay_ms: Option<u64>,
    disconnect_grace_ms: Option<u64>,
}

impl RigOverrides {
    fn over(self, base: RigConfig) -> RigConfig {
        RigConfig {
            baud: self.baud.unwrap_or(base.baud),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            reset_delay_ms: self.reset_delay_ms.unwrap_or(base.reset_delay_ms),
            disconnect_grace_ms: self.disconnect_grace_ms.unwrap_or(base.disconnect_grace_ms),
        }
    }
}

fn actuator_section<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<RigConfig, D::Error> {
    Ok(RigOverrides::deserialize(d)?.over(RigConfig::actuator()))
}

fn pumps_section<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<RigConfig, D::Error> {
    Ok(RigOverrides::deserialize(d)?.over(RigConfig::pumps()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Where actuator CSV sessions are written.
    pub data_dir: PathBuf,
    #[serde(deserialize_with = "actuator_section")]
    pub actuator: RigConfig,
    #[serde(deserialize_with = "pumps_section")]
    pub pumps: RigConfig,
    /// Points kept per chart series.
    pub history_len: usize,
    pub console_lines: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        LabConfig {
            data_dir: PathBuf::from("termodinamica/primeraley/datos"),
            actuator: RigConfig::actuator(),
            pumps: RigConfig::pumps(),
            history_len: 50,
            console_lines: 200,
        }
    }
}

impl LabConfig {
    /// Reads `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using default configuration", path.display());
            return Ok(LabConfig::default());
        }
        let text = fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let config = LabConfig::load(Path::new("/nonexistent/labtermo.yaml")).unwrap();
        assert_eq!(config, LabConfig::default());
        assert_eq!(config.pumps.baud, 115_200);
        assert_eq!(config.actuator.baud, 9600);
        assert_eq!(config.history_len, 50);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: LabConfig = serde_yaml::from_str("history_len: 120\npumps:\n  baud: 57600\n").unwrap();
        assert_eq!(config.history_len, 120);
        assert_eq!(config.pumps.baud, 57600);
        assert_eq!(config.pumps.reset_delay_ms, 2000);
        assert_eq!(config.pumps.disconnect_grace_ms, 500);
        assert_eq!(config.actuator, RigConfig::actuator());
    }

    #[test]
    fn partial_actuator_section_keeps_actuator_profile() {
        let config: LabConfig = serde_yaml::from_str("actuator:\n  timeout_ms: 250\n").unwrap();
        assert_eq!(config.actuator.timeout_ms, 250);
        assert_eq!(config.actuator.baud, 9600);
        assert_eq!(config.actuator.reset_delay_ms, 0);
        assert_eq!(config.pumps, RigConfig::pumps());
    }

    #[test]
    fn misspelled_rig_key_is_rejected() {
        assert!(serde_yaml::from_str::<LabConfig>("pumps:\n  bauds: 57600\n").is_err());
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("labtermo-config-{}.yaml", std::process::id()));
        let mut config = LabConfig::default();
        config.data_dir = PathBuf::from("datos");
        config.save(&path).unwrap();
        assert_eq!(LabConfig::load(&path).unwrap(), config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn link_settings_from_rig() {
        let settings = LabConfig::default().pumps.link_settings("COM3").unwrap();
        assert_eq!(settings.port, "COM3");
        assert_eq!(settings.baud, 115_200);
        assert_eq!(settings.reset_delay, Duration::from_secs(2));
        assert_eq!(settings.disconnect_grace, Duration::from_millis(500));
    }
}
