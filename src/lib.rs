//! Tools for the thermodynamics teaching lab: serial telemetry parsing for the
//! actuator and flow rigs, their controllers, CSV logging, offline analysis and
//! project scaffolding.

pub mod analysis;
pub mod command;
pub mod config;
pub mod csv_log;
pub mod error;
pub mod link;
pub mod rig;
pub mod scaffold;
pub mod telemetry;
pub mod ui;

pub use error::{ExtractError, LabError, Result};
