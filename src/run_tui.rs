// Terminal control panels for the lab rigs.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process;

use labtermo::config::{CONFIG_FILE, LabConfig};
use labtermo::ui::{self, ActuatorPanel, PumpsPanel};

const LOG_FILE: &str = "labtermo-panel.log";

/// Interactive panels for the actuator (first law) and flow (second law) rigs.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    panel: PanelKind,
}

#[derive(Subcommand)]
enum PanelKind {
    /// Actuator and pressure sensor rig.
    ///
    /// Keys: e extend, r retract, f/b jog, s release, x emergency stop,
    /// t duration, +/- and p PWM, c connect, q quit.
    Actuator {
        /// Serial port, e.g. /dev/ttyACM0 or COM3
        #[arg(short, long)]
        port: String,
    },

    /// Two-pump flow rig.
    ///
    /// Keys: Tab select pump, Up/Down setpoint, Enter type setpoint,
    /// o all off, r reset volumes, c connect, q quit.
    Pumps {
        /// Serial port, e.g. /dev/ttyUSB0 or COM4
        #[arg(short, long)]
        port: String,
    },
}

/// Logs go to a file while the alternate screen is up.
fn init_logging() {
    let mut builder = env_logger::Builder::from_default_env();
    if let Ok(file) = OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = LabConfig::load(&cli.config)?;
    match cli.panel {
        PanelKind::Actuator { port } => {
            let settings = config.actuator.link_settings(&port)?;
            let mut panel = ActuatorPanel::new(settings, config);
            panel.connect();
            ui::run(&mut panel)
        }
        PanelKind::Pumps { port } => {
            let settings = config.pumps.link_settings(&port)?;
            let mut panel = PumpsPanel::new(settings, config);
            panel.connect();
            ui::run(&mut panel)
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    println!("Starting panel, logging to {}", LOG_FILE);
    if let Err(e) = run(cli) {
        eprintln!("Error running panel: {}", e);
        process::exit(1);
    }
}
