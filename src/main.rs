use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::error::Error;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use labtermo::analysis::{self, Experiment};
use labtermo::config::{CONFIG_FILE, LabConfig};
use labtermo::error::LabError;
use labtermo::link;
use labtermo::scaffold::scaffold;
use labtermo::telemetry::{Classifier, PressureReading, PressureSampler, RecordAccumulator};
use labtermo::ui::{self, ComparisonPlot, PressurePlot};

/// Thermodynamics lab tools: project setup, rig telemetry and CSV analysis.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the lab directory layout (never overwrites)
    Init {
        #[arg(default_value = ".")]
        root: PathBuf,
    },

    /// List available serial ports
    Ports,

    /// Summarise one experiment CSV
    Analyze {
        file: PathBuf,

        /// Initial gas volume in litres, for the work estimate
        #[arg(long, requires = "v_final")]
        v_initial: Option<f64>,

        /// Final gas volume in litres
        #[arg(long, requires = "v_initial")]
        v_final: Option<f64>,

        /// Write <file>_summary.yaml next to the data
        #[arg(long)]
        save: bool,

        /// Show a pressure plot in the terminal
        #[arg(long)]
        plot: bool,
    },

    /// Summarise every CSV in a directory (default: the data directory)
    Survey { dir: Option<PathBuf> },

    /// Compare two experiments, usually an extension and a retraction
    Compare {
        first: PathBuf,
        second: PathBuf,

        #[arg(long)]
        plot: bool,
    },

    /// Print parsed telemetry from a rig until the port closes
    Watch {
        #[arg(short, long, value_enum)]
        rig: RigKind,

        /// Serial port
        #[arg(short, long)]
        port: String,

        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RigKind {
    Actuator,
    Pumps,
}

fn rule() -> String {
    "=".repeat(60)
}

fn init(root: &Path) -> Result<(), Box<dyn Error>> {
    let report = scaffold(root)?;
    for path in &report.created {
        println!("  + {}", path.display());
    }
    println!(
        "{} created, {} already present",
        report.created.len(),
        report.existing.len()
    );
    println!();
    println!("Next steps:");
    println!("  panel actuator --port <PORT>   first-law actuator rig");
    println!("  panel pumps --port <PORT>      second-law flow rig");
    println!("  labtermo analyze termodinamica/primeraley/datos/ejemplo_extension.csv");
    Ok(())
}

fn ports() -> Result<(), Box<dyn Error>> {
    let ports = link::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn analyze(
    file: &Path,
    volumes: Option<(f64, f64)>,
    save: bool,
    plot: bool,
) -> Result<(), Box<dyn Error>> {
    let experiment = Experiment::load(file)?;
    let summary = experiment
        .summary()
        .ok_or_else(|| LabError::NoSamples(file.display().to_string()))?;

    println!("{}", rule());
    println!("ANALYSIS: {}", experiment.name);
    println!("{}", rule());
    print!("{}", summary.report());

    if let Some((v_i, v_f)) = volumes {
        if let Some(work) = experiment.estimate_work(v_i, v_f) {
            println!("{:.<40} {:.2}", "Estimated work (J)", work);
        }
    }
    println!("{}", rule());

    if save {
        let path = analysis::summary_path(file);
        summary.save_yaml(&path)?;
        println!("Summary saved to {}", path.display());
    }
    if plot {
        ui::run(&mut PressurePlot::new(&experiment))?;
    }
    Ok(())
}

fn survey(dir: &Path) -> Result<(), Box<dyn Error>> {
    let files = analysis::csv_files(dir)?;
    if files.is_empty() {
        println!("No CSV files in {}", dir.display());
        return Ok(());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let mut lines = Vec::with_capacity(files.len());
    for path in &files {
        pb.set_message(path.display().to_string());
        let line = match Experiment::load(path) {
            Ok(exp) => match exp.summary() {
                Some(summary) => summary.brief(),
                None => format!("{} | no samples", exp.name),
            },
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                format!("{} | error: {}", path.display(), e)
            }
        };
        lines.push(line);
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!("{} file(s) in {}", files.len(), dir.display());
    for line in lines {
        println!("  {}", line);
    }
    Ok(())
}

fn compare(first: &Path, second: &Path, plot: bool) -> Result<(), Box<dyn Error>> {
    let a = Experiment::load(first)?;
    let b = Experiment::load(second)?;
    let sa = a
        .summary()
        .ok_or_else(|| LabError::NoSamples(first.display().to_string()))?;
    let sb = b
        .summary()
        .ok_or_else(|| LabError::NoSamples(second.display().to_string()))?;
    print!("{}", analysis::comparison_report(&sa, &sb));
    if plot {
        ui::run(&mut ComparisonPlot::new(&a, &b))?;
    }
    Ok(())
}

fn wait_for_reset(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Waiting for the board to reset...");
    pb.enable_steady_tick(Duration::from_millis(100));
    thread::sleep(delay);
    pb.finish_and_clear();
}

fn print_reading(reading: &PressureReading, json: bool) {
    if json {
        let value = serde_json::json!({
            "timestamp": reading.at.to_rfc3339(),
            "pressure_kpa": reading.kpa,
            "temperature_c": reading.celsius,
        });
        println!("{}", value);
    } else {
        let temperature = reading
            .celsius
            .map_or_else(|| "ERROR".to_string(), |c| format!("{:.2} C", c));
        println!(
            "{}  {:>8.2} kPa  {}",
            reading.at.format("%H:%M:%S%.3f"),
            reading.kpa,
            temperature
        );
    }
}

fn watch(config: &LabConfig, rig: RigKind, port: &str, json: bool) -> Result<(), Box<dyn Error>> {
    let rig_config = match rig {
        RigKind::Actuator => &config.actuator,
        RigKind::Pumps => &config.pumps,
    };
    let settings = rig_config.link_settings(port)?;
    let serial = link::open(&settings)?;
    wait_for_reset(settings.reset_delay);
    info!("Watching {} at {} baud", settings.port, settings.baud);

    let running = Arc::new(AtomicBool::new(true));
    let reader = match rig {
        RigKind::Actuator => {
            let mut sampler = PressureSampler::default();
            link::spawn_line_reader("watch", serial, running, move |line| {
                if let Some(reading) = sampler.feed(&line) {
                    print_reading(&reading, json);
                }
                ControlFlow::Continue(())
            })?
        }
        RigKind::Pumps => {
            let mut accumulator = RecordAccumulator::new(Classifier::flow_rig());
            link::spawn_line_reader("watch", serial, running, move |line| {
                if let Some(record) = accumulator.feed(&line) {
                    if json {
                        match serde_json::to_string(&record) {
                            Ok(text) => println!("{}", text),
                            Err(e) => warn!("Could not encode record: {}", e),
                        }
                    } else {
                        let fields: Vec<String> =
                            record.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                        println!("{}", fields.join(" "));
                    }
                }
                ControlFlow::Continue(())
            })?
        }
    };

    reader.join().map_err(|_| "reader thread panicked")?;
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = LabConfig::load(&cli.config)?;
    match cli.command {
        Command::Init { root } => init(&root),
        Command::Ports => ports(),
        Command::Analyze {
            file,
            v_initial,
            v_final,
            save,
            plot,
        } => analyze(&file, v_initial.zip(v_final), save, plot),
        Command::Survey { dir } => survey(&dir.unwrap_or(config.data_dir)),
        Command::Compare {
            first,
            second,
            plot,
        } => compare(&first, &second, plot),
        Command::Watch { rig, port, json } => watch(&config, rig, &port, json),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
