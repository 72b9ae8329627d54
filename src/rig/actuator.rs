use chrono::Local;
use log::{error, info, warn};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Series, soft_join};
use crate::command::{ActuatorCommand, WireCommand};
use crate::config::LabConfig;
use crate::csv_log::{CsvLogger, Operation, SessionSummary};
use crate::error::Result;
use crate::link::{self, LinkSettings};
use crate::telemetry::{PressureReading, PressureSampler, is_completion};

/// What the reader thread reports to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorEvent {
    /// Every non-empty line, for the console pane.
    Console(String),
    Reading(PressureReading),
    /// The board finished an extend/retract movement.
    OperationComplete,
}

/// Display state fed by [`ActuatorRig::poll`].
#[derive(Debug, Clone)]
pub struct ActuatorState {
    pub last: Option<PressureReading>,
    pub pressure: Series,
    pub console: VecDeque<String>,
    console_lines: usize,
}

impl ActuatorState {
    fn new(history_len: usize, console_lines: usize) -> Self {
        ActuatorState {
            last: None,
            pressure: Series::new(history_len),
            console: VecDeque::with_capacity(console_lines),
            console_lines,
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        if self.console.len() == self.console_lines {
            self.console.pop_front();
        }
        self.console.push_back(message.into());
    }
}

/// Controller for the actuator + pressure sensor rig.
pub struct ActuatorRig {
    port: Box<dyn Write + Send>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    events: Receiver<ActuatorEvent>,
    logger: CsvLogger,
    grace: Duration,
    pub state: ActuatorState,
}

impl ActuatorRig {
    pub fn connect(settings: &LinkSettings, config: &LabConfig) -> Result<Self> {
        let port = link::open(settings)?;
        let source = port.try_clone()?;
        if !settings.reset_delay.is_zero() {
            thread::sleep(settings.reset_delay);
        }
        let mut rig = Self::attach(source, Box::new(port), config, settings.disconnect_grace)?;
        rig.state.log(format!("Connected to {}", settings.port));
        Ok(rig)
    }

    /// Wires the controller to any byte stream pair.
    pub fn attach<R>(
        source: R,
        sink: Box<dyn Write + Send>,
        config: &LabConfig,
        grace: Duration,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, events) = mpsc::channel();
        let mut sampler = PressureSampler::default();

        let reader = link::spawn_line_reader("actuator", source, Arc::clone(&running), move |line| {
            let reading = sampler.feed(&line);
            let complete = is_completion(&line);

            let mut batch = vec![ActuatorEvent::Console(line)];
            batch.extend(reading.map(ActuatorEvent::Reading));
            if complete {
                batch.push(ActuatorEvent::OperationComplete);
            }
            for event in batch {
                if tx.send(event).is_err() {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })?;

        Ok(ActuatorRig {
            port: sink,
            running,
            reader: Some(reader),
            events,
            logger: CsvLogger::new(&config.data_dir),
            grace,
            state: ActuatorState::new(config.history_len, config.console_lines),
        })
    }

    /// False once the reader thread has exited (read error or closed port).
    pub fn is_reading(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn logging_to(&self) -> Option<&Path> {
        self.logger.current_path()
    }

    pub fn logged_rows(&self) -> usize {
        self.logger.rows()
    }

    fn send(&mut self, command: ActuatorCommand) -> bool {
        match link::send(self.port.as_mut(), &command.encode()) {
            Ok(()) => {
                self.state.log(format!("Sent: {}", command));
                true
            }
            Err(e) => {
                warn!("Failed to send {}: {}", command, e);
                self.state.log(format!("Failed to send {}: {}", command, e));
                false
            }
        }
    }

    fn operate(&mut self, command: ActuatorCommand, operation: Operation) {
        // Anything the reader queued so far belongs to the previous movement.
        self.poll();
        if !self.send(command) {
            return;
        }
        match self.logger.start(operation, Local::now()) {
            Ok(path) => self.state.log(format!("CSV logging started: {}", path.display())),
            Err(e) => {
                error!("Could not create CSV file: {}", e);
                self.state.log(format!("Could not create CSV file: {}", e));
            }
        }
    }

    /// Compression stroke; records a new CSV session.
    pub fn extend(&mut self) {
        self.operate(ActuatorCommand::Extend, Operation::Extension);
    }

    /// Expansion stroke; records a new CSV session.
    pub fn retract(&mut self) {
        self.operate(ActuatorCommand::Retract, Operation::Retraction);
    }

    pub fn jog_forward(&mut self) {
        self.send(ActuatorCommand::Forward);
    }

    pub fn jog_backward(&mut self) {
        self.send(ActuatorCommand::Backward);
    }

    /// Stops a jog without touching the CSV session.
    pub fn jog_release(&mut self) {
        self.send(ActuatorCommand::Stop);
    }

    pub fn emergency_stop(&mut self) {
        self.send(ActuatorCommand::Stop);
        self.state.log("EMERGENCY STOP");
        self.finish_session();
    }

    pub fn set_duration(&mut self, ms: u32) -> Result<()> {
        let command = ActuatorCommand::duration(ms)?;
        self.send(command);
        Ok(())
    }

    pub fn set_pwm(&mut self, pwm: u8) {
        self.send(ActuatorCommand::Pwm(pwm));
    }

    fn finish_session(&mut self) -> Option<SessionSummary> {
        let summary = self.logger.stop()?;
        self.state.log(format!(
            "CSV saved: {} ({} rows)",
            summary.path.display(),
            summary.rows
        ));
        Some(summary)
    }

    /// Applies everything the reader sent since the last call. Returns the
    /// number of events handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            handled += 1;
            match event {
                ActuatorEvent::Console(line) => self.state.log(line),
                ActuatorEvent::Reading(reading) => {
                    let t = reading.at.timestamp_millis() as f64 / 1000.0;
                    self.state.pressure.push(t, reading.kpa);
                    if let Err(e) = self.logger.append(&reading) {
                        error!("Failed to write CSV row: {}", e);
                    }
                    self.state.last = Some(reading);
                }
                ActuatorEvent::OperationComplete => {
                    if self.finish_session().is_some() {
                        info!("Operation complete");
                    }
                }
            }
        }
        handled
    }

    /// Stops the reader, closes any CSV session, then drops the port after
    /// the grace period.
    pub fn disconnect(mut self) -> Option<SessionSummary> {
        self.running.store(false, Ordering::Relaxed);
        self.poll();
        let summary = self.finish_session();
        soft_join("actuator", self.reader.take(), self.grace);
        info!("Actuator rig disconnected");
        summary
    }
}

impl Drop for ActuatorRig {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{self, Cursor};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<Vec<u8>>>);

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Unplugged;

    impl Write for Unplugged {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(name: &str) -> LabConfig {
        let dir: PathBuf =
            std::env::temp_dir().join(format!("labtermo-actuator-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        LabConfig {
            data_dir: dir,
            ..LabConfig::default()
        }
    }

    fn rig(telemetry: &str, wire: Box<dyn Write + Send>, config: &LabConfig) -> ActuatorRig {
        ActuatorRig::attach(
            Cursor::new(telemetry.as_bytes().to_vec()),
            wire,
            config,
            Duration::ZERO,
        )
        .unwrap()
    }

    fn drain(rig: &mut ActuatorRig) {
        rig.reader.take().unwrap().join().unwrap();
        rig.poll();
    }

    #[test]
    fn extend_logs_readings_until_completion() {
        let config = config("extend");
        let wire = Wire::default();
        let telemetry = "Extendiendo...\n\
                         Pressure: 101.30kPa\n\
                         Temperature: ERROR\n\
                         Pressure: 110.00 kPa | Temperature: 24.00 C\n\
                         Extension completada\n\
                         Pressure: 111.00 kPa | Temperature: 24.00 C\n";
        let mut rig = rig(telemetry, Box::new(wire.clone()), &config);
        rig.extend();
        let path = rig.logging_to().unwrap().to_path_buf();
        drain(&mut rig);

        assert_eq!(wire.0.lock().unwrap().as_slice(), b"E");
        assert!(rig.logging_to().is_none());

        let text = fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text.lines().skip(3).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].ends_with(",101.3,ERROR"));
        assert!(rows[1].ends_with(",110,24"));

        let last = rig.state.last.as_ref().unwrap();
        assert_eq!(last.kpa, 111.0);
        assert_eq!(rig.state.pressure.len(), 3);
        assert!(rig.state.console.iter().any(|l| l == "Extension completada"));
        let _ = fs::remove_dir_all(&config.data_dir);
    }

    #[test]
    fn events_queued_before_extend_stay_out_of_the_session() {
        let config = config("queued");
        let telemetry = "Pressure: 90.0 kPa | Temperature: 20.0 C\n\
                         Retraccion completada\n";
        let mut rig = rig(telemetry, Box::new(Wire::default()), &config);
        rig.reader.take().unwrap().join().unwrap();

        rig.extend();
        rig.poll();
        assert!(rig.logging_to().is_some());
        assert_eq!(rig.logged_rows(), 0);
        assert_eq!(rig.state.last.as_ref().unwrap().kpa, 90.0);

        let summary = rig.disconnect().unwrap();
        let text = fs::read_to_string(&summary.path).unwrap();
        assert_eq!(text.lines().count(), 3);
        let _ = fs::remove_dir_all(&config.data_dir);
    }

    #[test]
    fn readings_without_session_are_not_logged() {
        let config = config("idle");
        let mut rig = rig("Pressure: 99.0kPa | Temperature: 20.0C\n", Box::new(Wire::default()), &config);
        drain(&mut rig);
        assert_eq!(rig.state.last.as_ref().unwrap().celsius, Some(20.0));
        assert!(!config.data_dir.exists());
    }

    #[test]
    fn failed_command_opens_no_session() {
        let config = config("unplugged");
        let mut rig = rig("", Box::new(Unplugged), &config);
        rig.retract();
        assert!(rig.logging_to().is_none());
        assert!(rig.state.console.back().unwrap().starts_with("Failed to send retract"));
    }

    #[test]
    fn emergency_stop_closes_session() {
        let config = config("estop");
        let wire = Wire::default();
        let mut rig = rig("", Box::new(wire.clone()), &config);
        rig.retract();
        assert!(rig.logging_to().is_some());
        rig.emergency_stop();
        assert!(rig.logging_to().is_none());
        assert_eq!(wire.0.lock().unwrap().as_slice(), b"RS");
        let _ = fs::remove_dir_all(&config.data_dir);
    }

    #[test]
    fn manual_commands_and_settings() {
        let config = config("manual");
        let wire = Wire::default();
        let mut rig = rig("", Box::new(wire.clone()), &config);
        rig.jog_forward();
        rig.jog_release();
        rig.jog_backward();
        rig.set_pwm(128);
        rig.set_duration(15_000).unwrap();
        assert!(rig.set_duration(500).is_err());
        assert_eq!(wire.0.lock().unwrap().as_slice(), b"FSBP:128\nT:15000\n");
        assert!(rig.logging_to().is_none());
    }

    #[test]
    fn disconnect_returns_open_session() {
        let config = config("disconnect");
        let mut rig = rig("", Box::new(Wire::default()), &config);
        rig.extend();
        let summary = rig.disconnect().unwrap();
        assert_eq!(summary.operation, Operation::Extension);
        assert_eq!(summary.rows, 0);
        let _ = fs::remove_dir_all(&config.data_dir);
    }
}
