use chrono::{DateTime, Local};
use log::{info, warn};
use std::io::{Read, Write};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Series, soft_join};
use crate::command::{Pump, PumpCommand, WireCommand};
use crate::config::LabConfig;
use crate::error::Result;
use crate::link::{self, LinkSettings};
use crate::telemetry::{Classifier, FieldValue, Record, RecordAccumulator};

pub const TEMPERATURE_SENSORS: usize = 3;
pub const FLOW_METERS: usize = 2;

/// Latest value of every field plus chart histories.
#[derive(Debug, Clone)]
pub struct FlowPanel {
    values: Record,
    pub temperatures: [Series; TEMPERATURE_SENSORS],
    pub flows: [Series; FLOW_METERS],
    pub records: usize,
}

impl FlowPanel {
    pub fn new(history_len: usize) -> Self {
        FlowPanel {
            values: Record::new(),
            temperatures: std::array::from_fn(|_| Series::new(history_len)),
            flows: std::array::from_fn(|_| Series::new(history_len)),
            records: 0,
        }
    }

    pub fn apply(&mut self, record: &Record, at: DateTime<Local>) {
        self.records += 1;
        for (name, value) in record {
            self.values.insert(name.clone(), value.clone());
        }

        // A pump in manual mode has no control error to show.
        for pump in Pump::ALL {
            let error = format!("error{}", pump.number());
            if !record.contains_key(&error) && self.mode(pump) == Some("MANUAL") {
                self.values.remove(&error);
            }
        }

        let t = at.timestamp_millis() as f64 / 1000.0;
        for (i, series) in self.temperatures.iter_mut().enumerate() {
            if let Some(v) = record.get(&format!("temp{}", i + 1)).and_then(FieldValue::as_f64) {
                series.push(t, v);
            }
        }
        for (i, series) in self.flows.iter_mut().enumerate() {
            if let Some(v) = record.get(&format!("caudal{}", i + 1)).and_then(FieldValue::as_f64) {
                series.push(t, v);
            }
        }
    }

    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn mode(&self, pump: Pump) -> Option<&str> {
        self.value(&format!("modo{}", pump.number()))
            .and_then(FieldValue::as_str)
    }

    /// Text for a display cell; `--` until the field has been seen.
    pub fn display(&self, field: &str) -> String {
        match self.values.get(field) {
            Some(FieldValue::Number(n)) if field.starts_with("temp") => format!("{:.2}", n),
            Some(FieldValue::Number(n))
                if field.starts_with("caudal") || field.starts_with("volumen") =>
            {
                format!("{:.3}", n)
            }
            Some(FieldValue::Number(n)) if field.starts_with("duty") => format!("{:.1}", n),
            Some(value) => value.to_string(),
            None if field.starts_with("bomba") => "UNKNOWN".to_string(),
            None => "--".to_string(),
        }
    }
}

/// Controller for the two-pump flow loop.
pub struct FlowRig {
    port: Box<dyn Write + Send>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    events: Receiver<(DateTime<Local>, Record)>,
    setpoints: [f64; 2],
    grace: Duration,
    pub panel: FlowPanel,
}

impl FlowRig {
    pub fn connect(settings: &LinkSettings, config: &LabConfig) -> Result<Self> {
        let port = link::open(settings)?;
        let source = port.try_clone()?;
        // The board reboots when the port opens.
        if !settings.reset_delay.is_zero() {
            thread::sleep(settings.reset_delay);
        }
        info!("Connected to flow rig on {}", settings.port);
        Self::attach(source, Box::new(port), config, settings.disconnect_grace)
    }

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
        let mut accumulator = RecordAccumulator::new(Classifier::flow_rig());

        let reader = link::spawn_line_reader("flow", source, Arc::clone(&running), move |line| {
            if let Some(record) = accumulator.feed(&line) {
                if tx.send((Local::now(), record)).is_err() {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })?;

        Ok(FlowRig {
            port: sink,
            running,
            reader: Some(reader),
            events,
            setpoints: [0.0; 2],
            grace,
            panel: FlowPanel::new(config.history_len),
        })
    }

    pub fn is_reading(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn setpoint(&self, pump: Pump) -> f64 {
        self.setpoints[pump.index()]
    }

    fn send(&mut self, command: PumpCommand) -> bool {
        match link::send(self.port.as_mut(), &command.encode()) {
            Ok(()) => {
                info!("Sent: {}", command);
                true
            }
            Err(e) => {
                warn!("Failed to send {}: {}", command, e);
                false
            }
        }
    }

    /// Validates, remembers, and sends a flow target in L/min.
    pub fn set_setpoint(&mut self, pump: Pump, lpm: f64) -> Result<()> {
        let command = PumpCommand::setpoint(pump, lpm)?;
        if let PumpCommand::Setpoint { lpm, .. } = command {
            self.setpoints[pump.index()] = lpm;
        }
        self.send(command);
        Ok(())
    }

    /// Moves a setpoint by `delta`, clamped to the valid range.
    pub fn nudge_setpoint(&mut self, pump: Pump, delta: f64) -> Result<f64> {
        let target = (self.setpoint(pump) + delta).clamp(0.0, crate::command::MAX_SETPOINT_LPM);
        self.set_setpoint(pump, target)?;
        Ok(self.setpoint(pump))
    }

    pub fn all_off(&mut self) -> bool {
        self.setpoints = [0.0; 2];
        self.send(PumpCommand::AllOff)
    }

    pub fn reset_volumes(&mut self) -> bool {
        self.send(PumpCommand::ResetVolumes)
    }

    /// Applies completed records. Returns how many arrived.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok((at, record)) = self.events.try_recv() {
            self.panel.apply(&record, at);
            handled += 1;
        }
        handled
    }

    pub fn disconnect(mut self) {
        self.running.store(false, Ordering::Relaxed);
        soft_join("flow", self.reader.take(), self.grace);
        info!("Flow rig disconnected");
    }
}

impl Drop for FlowRig {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
