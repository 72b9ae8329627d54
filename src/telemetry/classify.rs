use log::trace;

use super::{FieldValue, Record};
use crate::error::ExtractError;

/// A temperature as reported by the actuator rig's sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Thermo {
    Celsius(f64),
    /// The board printed `ERROR` instead of a value.
    Fault,
}

impl Thermo {
    pub fn celsius(self) -> Option<f64> {
        match self {
            Thermo::Celsius(c) => Some(c),
            Thermo::Fault => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PumpDrive {
    pub pwm: u16,
    /// Percent, as printed next to the PWM value.
    pub duty: f64,
    pub mode: String,
}

/// A recognised telemetry line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Pressure {
        kpa: f64,
        temperature: Option<Thermo>,
    },
    Temperature(Thermo),
    SensorTemperature {
        sensor: u8,
        celsius: f64,
    },
    Flow {
        meter: u8,
        /// L/min
        rate: f64,
        /// L accumulated since the last reset
        volume: f64,
    },
    Pump {
        pump: u8,
        state: String,
        drive: Option<PumpDrive>,
    },
    SetpointError {
        pump: u8,
        error: String,
    },
}

impl LineKind {
    /// Flattens the line into named record fields.
    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        match self {
            LineKind::Pressure { kpa, temperature } => {
                let mut fields = vec![("pressure".to_string(), FieldValue::Number(*kpa))];
                if let Some(t) = temperature {
                    fields.push(("temperature".to_string(), thermo_value(*t)));
                }
                fields
            }
            LineKind::Temperature(t) => vec![("temperature".to_string(), thermo_value(*t))],
            LineKind::SensorTemperature { sensor, celsius } => {
                vec![(format!("temp{}", sensor), FieldValue::Number(*celsius))]
            }
            LineKind::Flow {
                meter,
                rate,
                volume,
            } => vec![
                (format!("caudal{}", meter), FieldValue::Number(*rate)),
                (format!("volumen{}", meter), FieldValue::Number(*volume)),
            ],
            LineKind::Pump { pump, state, drive } => {
                let mut fields = vec![(format!("bomba{}", pump), FieldValue::from(state.as_str()))];
                if let Some(drive) = drive {
                    fields.push((format!("pwm{}", pump), FieldValue::Number(drive.pwm as f64)));
                    fields.push((format!("duty{}", pump), FieldValue::Number(drive.duty)));
                    fields.push((format!("modo{}", pump), FieldValue::from(drive.mode.as_str())));
                }
                fields
            }
            LineKind::SetpointError { pump, error } => {
                vec![(format!("error{}", pump), FieldValue::from(error.as_str()))]
            }
        }
    }

    pub fn merge_into(&self, record: &mut Record) {
        for (name, value) in self.fields() {
            record.insert(name, value);
        }
    }
}

fn thermo_value(t: Thermo) -> FieldValue {
    match t {
        Thermo::Celsius(c) => FieldValue::Number(c),
        Thermo::Fault => FieldValue::from("ERROR"),
    }
}

/// Extraction rule attached to a marker literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    Pressure,
    Temperature,
    Sensor(u8),
    Flow(u8),
    Pump(u8),
    Setpoint(u8),
}

#[derive(Debug, Clone)]
struct Marker {
    literal: String,
    rule: Rule,
}

/// Ordered marker table; the first marker contained in a line decides its rule.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    markers: Vec<Marker>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker(mut self, literal: &str, rule: Rule) -> Self {
        self.markers.push(Marker {
            literal: literal.to_string(),
            rule,
        });
        self
    }

    /// Pressure/temperature sensor on the actuator rig.
    pub fn actuator_rig() -> Self {
        Self::new()
            .with_marker("Pressure:", Rule::Pressure)
            .with_marker("Temperature:", Rule::Temperature)
    }

    /// Dual pump flow loop.
    pub fn flow_rig() -> Self {
        Self::new()
            .with_marker("Sensor 1 (pin11):", Rule::Sensor(1))
            .with_marker("Sensor 2 (pin12):", Rule::Sensor(2))
            .with_marker("Sensor 3 (pin4):", Rule::Sensor(3))
            .with_marker("Caudal 1 (pin2):", Rule::Flow(1))
            .with_marker("Caudal 2 (pin3):", Rule::Flow(2))
            .with_marker("Bomba 1:", Rule::Pump(1))
            .with_marker("Bomba 2:", Rule::Pump(2))
            .with_marker("Setpoint 1:", Rule::Setpoint(1))
            .with_marker("Setpoint 2:", Rule::Setpoint(2))
    }

    pub fn rule_for(&self, line: &str) -> Option<Rule> {
        self.markers
            .iter()
            .find(|m| line.contains(m.literal.as_str()))
            .map(|m| m.rule)
    }

    /// Returns `None` for unknown lines and for lines whose values don't parse.
    pub fn classify(&self, line: &str) -> Option<LineKind> {
        let line = line.trim();
        let rule = self.rule_for(line)?;
        match extract(rule, line) {
            Ok(kind) => Some(kind),
            Err(e) => {
                trace!("Discarding '{}': {}", line, e);
                None
            }
        }
    }
}

pub fn extract(rule: Rule, line: &str) -> Result<LineKind, ExtractError> {
    match rule {
        Rule::Pressure => {
            let rest = after(line, "Pressure:")?;
            let kpa = number(rest.split("kPa").next().unwrap_or(rest), &[])?;
            let temperature = match after(line, "Temperature:") {
                Ok(t) => Some(thermo(t)?),
                Err(_) => None,
            };
            Ok(LineKind::Pressure { kpa, temperature })
        }
        Rule::Temperature => Ok(LineKind::Temperature(thermo(after(line, "Temperature:")?)?)),
        Rule::Sensor(sensor) => {
            let raw = line.split(':').nth(1).ok_or(ExtractError::MissingSegment(":"))?;
            let celsius = number(raw, &["°C", "C"])?;
            Ok(LineKind::SensorTemperature { sensor, celsius })
        }
        Rule::Flow(meter) => {
            let mut parts = line.split('|');
            let rate = parts.next().ok_or(ExtractError::MissingSegment("flow"))?;
            let volume = parts.next().ok_or(ExtractError::MissingSegment("volume"))?;
            Ok(LineKind::Flow {
                meter,
                rate: number(value_part(rate), &["L/min"])?,
                volume: number(value_part(volume), &["L"])?,
            })
        }
        Rule::Pump(pump) => {
            let parts: Vec<&str> = line.split('|').collect();
            let state = parts[0]
                .split(':')
                .nth(1)
                .ok_or(ExtractError::MissingSegment("state"))?
                .trim()
                .to_string();
            let drive = match parts.len() {
                1 => None,
                2 => return Err(ExtractError::SegmentCount(2)),
                // trailing segments are ignored
                _ => Some(pump_drive(parts[1], parts[2])?),
            };
            Ok(LineKind::Pump { pump, state, drive })
        }
        Rule::Setpoint(pump) => {
            let error = after(line, "Error:")?.trim().to_string();
            Ok(LineKind::SetpointError { pump, error })
        }
    }
}

fn pump_drive(pwm_part: &str, mode_part: &str) -> Result<PumpDrive, ExtractError> {
    // "PWM: 128 (50.2%)"
    let pwm_str = pwm_part
        .split(':')
        .nth(1)
        .ok_or(ExtractError::MissingSegment("pwm"))?
        .trim();
    let (pwm, duty) = pwm_str
        .split_once('(')
        .ok_or(ExtractError::MissingSegment("("))?;
    let pwm = pwm
        .trim()
        .parse::<u16>()
        .map_err(|_| ExtractError::BadNumber(pwm.trim().to_string()))?;
    let duty = number(duty, &["%)"])?;
    let mode = mode_part
        .split(':')
        .nth(1)
        .ok_or(ExtractError::MissingSegment("mode"))?
        .trim()
        .to_string();
    Ok(PumpDrive { pwm, duty, mode })
}

fn after<'a>(line: &'a str, keyword: &'static str) -> Result<&'a str, ExtractError> {
    line.split_once(keyword)
        .map(|(_, rest)| rest)
        .ok_or(ExtractError::MissingSegment(keyword))
}

fn value_part(segment: &str) -> &str {
    segment.split(':').nth(1).unwrap_or(segment)
}

fn thermo(raw: &str) -> Result<Thermo, ExtractError> {
    let raw = raw.trim();
    if raw.contains("ERROR") {
        return Ok(Thermo::Fault);
    }
    let value = raw.split('C').next().unwrap_or(raw).trim().trim_end_matches('°');
    Ok(Thermo::Celsius(number(value, &[])?))
}

fn number(raw: &str, units: &[&str]) -> Result<f64, ExtractError> {
    let mut cleaned = raw.to_string();
    for unit in units {
        cleaned = cleaned.replace(unit, "");
    }
    let cleaned = cleaned.trim();
    cleaned
        .parse::<f64>()
        .map_err(|_| ExtractError::BadNumber(cleaned.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_lines() {
        let c = Classifier::flow_rig();
        assert_eq!(
            c.classify("Sensor 1 (pin11): 23.45C"),
            Some(LineKind::SensorTemperature {
                sensor: 1,
                celsius: 23.45
            })
        );
        assert_eq!(
            c.classify("   Sensor 3 (pin4): -4.50 °C  \r"),
            Some(LineKind::SensorTemperature {
                sensor: 3,
                celsius: -4.5
            })
        );
    }

    #[test]
    fn sensor_garbage_is_discarded() {
        let c = Classifier::flow_rig();
        assert_eq!(c.classify("Sensor 2 (pin12): DESCONECTADO"), None);
    }

    #[test]
    fn flow_line_with_bare_volume() {
        let c = Classifier::flow_rig();
        let kind = c.classify("Caudal 1 (pin2): 1.200L/min | 3.500L").unwrap();
        assert_eq!(
            kind,
            LineKind::Flow {
                meter: 1,
                rate: 1.2,
                volume: 3.5
            }
        );
    }

    #[test]
    fn flow_line_with_labelled_volume() {
        let c = Classifier::flow_rig();
        let kind = c
            .classify("Caudal 2 (pin3): 0.850 L/min | Volumen: 12.040 L")
            .unwrap();
        assert_eq!(
            kind,
            LineKind::Flow {
                meter: 2,
                rate: 0.85,
                volume: 12.04
            }
        );
    }

    #[test]
    fn flow_line_missing_volume_yields_nothing() {
        let c = Classifier::flow_rig();
        assert_eq!(c.classify("Caudal 1 (pin2): 1.200L/min"), None);
    }

    #[test]
    fn pump_line_full() {
        let c = Classifier::flow_rig();
        let kind = c
            .classify("Bomba 2: ON | PWM: 128 (50.2%) | Modo: AUTO")
            .unwrap();
        assert_eq!(
            kind,
            LineKind::Pump {
                pump: 2,
                state: "ON".into(),
                drive: Some(PumpDrive {
                    pwm: 128,
                    duty: 50.2,
                    mode: "AUTO".into()
                })
            }
        );
        let fields: Record = kind.fields().into_iter().collect();
        assert_eq!(fields["pwm2"], FieldValue::Number(128.0));
        assert_eq!(fields["modo2"], FieldValue::from("AUTO"));
    }

    #[test]
    fn pump_line_extra_segments_are_ignored() {
        let c = Classifier::flow_rig();
        let kind = c
            .classify("Bomba 1: ON | PWM: 90 (35.3%) | Modo: MANUAL | Temp: 40C")
            .unwrap();
        assert_eq!(
            kind,
            LineKind::Pump {
                pump: 1,
                state: "ON".into(),
                drive: Some(PumpDrive {
                    pwm: 90,
                    duty: 35.3,
                    mode: "MANUAL".into()
                })
            }
        );
        assert_eq!(
            extract(Rule::Pump(1), "Bomba 1: ON | PWM: 90 (35.3%)"),
            Err(ExtractError::SegmentCount(2))
        );
    }

    #[test]
    fn pump_line_state_only() {
        let c = Classifier::flow_rig();
        assert_eq!(
            c.classify("Bomba 1: APAGADA"),
            Some(LineKind::Pump {
                pump: 1,
                state: "APAGADA".into(),
                drive: None
            })
        );
    }

    #[test]
    fn pump_line_bad_pwm_records_nothing() {
        let c = Classifier::flow_rig();
        assert_eq!(c.classify("Bomba 1: ON | PWM: high (50%) | Modo: AUTO"), None);
        assert_eq!(c.classify("Bomba 1: ON | PWM: 12 (5%)"), None);
    }

    #[test]
    fn setpoint_error_is_text() {
        let c = Classifier::flow_rig();
        assert_eq!(
            c.classify("Setpoint 1: 5.0 L/min | Error: -0.25 L/min"),
            Some(LineKind::SetpointError {
                pump: 1,
                error: "-0.25 L/min".into()
            })
        );
        assert_eq!(c.classify("Setpoint 2: 5.0 L/min"), None);
    }

    #[test]
    fn pressure_alone_and_combined() {
        let c = Classifier::actuator_rig();
        assert_eq!(
            c.classify("Pressure: 101.30kPa"),
            Some(LineKind::Pressure {
                kpa: 101.3,
                temperature: None
            })
        );
        assert_eq!(
            c.classify("Pressure: 98.70 kPa, Temperature: 24.10 °C"),
            Some(LineKind::Pressure {
                kpa: 98.7,
                temperature: Some(Thermo::Celsius(24.1))
            })
        );
        assert_eq!(
            c.classify("Pressure: 98.70 kPa | Temperature: ERROR"),
            Some(LineKind::Pressure {
                kpa: 98.7,
                temperature: Some(Thermo::Fault)
            })
        );
    }

    #[test]
    fn temperature_alone() {
        let c = Classifier::actuator_rig();
        assert_eq!(
            c.classify("Temperature: ERROR"),
            Some(LineKind::Temperature(Thermo::Fault))
        );
        assert_eq!(
            c.classify("Temperature: 22.5C"),
            Some(LineKind::Temperature(Thermo::Celsius(22.5)))
        );
    }

    #[test]
    fn first_marker_wins() {
        let c = Classifier::new()
            .with_marker("Bomba 1:", Rule::Pump(1))
            .with_marker("Setpoint 1:", Rule::Setpoint(1));
        assert_eq!(
            c.rule_for("Bomba 1: ON Setpoint 1: x"),
            Some(Rule::Pump(1))
        );
    }

    #[test]
    fn unknown_lines_are_ignored() {
        let c = Classifier::flow_rig();
        assert_eq!(c.classify("Iniciando sistema..."), None);
        assert_eq!(c.classify(""), None);
    }
}
