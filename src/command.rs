//! Commands written to the rig boards. Fire-and-forget: the boards send no
//! acknowledgement.

use std::fmt;

use crate::error::{LabError, Result};

pub const MIN_DURATION_MS: u32 = 1_000;
pub const MAX_DURATION_MS: u32 = 60_000;
pub const MAX_SETPOINT_LPM: f64 = 10.0;

pub trait WireCommand: fmt::Display {
    fn encode(&self) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    Extend,
    Retract,
    /// Jog while the operator holds the control.
    Forward,
    Backward,
    Stop,
    /// Movement duration for extend/retract, in ms.
    Duration(u32),
    Pwm(u8),
}

impl ActuatorCommand {
    pub fn duration(ms: u32) -> Result<Self> {
        if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&ms) {
            return Err(LabError::OutOfRange {
                what: "movement duration (ms)",
                min: MIN_DURATION_MS as f64,
                max: MAX_DURATION_MS as f64,
                value: ms as f64,
            });
        }
        Ok(ActuatorCommand::Duration(ms))
    }
}

impl WireCommand for ActuatorCommand {
    fn encode(&self) -> Vec<u8> {
        match self {
            ActuatorCommand::Extend => b"E".to_vec(),
            ActuatorCommand::Retract => b"R".to_vec(),
            ActuatorCommand::Forward => b"F".to_vec(),
            ActuatorCommand::Backward => b"B".to_vec(),
            ActuatorCommand::Stop => b"S".to_vec(),
            ActuatorCommand::Duration(ms) => format!("T:{}\n", ms).into_bytes(),
            ActuatorCommand::Pwm(pwm) => format!("P:{}\n", pwm).into_bytes(),
        }
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorCommand::Extend => f.write_str("extend"),
            ActuatorCommand::Retract => f.write_str("retract"),
            ActuatorCommand::Forward => f.write_str("jog forward"),
            ActuatorCommand::Backward => f.write_str("jog backward"),
            ActuatorCommand::Stop => f.write_str("stop"),
            ActuatorCommand::Duration(ms) => write!(f, "duration {} ms", ms),
            ActuatorCommand::Pwm(pwm) => write!(f, "PWM {}", pwm),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    One,
    Two,
}

impl Pump {
    pub const ALL: [Pump; 2] = [Pump::One, Pump::Two];

    pub fn number(self) -> u8 {
        match self {
            Pump::One => 1,
            Pump::Two => 2,
        }
    }

    pub fn index(self) -> usize {
        self.number() as usize - 1
    }

    pub fn other(self) -> Pump {
        match self {
            Pump::One => Pump::Two,
            Pump::Two => Pump::One,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpCommand {
    /// Target flow in L/min, one decimal of resolution.
    Setpoint { pump: Pump, lpm: f64 },
    AllOff,
    ResetVolumes,
}

impl PumpCommand {
    pub fn setpoint(pump: Pump, lpm: f64) -> Result<Self> {
        if !(0.0..=MAX_SETPOINT_LPM).contains(&lpm) {
            return Err(LabError::OutOfRange {
                what: "flow setpoint (L/min)",
                min: 0.0,
                max: MAX_SETPOINT_LPM,
                value: lpm,
            });
        }
        Ok(PumpCommand::Setpoint {
            pump,
            lpm: (lpm * 10.0).round() / 10.0,
        })
    }
}

impl WireCommand for PumpCommand {
    fn encode(&self) -> Vec<u8> {
        match self {
            PumpCommand::Setpoint { pump, lpm } => {
                format!("S{}:{:.1}\n", pump.number(), lpm).into_bytes()
            }
            PumpCommand::AllOff => b"OFF\n".to_vec(),
            PumpCommand::ResetVolumes => b"r\n".to_vec(),
        }
    }
}

impl fmt::Display for PumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpCommand::Setpoint { pump, lpm } => {
                write!(f, "pump {} setpoint {:.1} L/min", pump.number(), lpm)
            }
            PumpCommand::AllOff => f.write_str("all pumps off"),
            PumpCommand::ResetVolumes => f.write_str("reset volumes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actuator_encodings() {
        assert_eq!(ActuatorCommand::Extend.encode(), b"E");
        assert_eq!(ActuatorCommand::Retract.encode(), b"R");
        assert_eq!(ActuatorCommand::Forward.encode(), b"F");
        assert_eq!(ActuatorCommand::Backward.encode(), b"B");
        assert_eq!(ActuatorCommand::Stop.encode(), b"S");
        assert_eq!(ActuatorCommand::Pwm(255).encode(), b"P:255\n");
        assert_eq!(ActuatorCommand::duration(10_000).unwrap().encode(), b"T:10000\n");
    }

    #[test]
    fn duration_bounds() {
        assert!(ActuatorCommand::duration(999).is_err());
        assert!(ActuatorCommand::duration(1_000).is_ok());
        assert!(ActuatorCommand::duration(60_000).is_ok());
        assert!(ActuatorCommand::duration(60_001).is_err());
    }

    #[test]
    fn pump_encodings() {
        assert_eq!(
            PumpCommand::setpoint(Pump::One, 2.5).unwrap().encode(),
            b"S1:2.5\n"
        );
        assert_eq!(
            PumpCommand::setpoint(Pump::Two, 0.0).unwrap().encode(),
            b"S2:0.0\n"
        );
        assert_eq!(PumpCommand::AllOff.encode(), b"OFF\n");
        assert_eq!(PumpCommand::ResetVolumes.encode(), b"r\n");
    }

    #[test]
    fn setpoint_is_rounded_and_bounded() {
        let drifted = 0.1 + 0.2;
        assert_eq!(
            PumpCommand::setpoint(Pump::One, drifted).unwrap(),
            PumpCommand::Setpoint {
                pump: Pump::One,
                lpm: 0.3
            }
        );
        assert!(PumpCommand::setpoint(Pump::One, -0.1).is_err());
        assert!(PumpCommand::setpoint(Pump::One, 10.1).is_err());
    }
}
