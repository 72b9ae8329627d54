//! One controller object per rig: owns the writing half of the port, the run
//! flag shared with its reader thread, and the receiving end of the channel
//! the reader reports on.

pub mod actuator;
pub mod flow;

pub use actuator::{ActuatorEvent, ActuatorRig, ActuatorState};
pub use flow::{FlowPanel, FlowRig};

use log::debug;
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Bounded (time, value) history for one chart line.
#[derive(Debug, Clone)]
pub struct Series {
    capacity: usize,
    points: VecDeque<(f64, f64)>,
}

impl Series {
    pub fn new(capacity: usize) -> Self {
        Series {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, t: f64, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((t, value));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.points.back().map(|&(_, v)| v)
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().copied()
    }

    pub fn first_time(&self) -> Option<f64> {
        self.points.front().map(|&(t, _)| t)
    }
}

/// Waits `grace` and joins the reader only if it has already exited.
fn soft_join(name: &str, reader: Option<JoinHandle<()>>, grace: Duration) {
    if !grace.is_zero() {
        thread::sleep(grace);
    }
    match reader {
        Some(handle) if handle.is_finished() => {
            if handle.join().is_err() {
                debug!("{} reader thread panicked", name);
            }
        }
        Some(_) => debug!("{} reader still blocked in a read, detaching", name),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_is_bounded() {
        let mut s = Series::new(50);
        for i in 0..120 {
            s.push(i as f64, i as f64 * 2.0);
        }
        assert_eq!(s.len(), 50);
        assert_eq!(s.first_time(), Some(70.0));
        assert_eq!(s.latest(), Some(238.0));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut s = Series::new(0);
        s.push(0.0, 1.0);
        assert!(s.is_empty());
    }
}
