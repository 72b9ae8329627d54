use derive_builder::Builder;
use log::{debug, info, warn};
use serialport::SerialPort;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Result;

/// How to open a rig's serial port.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct LinkSettings {
    pub port: String,
    #[builder(default = "9600")]
    pub baud: u32,
    /// Blocking read timeout; the reader re-checks its run flag this often.
    #[builder(default = "Duration::from_millis(1000)")]
    pub timeout: Duration,
    /// Time the board needs to reboot after the port opens.
    #[builder(default = "Duration::ZERO")]
    pub reset_delay: Duration,
    /// How long `disconnect` waits for the reader before closing the port.
    #[builder(default = "Duration::ZERO")]
    pub disconnect_grace: Duration,
}

pub fn open(settings: &LinkSettings) -> Result<Box<dyn SerialPort>> {
    info!("Opening {} at {} baud", settings.port, settings.baud);
    let port = serialport::new(&settings.port, settings.baud)
        .timeout(settings.timeout)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()?;
    Ok(port)
}

pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Decodes one raw line, dropping bytes that are not valid UTF-8.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Writes a command and flushes, with no acknowledgement expected.
pub fn send(port: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    debug!("Sending {:?}", String::from_utf8_lossy(bytes));
    port.write_all(bytes)?;
    port.flush()
}

/// Reads newline-terminated lines on a background thread until `running` is
/// cleared, the stream ends, a read fails, or `on_line` breaks.
///
/// Timeouts are expected on an idle serial port and only re-check the flag.
pub fn spawn_line_reader<R, F>(
    name: &str,
    source: R,
    running: Arc<AtomicBool>,
    mut on_line: F,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    F: FnMut(String) -> ControlFlow<()> + Send + 'static,
{
    let name = name.to_string();
    thread::Builder::new()
        .name(format!("{}-reader", name))
        .spawn(move || {
            let mut reader = BufReader::new(source);
            let mut buffer = Vec::new();
            while running.load(Ordering::Relaxed) {
                match reader.read_until(b'\n', &mut buffer) {
                    Ok(0) => {
                        info!("{}: serial stream closed", name);
                        break;
                    }
                    Ok(_) => {
                        let line = decode_line(&buffer);
                        buffer.clear();
                        if line.is_empty() {
                            continue;
                        }
                        if on_line(line).is_break() {
                            debug!("{}: consumer gone, stopping reader", name);
                            break;
                        }
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::TimedOut
                            || e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        warn!("{}: read error: {}", name, e);
                        break;
                    }
                }
            }
            debug!("{}: reader thread exiting", name);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    #[test]
    fn builder_defaults() {
        let settings = LinkSettingsBuilder::default()
            .port("/dev/ttyACM0")
            .build()
            .unwrap();
        assert_eq!(settings.baud, 9600);
        assert_eq!(settings.timeout, Duration::from_millis(1000));
        assert_eq!(settings.reset_delay, Duration::ZERO);
    }

    #[test]
    fn builder_requires_port() {
        assert!(LinkSettingsBuilder::default().baud(115_200u32).build().is_err());
    }

    #[test]
    fn decode_drops_invalid_bytes_and_whitespace() {
        assert_eq!(decode_line(b"  Bomba 1: ON\r\n"), "Bomba 1: ON");
        assert_eq!(decode_line(b"Sensor \xff1\n"), "Sensor 1");
        assert_eq!(decode_line("23.5°C\n".as_bytes()), "23.5°C");
    }

    #[test]
    fn reader_delivers_each_line_then_stops_at_eof() {
        let (tx, rx) = mpsc::channel();
        let source = Cursor::new(b"first\r\n\n  second \nthird".to_vec());
        let handle = spawn_line_reader("test", source, Arc::new(AtomicBool::new(true)), move |l| {
            match tx.send(l) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        })
        .unwrap();
        handle.join().unwrap();
        let lines: Vec<String> = rx.try_iter().collect();
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[test]
    fn cleared_flag_stops_before_reading() {
        let (tx, rx) = mpsc::channel();
        let source = Cursor::new(b"ignored\n".to_vec());
        let handle = spawn_line_reader("test", source, Arc::new(AtomicBool::new(false)), move |l| {
            let _ = tx.send(l);
            ControlFlow::Continue(())
        })
        .unwrap();
        handle.join().unwrap();
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn send_writes_exact_bytes() {
        let mut out = Vec::new();
        send(&mut out, b"T:5000\n").unwrap();
        assert_eq!(out, b"T:5000\n");
    }
}
