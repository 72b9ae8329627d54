use crossterm::event::KeyCode;
use log::{info, warn};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Clear, Dataset, GraphType, List, ListItem, Paragraph, Row, Table, Wrap},
};

use super::{Panel, centered_rect, padded_bounds};
use crate::command::{MAX_DURATION_MS, MIN_DURATION_MS};
use crate::config::LabConfig;
use crate::link::LinkSettings;
use crate::rig::ActuatorRig;

const DEFAULT_DURATION_MS: u32 = 10_000;
const DEFAULT_PWM: u8 = 128;
const PWM_STEP: u8 = 8;

#[derive(Debug, PartialEq)]
enum InputMode {
    Normal,
    EditingDuration,
}

/// Control panel for the actuator rig.
pub struct ActuatorPanel {
    settings: LinkSettings,
    config: LabConfig,
    rig: Option<ActuatorRig>,

    input_mode: InputMode,
    edit_value: String,
    duration_ms: u32,
    pwm: u8,
    notice: Option<String>,
}

impl ActuatorPanel {
    pub fn new(settings: LinkSettings, config: LabConfig) -> Self {
        ActuatorPanel {
            settings,
            config,
            rig: None,
            input_mode: InputMode::Normal,
            edit_value: String::new(),
            duration_ms: DEFAULT_DURATION_MS,
            pwm: DEFAULT_PWM,
            notice: None,
        }
    }

    /// Starts with an already attached controller.
    pub fn with_rig(settings: LinkSettings, config: LabConfig, rig: ActuatorRig) -> Self {
        ActuatorPanel {
            rig: Some(rig),
            ..Self::new(settings, config)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.rig.is_some()
    }

    pub fn connect(&mut self) {
        if self.rig.is_some() {
            return;
        }
        match ActuatorRig::connect(&self.settings, &self.config) {
            Ok(rig) => {
                info!("Connected to {}", self.settings.port);
                self.notice = Some(format!("Connected to {}", self.settings.port));
                self.rig = Some(rig);
            }
            Err(e) => {
                warn!("Could not open {}: {}", self.settings.port, e);
                self.notice = Some(format!("Connection error: {}", e));
            }
        }
    }

    pub fn disconnect(&mut self) {
        let Some(rig) = self.rig.take() else {
            return;
        };
        self.notice = Some(match rig.disconnect() {
            Some(summary) => format!(
                "Disconnected, CSV saved: {} ({} rows)",
                summary.path.display(),
                summary.rows
            ),
            None => "Disconnected".to_string(),
        });
    }

    fn on_rig(&mut self, f: impl FnOnce(&mut ActuatorRig)) {
        match self.rig.as_mut() {
            Some(rig) => f(rig),
            None => self.notice = Some("Not connected (press 'c')".to_string()),
        }
    }

    fn apply_duration(&mut self) {
        let value = std::mem::take(&mut self.edit_value);
        self.input_mode = InputMode::Normal;
        let Ok(ms) = value.trim().parse::<u32>() else {
            self.notice = Some("Invalid value entered".to_string());
            return;
        };
        let mut outcome = None;
        self.on_rig(|rig| outcome = Some(rig.set_duration(ms)));
        match outcome {
            Some(Ok(())) => {
                self.duration_ms = ms;
                self.notice = Some(format!("Duration set to {} ms", ms));
            }
            Some(Err(e)) => self.notice = Some(e.to_string()),
            None => {}
        }
    }

    fn apply_pwm(&mut self) {
        let pwm = self.pwm;
        self.on_rig(|rig| rig.set_pwm(pwm));
    }

    fn draw_controls(&self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(8), Constraint::Length(5)])
            .split(area);

        let keys = [
            ("e", "Extend (compression)"),
            ("r", "Retract (expansion)"),
            ("f / b", "Jog forward / back"),
            ("s", "Release jog"),
            ("x", "EMERGENCY STOP"),
            ("t", "Edit duration"),
            ("+ / -", "Adjust PWM"),
            ("p", "Send PWM"),
            ("c", "Connect / disconnect"),
            ("q", "Quit"),
        ];
        let items: Vec<ListItem> = keys
            .iter()
            .map(|(key, what)| {
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:>6} ", key), Style::default().fg(Color::Yellow)),
                    Span::raw(*what),
                ]))
            })
            .collect();
        f.render_widget(
            List::new(items).block(Block::default().title("Controls").borders(Borders::ALL)),
            chunks[0],
        );

        let settings = Paragraph::new(vec![
            Line::from(format!("Duration: {} ms", self.duration_ms)),
            Line::from(format!("PWM: {} / 255", self.pwm)),
            Line::from(format!("Port: {} @ {}", self.settings.port, self.settings.baud)),
        ])
        .block(Block::default().title("Settings").borders(Borders::ALL));
        f.render_widget(settings, chunks[1]);
    }

    fn draw_chart(&self, f: &mut Frame, area: Rect) {
        let block = Block::default().title("Pressure (kPa)").borders(Borders::ALL);
        let Some(series) = self.rig.as_ref().map(|r| &r.state.pressure).filter(|s| !s.is_empty()) else {
            let no_data = Paragraph::new("No data available yet...")
                .block(block)
                .alignment(Alignment::Center);
            f.render_widget(no_data, area);
            return;
        };

        let t0 = series.first_time().unwrap_or_default();
        let data: Vec<(f64, f64)> = series.points().map(|(t, p)| (t - t0, p)).collect();
        let span = data.last().map_or(1.0, |&(t, _)| t.max(1.0));
        let y = padded_bounds(data.iter().map(|&(_, p)| p), 5.0);

        let dataset = Dataset::default()
            .name("Pressure")
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::Cyan))
            .graph_type(GraphType::Line)
            .data(&data);

        let chart = Chart::new(vec![dataset])
            .block(block)
            .x_axis(
                Axis::default()
                    .title("Time (s)")
                    .style(Style::default().fg(Color::Gray))
                    .bounds([0.0, span])
                    .labels(vec![Line::from("0"), Line::from(format!("{:.0}", span))]),
            )
            .y_axis(
                Axis::default()
                    .title("kPa")
                    .style(Style::default().fg(Color::Gray))
                    .bounds(y)
                    .labels(vec![
                        Line::from(format!("{:.0}", y[0])),
                        Line::from(format!("{:.0}", y[1])),
                    ]),
            );
        f.render_widget(chart, area);
    }

    fn draw_readings(&self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(5)])
            .split(area);

        let last = self.rig.as_ref().and_then(|r| r.state.last.as_ref());
        let pressure = last.map_or_else(|| "--".to_string(), |r| format!("{:.2} kPa", r.kpa));
        let current = Paragraph::new(pressure)
            .style(Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center)
            .block(Block::default().title("Pressure").borders(Borders::ALL));
        f.render_widget(current, chunks[0]);

        let temperature = match last {
            Some(r) => r.celsius.map_or_else(|| "ERROR".to_string(), |c| format!("{:.2} °C", c)),
            None => "--".to_string(),
        };
        let (link, csv, rows) = match &self.rig {
            Some(rig) => (
                if rig.is_reading() { "Reading" } else { "Reader stopped" },
                rig.logging_to()
                    .and_then(|p| p.file_name())
                    .map_or_else(|| "Idle".to_string(), |n| n.to_string_lossy().into_owned()),
                rig.logged_rows().to_string(),
            ),
            None => ("Disconnected", "Idle".to_string(), "0".to_string()),
        };
        let rows = vec![
            Row::new(vec!["Temperature".to_string(), temperature]),
            Row::new(vec!["Link".to_string(), link.to_string()]),
            Row::new(vec!["CSV".to_string(), csv]),
            Row::new(vec!["Rows".to_string(), rows]),
        ];
        let details = Table::new(rows, [Constraint::Length(12), Constraint::Min(10)])
            .block(Block::default().title("Details").borders(Borders::ALL))
            .column_spacing(1);
        f.render_widget(details, chunks[1]);
    }

    fn draw_console(&self, f: &mut Frame, area: Rect) {
        let height = area.height.saturating_sub(2) as usize;
        let lines: Vec<Line> = match &self.rig {
            Some(rig) => {
                let skip = rig.state.console.len().saturating_sub(height);
                rig.state.console.iter().skip(skip).map(|l| Line::from(l.as_str())).collect()
            }
            None => vec![Line::from("Not connected")],
        };
        let console = Paragraph::new(lines)
            .block(Block::default().title("Console").borders(Borders::ALL))
            .wrap(Wrap { trim: false });
        f.render_widget(console, area);
    }
}

impl Panel for ActuatorPanel {
    fn tick(&mut self) {
        if let Some(rig) = self.rig.as_mut() {
            rig.poll();
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(12),
                Constraint::Length(8),
                Constraint::Length(3),
            ])
            .split(f.area());

        let title = Paragraph::new("First Law - Actuator Rig")
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(30),
                Constraint::Percentage(40),
                Constraint::Percentage(30),
            ])
            .split(chunks[1]);
        self.draw_controls(f, main[0]);
        self.draw_chart(f, main[1]);
        self.draw_readings(f, main[2]);
        self.draw_console(f, chunks[2]);

        let status = match (&self.rig, &self.notice) {
            (_, Some(notice)) => Span::styled(notice.clone(), Style::default().fg(Color::Yellow)),
            (Some(_), None) => Span::styled("Connected", Style::default().fg(Color::Green)),
            (None, None) => Span::styled("Disconnected", Style::default().fg(Color::Red)),
        };
        f.render_widget(
            Paragraph::new(Line::from(status)).block(Block::default().borders(Borders::ALL)),
            chunks[3],
        );

        if self.input_mode == InputMode::EditingDuration {
            let area = centered_rect(40, 20, f.area());
            f.render_widget(Clear, area);
            let popup = Paragraph::new(self.edit_value.as_str())
                .style(Style::default().fg(Color::Yellow))
                .block(
                    Block::default()
                        .title(format!("Duration ms ({}-{})", MIN_DURATION_MS, MAX_DURATION_MS))
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Yellow)),
                );
            f.render_widget(popup, area);
        }
    }

    fn handle_key(&mut self, key: KeyCode) -> bool {
        match self.input_mode {
            InputMode::Normal => match key {
                KeyCode::Char('q') | KeyCode::Esc => {
                    self.disconnect();
                    return false;
                }
                KeyCode::Char('c') => {
                    if self.is_connected() {
                        self.disconnect();
                    } else {
                        self.connect();
                    }
                }
                KeyCode::Char('e') => self.on_rig(ActuatorRig::extend),
                KeyCode::Char('r') => self.on_rig(ActuatorRig::retract),
                KeyCode::Char('f') => self.on_rig(ActuatorRig::jog_forward),
                KeyCode::Char('b') => self.on_rig(ActuatorRig::jog_backward),
                KeyCode::Char('s') => self.on_rig(ActuatorRig::jog_release),
                KeyCode::Char('x') | KeyCode::Char(' ') => self.on_rig(ActuatorRig::emergency_stop),
                KeyCode::Char('t') => {
                    self.edit_value = self.duration_ms.to_string();
                    self.input_mode = InputMode::EditingDuration;
                }
                KeyCode::Char('+') | KeyCode::Char('=') => self.pwm = self.pwm.saturating_add(PWM_STEP),
                KeyCode::Char('-') => self.pwm = self.pwm.saturating_sub(PWM_STEP),
                KeyCode::Char('p') => self.apply_pwm(),
                _ => {}
            },
            InputMode::EditingDuration => match key {
                KeyCode::Enter => self.apply_duration(),
                KeyCode::Esc => {
                    self.input_mode = InputMode::Normal;
                    self.edit_value.clear();
                }
                KeyCode::Char(c) if c.is_ascii_digit() => self.edit_value.push(c),
                KeyCode::Backspace => {
                    self.edit_value.pop();
                }
                _ => {}
            },
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkSettingsBuilder;
    use std::io::{self, Cursor, Write};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

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

    fn panel(wire: &Wire) -> ActuatorPanel {
        let settings = LinkSettingsBuilder::default().port("test").build().unwrap();
        let config = LabConfig::default();
        let rig = ActuatorRig::attach(Cursor::new(Vec::new()), Box::new(wire.clone()), &config, Duration::ZERO)
            .unwrap();
        ActuatorPanel::with_rig(settings, config, rig)
    }

    fn press(panel: &mut ActuatorPanel, keys: &str) {
        for c in keys.chars() {
            panel.handle_key(KeyCode::Char(c));
        }
    }

    #[test]
    fn duration_popup_sends_validated_value() {
        let wire = Wire::default();
        let mut panel = panel(&wire);
        panel.handle_key(KeyCode::Char('t'));
        assert_eq!(panel.input_mode, InputMode::EditingDuration);
        for _ in 0..5 {
            panel.handle_key(KeyCode::Backspace);
        }
        press(&mut panel, "2500");
        panel.handle_key(KeyCode::Enter);
        assert_eq!(panel.input_mode, InputMode::Normal);
        assert_eq!(panel.duration_ms, 2500);
        assert_eq!(wire.0.lock().unwrap().as_slice(), b"T:2500\n");
    }

    #[test]
    fn out_of_range_duration_is_not_sent() {
        let wire = Wire::default();
        let mut panel = panel(&wire);
        panel.handle_key(KeyCode::Char('t'));
        panel.edit_value = "90000".to_string();
        panel.handle_key(KeyCode::Enter);
        assert_eq!(panel.duration_ms, DEFAULT_DURATION_MS);
        assert!(wire.0.lock().unwrap().is_empty());
        assert!(panel.notice.as_deref().unwrap().contains("between"));
    }

    #[test]
    fn pwm_is_adjusted_then_sent() {
        let wire = Wire::default();
        let mut panel = panel(&wire);
        press(&mut panel, "++-p");
        assert_eq!(panel.pwm, DEFAULT_PWM + PWM_STEP);
        assert_eq!(wire.0.lock().unwrap().as_slice(), b"P:136\n");
    }

    #[test]
    fn jog_keys_map_to_commands() {
        let wire = Wire::default();
        let mut panel = panel(&wire);
        press(&mut panel, "fsbs");
        assert_eq!(wire.0.lock().unwrap().as_slice(), b"FSBS");
    }

    #[test]
    fn commands_without_rig_only_warn() {
        let settings = LinkSettingsBuilder::default().port("none").build().unwrap();
        let mut panel = ActuatorPanel::new(settings, LabConfig::default());
        press(&mut panel, "e");
        assert!(panel.notice.as_deref().unwrap().starts_with("Not connected"));
        assert!(!panel.handle_key(KeyCode::Char('q')));
    }
}
