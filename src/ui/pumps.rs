use crossterm::event::KeyCode;
use log::{info, warn};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Clear, Dataset, GraphType, Paragraph, Row, Table},
};

use super::{Panel, centered_rect, padded_bounds};
use crate::command::{MAX_SETPOINT_LPM, Pump};
use crate::config::LabConfig;
use crate::link::LinkSettings;
use crate::rig::{FlowPanel, FlowRig, Series};

const SETPOINT_STEP: f64 = 0.1;
const SERIES_COLORS: [Color; 3] = [Color::Red, Color::Green, Color::Blue];

#[derive(Debug, PartialEq)]
enum InputMode {
    Normal,
    EditingSetpoint,
}

/// Monitor and setpoint control for the two-pump flow rig.
pub struct PumpsPanel {
    settings: LinkSettings,
    config: LabConfig,
    rig: Option<FlowRig>,
    idle: FlowPanel,

    selected: Pump,
    input_mode: InputMode,
    edit_value: String,
    notice: Option<String>,
}

impl PumpsPanel {
    pub fn new(settings: LinkSettings, config: LabConfig) -> Self {
        let idle = FlowPanel::new(config.history_len);
        PumpsPanel {
            settings,
            config,
            rig: None,
            idle,
            selected: Pump::One,
            input_mode: InputMode::Normal,
            edit_value: String::new(),
            notice: None,
        }
    }

    pub fn with_rig(settings: LinkSettings, config: LabConfig, rig: FlowRig) -> Self {
        PumpsPanel {
            rig: Some(rig),
            ..Self::new(settings, config)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.rig.is_some()
    }

    fn panel(&self) -> &FlowPanel {
        self.rig.as_ref().map_or(&self.idle, |r| &r.panel)
    }

    pub fn connect(&mut self) {
        if self.rig.is_some() {
            return;
        }
        self.notice = Some(format!("Connecting to {}...", self.settings.port));
        match FlowRig::connect(&self.settings, &self.config) {
            Ok(rig) => {
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
        if let Some(rig) = self.rig.take() {
            rig.disconnect();
            self.notice = Some("Disconnected".to_string());
        }
    }

    fn on_rig(&mut self, f: impl FnOnce(&mut FlowRig) -> Option<String>) {
        match self.rig.as_mut() {
            Some(rig) => {
                if let Some(notice) = f(rig) {
                    self.notice = Some(notice);
                }
            }
            None => self.notice = Some("Not connected (press 'c')".to_string()),
        }
    }

    fn nudge(&mut self, delta: f64) {
        let pump = self.selected;
        self.on_rig(|rig| match rig.nudge_setpoint(pump, delta) {
            Ok(lpm) => Some(format!("Pump {} setpoint {:.1} L/min", pump.number(), lpm)),
            Err(e) => Some(e.to_string()),
        });
    }

    fn apply_setpoint(&mut self) {
        let value = std::mem::take(&mut self.edit_value);
        self.input_mode = InputMode::Normal;
        let Ok(lpm) = value.trim().parse::<f64>() else {
            self.notice = Some("Invalid value entered".to_string());
            return;
        };
        let pump = self.selected;
        self.on_rig(|rig| match rig.set_setpoint(pump, lpm) {
            Ok(()) => Some(format!("Pump {} setpoint {:.1} L/min", pump.number(), rig.setpoint(pump))),
            Err(e) => Some(e.to_string()),
        });
    }

    fn draw_pump(&self, f: &mut Frame, area: Rect, pump: Pump) {
        let n = pump.number();
        let panel = self.panel();
        let state = panel.display(&format!("bomba{}", n));
        let state_color = match state.as_str() {
            "ON" => Color::Green,
            "OFF" => Color::Red,
            _ => Color::Gray,
        };
        let setpoint = self
            .rig
            .as_ref()
            .map_or_else(|| "--".to_string(), |r| format!("{:.1} L/min", r.setpoint(pump)));

        let rows = vec![
            Row::new(vec!["State".to_string(), state]).style(Style::default().fg(state_color)),
            Row::new(vec!["PWM".to_string(), panel.display(&format!("pwm{}", n))]),
            Row::new(vec!["Duty %".to_string(), panel.display(&format!("duty{}", n))]),
            Row::new(vec!["Mode".to_string(), panel.display(&format!("modo{}", n))]),
            Row::new(vec!["Setpoint".to_string(), setpoint]),
            Row::new(vec!["Error".to_string(), panel.display(&format!("error{}", n))]),
        ];
        let border = if self.selected == pump {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let table = Table::new(rows, [Constraint::Length(10), Constraint::Min(8)])
            .block(
                Block::default()
                    .title(format!("Pump {}", n))
                    .borders(Borders::ALL)
                    .border_style(border),
            )
            .column_spacing(1);
        f.render_widget(table, area);
    }

    fn draw_sensors(&self, f: &mut Frame, area: Rect) {
        let panel = self.panel();
        let mut rows: Vec<Row> = (1..=3)
            .map(|i| {
                Row::new(vec![
                    format!("Temp {}", i),
                    format!("{} °C", panel.display(&format!("temp{}", i))),
                ])
            })
            .collect();
        for i in 1..=2 {
            rows.push(Row::new(vec![
                format!("Flow {}", i),
                format!("{} L/min", panel.display(&format!("caudal{}", i))),
            ]));
            rows.push(Row::new(vec![
                format!("Volume {}", i),
                format!("{} L", panel.display(&format!("volumen{}", i))),
            ]));
        }
        let table = Table::new(rows, [Constraint::Length(10), Constraint::Min(10)])
            .block(Block::default().title("Sensors").borders(Borders::ALL))
            .column_spacing(1);
        f.render_widget(table, area);
    }

    fn draw_chart(f: &mut Frame, area: Rect, title: &str, unit: &str, series: &[(String, &Series)]) {
        let block = Block::default().title(title.to_string()).borders(Borders::ALL);
        let t0 = series
            .iter()
            .filter_map(|(_, s)| s.first_time())
            .fold(f64::INFINITY, f64::min);
        if !t0.is_finite() {
            let no_data = Paragraph::new("No data available yet...")
                .block(block)
                .alignment(Alignment::Center);
            f.render_widget(no_data, area);
            return;
        }

        let data: Vec<Vec<(f64, f64)>> = series
            .iter()
            .map(|(_, s)| s.points().map(|(t, v)| (t - t0, v)).collect())
            .collect();
        let span = data
            .iter()
            .flatten()
            .fold(1.0_f64, |acc, &(t, _)| acc.max(t));
        let y = padded_bounds(data.iter().flatten().map(|&(_, v)| v), 1.0);

        let datasets: Vec<Dataset> = series
            .iter()
            .zip(&data)
            .zip(SERIES_COLORS)
            .map(|(((name, _), points), color)| {
                Dataset::default()
                    .name(name.clone())
                    .marker(symbols::Marker::Braille)
                    .style(Style::default().fg(color))
                    .graph_type(GraphType::Line)
                    .data(points)
            })
            .collect();

        let chart = Chart::new(datasets)
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
                    .title(unit.to_string())
                    .style(Style::default().fg(Color::Gray))
                    .bounds(y)
                    .labels(vec![
                        Line::from(format!("{:.1}", y[0])),
                        Line::from(format!("{:.1}", y[1])),
                    ]),
            );
        f.render_widget(chart, area);
    }
}

impl Panel for PumpsPanel {
    fn tick(&mut self) {
        if let Some(rig) = self.rig.as_mut() {
            rig.poll();
            if !rig.is_reading() && self.notice.as_deref() != Some("Reader stopped") {
                info!("Flow rig reader stopped");
                self.notice = Some("Reader stopped".to_string());
            }
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(20),
                Constraint::Length(3),
            ])
            .split(f.area());

        let title = Paragraph::new("Second Law - Flow Rig")
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(chunks[1]);

        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(8),
                Constraint::Length(8),
                Constraint::Min(9),
            ])
            .split(main[0]);
        self.draw_pump(f, left[0], Pump::One);
        self.draw_pump(f, left[1], Pump::Two);
        self.draw_sensors(f, left[2]);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(main[1]);
        let panel = self.panel();
        let temps: Vec<(String, &Series)> = panel
            .temperatures
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("T{}", i + 1), s))
            .collect();
        let flows: Vec<(String, &Series)> = panel
            .flows
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("Q{}", i + 1), s))
            .collect();
        Self::draw_chart(f, right[0], "Temperatures", "°C", &temps);
        Self::draw_chart(f, right[1], "Flow rates", "L/min", &flows);

        let help = "Tab pump | ↑/↓ ±0.1 | Enter set | o all off | r reset vol | c connect | q quit";
        let mut status = vec![Span::styled(help, Style::default().fg(Color::Gray))];
        if let Some(notice) = &self.notice {
            status.push(Span::raw(" | "));
            status.push(Span::styled(notice.clone(), Style::default().fg(Color::Yellow)));
        }
        f.render_widget(
            Paragraph::new(Line::from(status)).block(Block::default().borders(Borders::ALL)),
            chunks[2],
        );

        if self.input_mode == InputMode::EditingSetpoint {
            let area = centered_rect(40, 20, f.area());
            f.render_widget(Clear, area);
            let popup = Paragraph::new(self.edit_value.as_str())
                .style(Style::default().fg(Color::Yellow))
                .block(
                    Block::default()
                        .title(format!(
                            "Pump {} setpoint L/min (0-{:.0})",
                            self.selected.number(),
                            MAX_SETPOINT_LPM
                        ))
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
                KeyCode::Tab => self.selected = self.selected.other(),
                KeyCode::Char('1') => self.selected = Pump::One,
                KeyCode::Char('2') => self.selected = Pump::Two,
                KeyCode::Up => self.nudge(SETPOINT_STEP),
                KeyCode::Down => self.nudge(-SETPOINT_STEP),
                KeyCode::Enter => {
                    self.edit_value = self
                        .rig
                        .as_ref()
                        .map(|r| format!("{:.1}", r.setpoint(self.selected)))
                        .unwrap_or_default();
                    self.input_mode = InputMode::EditingSetpoint;
                }
                KeyCode::Char('o') => self.on_rig(|rig| {
                    rig.all_off().then(|| "All pumps off".to_string())
                }),
                KeyCode::Char('r') => self.on_rig(|rig| {
                    rig.reset_volumes().then(|| "Volumes reset".to_string())
                }),
                _ => {}
            },
            InputMode::EditingSetpoint => match key {
                KeyCode::Enter => self.apply_setpoint(),
                KeyCode::Esc => {
                    self.input_mode = InputMode::Normal;
                    self.edit_value.clear();
                }
                KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => self.edit_value.push(c),
                KeyCode::Backspace => {
                    self.edit_value.pop();
                }
                _ => {}
            },
        }
        true
    }
}
