use crossterm::event::KeyCode;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::Line,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
};

use super::{Panel, padded_bounds};
use crate::analysis::Experiment;

/// Pressure against sample number, with the mean as a reference line.
pub struct PressurePlot {
    title: String,
    points: Vec<(f64, f64)>,
    mean: Option<f64>,
}

impl PressurePlot {
    pub fn new(experiment: &Experiment) -> Self {
        let points: Vec<(f64, f64)> = experiment
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| (i as f64, s.kpa))
            .collect();
        let mean = experiment.summary().map(|s| s.mean_kpa);
        PressurePlot {
            title: format!("{} - {}", experiment.kind.label(), experiment.name),
            points,
            mean,
        }
    }

    fn render(&self, f: &mut Frame, area: Rect) {
        let block = Block::default().title(self.title.clone()).borders(Borders::ALL);
        if self.points.is_empty() {
            let empty = Paragraph::new("No samples")
                .block(block)
                .alignment(Alignment::Center);
            f.render_widget(empty, area);
            return;
        }

        let last = self.points.len().saturating_sub(1).max(1) as f64;
        let mean_line: Vec<(f64, f64)> = self
            .mean
            .map(|m| vec![(0.0, m), (last, m)])
            .unwrap_or_default();
        let y = padded_bounds(self.points.iter().map(|&(_, p)| p), 5.0);

        let mut datasets = vec![
            Dataset::default()
                .name("Pressure")
                .marker(symbols::Marker::Braille)
                .style(Style::default().fg(Color::Cyan))
                .graph_type(GraphType::Line)
                .data(&self.points),
        ];
        if let Some(m) = self.mean {
            datasets.push(
                Dataset::default()
                    .name(format!("Mean {:.2} kPa", m))
                    .marker(symbols::Marker::Dot)
                    .style(Style::default().fg(Color::Red))
                    .graph_type(GraphType::Line)
                    .data(&mean_line),
            );
        }

        let chart = Chart::new(datasets)
            .block(block)
            .x_axis(
                Axis::default()
                    .title("Sample #")
                    .style(Style::default().fg(Color::Gray))
                    .bounds([0.0, last])
                    .labels(vec![Line::from("0"), Line::from(format!("{:.0}", last))]),
            )
            .y_axis(
                Axis::default()
                    .title("Pressure (kPa)")
                    .style(Style::default().fg(Color::Gray))
                    .bounds(y)
                    .labels(vec![
                        Line::from(format!("{:.0}", y[0])),
                        Line::from(format!("{:.0}", y[1])),
                    ]),
            );
        f.render_widget(chart, area);
    }
}

fn footer(f: &mut Frame, area: Rect) {
    let help = Paragraph::new("q: close")
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center);
    f.render_widget(help, area);
}

fn quits(key: KeyCode) -> bool {
    matches!(key, KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter)
}

impl Panel for PressurePlot {
    fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(10), Constraint::Length(1)])
            .split(f.area());
        self.render(f, chunks[0]);
        footer(f, chunks[1]);
    }

    fn handle_key(&mut self, key: KeyCode) -> bool {
        !quits(key)
    }
}

/// Two experiments side by side.
pub struct ComparisonPlot {
    left: PressurePlot,
    right: PressurePlot,
}

impl ComparisonPlot {
    pub fn new(left: &Experiment, right: &Experiment) -> Self {
        ComparisonPlot {
            left: PressurePlot::new(left),
            right: PressurePlot::new(right),
        }
    }
}

impl Panel for ComparisonPlot {
    fn draw(&mut self, f: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(10),
                Constraint::Length(1),
            ])
            .split(f.area());
        let title = Paragraph::new("Experiment comparison")
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center);
        f.render_widget(title, rows[0]);

        let halves = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(rows[1]);
        self.left.render(f, halves[0]);
        self.right.render(f, halves[1]);
        footer(f, rows[2]);
    }

    fn handle_key(&mut self, key: KeyCode) -> bool {
        !quits(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaffold::EXAMPLE_CSV;
    use std::io::Cursor;

    #[test]
    fn plot_points_follow_samples() {
        let exp = Experiment::from_reader("ejemplo_extension.csv", Cursor::new(EXAMPLE_CSV)).unwrap();
        let mut plot = PressurePlot::new(&exp);
        assert_eq!(plot.points.len(), 10);
        assert_eq!(plot.points[9], (9.0, 168.9));
        assert!((plot.mean.unwrap() - 134.72).abs() < 1e-9);
        assert!(plot.title.starts_with("Extension"));
        assert!(plot.handle_key(KeyCode::Char('x')));
        assert!(!plot.handle_key(KeyCode::Char('q')));
    }
}
