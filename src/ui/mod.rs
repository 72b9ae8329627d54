//! Terminal panels for the rigs and for offline plots.

pub mod actuator;
pub mod plot;
pub mod pumps;

pub use actuator::ActuatorPanel;
pub use plot::{ComparisonPlot, PressurePlot};
pub use pumps::PumpsPanel;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
};
use std::{
    error::Error,
    io::{self, Stdout},
    time::{Duration, Instant},
};

/// One full-screen panel driven by [`run`].
pub trait Panel {
    /// Called every `tick` interval, before drawing.
    fn tick(&mut self) {}

    fn draw(&mut self, f: &mut Frame);

    /// Returns `false` to leave the panel.
    fn handle_key(&mut self, key: KeyCode) -> bool;
}

const TICK: Duration = Duration::from_millis(100);

fn event_loop<P: Panel>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    panel: &mut P,
) -> Result<(), Box<dyn Error>> {
    let mut last_tick = Instant::now();
    loop {
        if last_tick.elapsed() >= TICK {
            panel.tick();
            last_tick = Instant::now();
        }

        terminal.draw(|f| panel.draw(f))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !panel.handle_key(key.code) {
                    return Ok(());
                }
            }
        }
    }
}

/// Takes over the terminal until the panel quits, restoring it even when the
/// loop fails.
pub fn run<P: Panel>(panel: &mut P) -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, panel);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Axis bounds around `values` with `pad` on each side; never degenerate.
pub(crate) fn padded_bounds(values: impl Iterator<Item = f64>, pad: f64) -> [f64; 2] {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    if (hi - lo).abs() < f64::EPSILON {
        return [lo - pad.max(1.0), hi + pad.max(1.0)];
    }
    [lo - pad, hi + pad]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_padded() {
        assert_eq!(padded_bounds([1.0, 5.0, 3.0].into_iter(), 2.0), [-1.0, 7.0]);
    }

    #[test]
    fn flat_or_empty_bounds_stay_usable() {
        assert_eq!(padded_bounds(std::iter::empty(), 2.0), [0.0, 1.0]);
        assert_eq!(padded_bounds([4.0, 4.0].into_iter(), 0.0), [3.0, 5.0]);
    }

    #[test]
    fn popup_is_centered() {
        let r = centered_rect(50, 50, Rect::new(0, 0, 100, 40));
        assert_eq!((r.x, r.y, r.width, r.height), (25, 10, 50, 20));
    }
}
