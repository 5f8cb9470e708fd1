//! Terminal dashboard using Ratatui.
//!
//! [`TerminalSink`] is a [`DisplaySink`] that draws the live per-address table
//! on the alternate screen, with the tail of the console log underneath.
//! Raw mode swallows SIGINT, so it also watches the keyboard and turns `q`,
//! `Esc` and `Ctrl+C` into a stop request.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};

use crate::capture::StopHandle;
use crate::dashboard::{DashboardView, DisplaySink, Status};
use crate::error::RenderError;
use crate::logging::LogBuffer;

/// Log lines shown in the log pane.
const LOG_LINES: usize = 5;

/// Terminal type alias for convenience.
type Term = Terminal<CrosstermBackend<Stdout>>;

/// Interactive state kept between redraws.
#[derive(Default)]
struct UiState {
    table_state: TableState,
    show_help: bool,
    rows: usize,
}

impl UiState {
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers, stop: &StopHandle) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => stop.trigger(),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => stop.trigger(),
            KeyCode::Char('?') | KeyCode::Char('h') => self.show_help = !self.show_help,
            KeyCode::Down | KeyCode::Char('j') => self.next_row(),
            KeyCode::Up | KeyCode::Char('k') => self.prev_row(),
            _ => {}
        }
    }

    fn next_row(&mut self) {
        if self.rows == 0 {
            return;
        }
        let i = match self.table_state.selected() {
            Some(i) => (i + 1).min(self.rows - 1),
            None => 0,
        };
        self.table_state.select(Some(i));
    }

    fn prev_row(&mut self) {
        if self.rows == 0 {
            return;
        }
        let i = self
            .table_state
            .selected()
            .map_or(0, |i| i.saturating_sub(1));
        self.table_state.select(Some(i));
    }
}

/// Full-screen dashboard on the alternate screen.
pub struct TerminalSink {
    terminal: Term,
    state: UiState,
    stop: StopHandle,
    logs: LogBuffer,
    restored: bool,
}

impl TerminalSink {
    /// Takes over the terminal. `logs` is the console log stream.
    pub fn new(stop: StopHandle, logs: LogBuffer) -> Result<Self, RenderError> {
        Ok(Self {
            terminal: init_terminal()?,
            state: UiState::default(),
            stop,
            logs,
            restored: false,
        })
    }

    fn drain_input(&mut self) -> Result<(), RenderError> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    self.state.handle_key(key.code, key.modifiers, &self.stop);
                }
            }
        }
        Ok(())
    }
}

impl DisplaySink for TerminalSink {
    fn render(&mut self, view: &DashboardView) -> Result<(), RenderError> {
        self.drain_input()?;

        self.state.rows = view.rows.len();
        if let Some(selected) = self.state.table_state.selected() {
            if selected >= self.state.rows {
                self.state
                    .table_state
                    .select(self.state.rows.checked_sub(1));
            }
        }

        let logs = self.logs.tail(LOG_LINES);
        let state = &mut self.state;
        self.terminal.draw(|f| render(f, view, state, &logs))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RenderError> {
        if !self.restored {
            self.restored = true;
            restore_terminal(&mut self.terminal)?;
        }
        Ok(())
    }
}

impl Drop for TerminalSink {
    fn drop(&mut self) {
        if !self.restored {
            let _ = restore_terminal(&mut self.terminal);
        }
    }
}

fn init_terminal() -> Result<Term, RenderError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Term) -> Result<(), RenderError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn render(frame: &mut Frame, view: &DashboardView, state: &mut UiState, logs: &[String]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                    // Header
            Constraint::Length(3),                    // Stats
            Constraint::Min(8),                       // Table + alerts
            Constraint::Length(LOG_LINES as u16 + 2), // Log
            Constraint::Length(2),                    // Footer
        ])
        .split(frame.area());

    render_header(frame, chunks[0], view);
    render_stats(frame, chunks[1], view);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(chunks[2]);
    render_table(frame, body[0], view, state);
    render_alerts(frame, body[1], view);

    render_log(frame, chunks[3], logs);
    render_footer(frame, chunks[4]);

    if state.show_help {
        render_help_overlay(frame, view.threshold);
    }
}

fn render_header(frame: &mut Frame, area: Rect, view: &DashboardView) {
    let title = vec![
        Span::styled(
            "  WiFi Deauth Detector",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("monitoring {}", view.interface),
            Style::default().fg(Color::Gray),
        ),
    ];

    let header = Paragraph::new(Line::from(title)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    frame.render_widget(header, area);
}

fn stat_block(title: &str, value: String, color: Color) -> Paragraph<'_> {
    Paragraph::new(value)
        .style(Style::default().fg(color))
        .block(
            Block::default()
                .title(format!(" {} ", title))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color)),
        )
}

fn render_stats(frame: &mut Frame, area: Rect, view: &DashboardView) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25); 4])
        .split(area);

    let attacking = view.attacking();
    let attack_color = if attacking > 0 { Color::Red } else { Color::Green };

    frame.render_widget(
        stat_block(
            "Window",
            format!("#{} ({}s)", view.window, view.window_age.as_secs()),
            Color::Blue,
        ),
        chunks[0],
    );
    frame.render_widget(
        stat_block("Frames", view.stats.frames_seen.to_string(), Color::White),
        chunks[1],
    );
    frame.render_widget(
        stat_block("Deauth", view.stats.deauth_frames.to_string(), Color::Yellow),
        chunks[2],
    );
    frame.render_widget(
        stat_block("Under Attack", attacking.to_string(), attack_color),
        chunks[3],
    );
}

fn render_table(frame: &mut Frame, area: Rect, view: &DashboardView, state: &mut UiState) {
    let header = Row::new(
        ["MAC", "Frames", "Status"]
            .iter()
            .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).bold())),
    )
    .height(1)
    .bottom_margin(1);

    let rows: Vec<Row> = view
        .rows
        .iter()
        .map(|row| {
            let status_style = match row.status {
                Status::Attack => Style::default().fg(Color::Red).bold(),
                Status::Watching => Style::default().fg(Color::Green),
            };
            Row::new(vec![
                Cell::from(row.address.clone()),
                Cell::from(row.count.to_string()),
                Cell::from(row.status.to_string()).style(status_style),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(19),
            Constraint::Length(10),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(format!(" Deauth Monitor (threshold {}) ", view.threshold))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol(">> ");

    frame.render_stateful_widget(table, area, &mut state.table_state);
}

fn render_alerts(frame: &mut Frame, area: Rect, view: &DashboardView) {
    let items: Vec<ListItem> = view
        .recent_alerts
        .iter()
        .map(|alert| ListItem::new(alert.to_string()).style(Style::default().fg(Color::Red)))
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Recent Alerts ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red)),
    );

    frame.render_widget(list, area);
}

fn render_log(frame: &mut Frame, area: Rect, logs: &[String]) {
    let items: Vec<ListItem> = logs
        .iter()
        .map(|line| {
            let color = if line.contains(" - ERROR - ") {
                Color::Red
            } else if line.contains(" - WARNING - ") {
                Color::Yellow
            } else {
                Color::Gray
            };
            ListItem::new(line.as_str()).style(Style::default().fg(color))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Log ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    frame.render_widget(list, area);
}

fn render_footer(frame: &mut Frame, area: Rect) {
    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" q", Style::default().fg(Color::Yellow)),
        Span::raw(": Quit  "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(": Navigate  "),
        Span::styled("?", Style::default().fg(Color::Yellow)),
        Span::raw(": Help"),
    ]))
    .style(Style::default().fg(Color::Gray))
    .block(Block::default().borders(Borders::TOP));

    frame.render_widget(footer, area);
}

fn render_help_overlay(frame: &mut Frame, threshold: u64) {
    let area = centered_rect(60, 50, frame.area());

    let help_text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().bold().fg(Color::Cyan),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("q / Esc    ", Style::default().fg(Color::Yellow)),
            Span::raw("Stop capture and quit"),
        ]),
        Line::from(vec![
            Span::styled("↑ / k      ", Style::default().fg(Color::Yellow)),
            Span::raw("Move selection up"),
        ]),
        Line::from(vec![
            Span::styled("↓ / j      ", Style::default().fg(Color::Yellow)),
            Span::raw("Move selection down"),
        ]),
        Line::from(vec![
            Span::styled("? / h      ", Style::default().fg(Color::Yellow)),
            Span::raw("Toggle this help"),
        ]),
        Line::from(""),
        Line::from(Span::styled("Status", Style::default().bold().fg(Color::Cyan))),
        Line::from(""),
        Line::from(vec![
            Span::styled("ATTACK     ", Style::default().fg(Color::Red)),
            Span::raw(format!("more than {} deauth frames this window", threshold)),
        ]),
        Line::from(vec![
            Span::styled("Watching   ", Style::default().fg(Color::Green)),
            Span::raw("seen, below the threshold"),
        ]),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .title(" Help ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, area);
    frame.render_widget(help, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::{CaptureStats, DashboardRow};
    use ratatui::backend::TestBackend;

    fn view() -> DashboardView {
        DashboardView {
            interface: "wlan0mon".into(),
            window: 2,
            window_age: Duration::from_secs(4),
            threshold: 15,
            stats: CaptureStats {
                frames_seen: 120,
                deauth_frames: 21,
            },
            rows: vec![
                DashboardRow {
                    address: "aa:bb:cc:dd:ee:ff".into(),
                    count: 20,
                    status: Status::Attack,
                },
                DashboardRow {
                    address: "11:22:33:44:55:66".into(),
                    count: 1,
                    status: Status::Watching,
                },
            ],
            recent_alerts: vec![],
        }
    }

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_render_table_contents() {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        let mut state = UiState::default();
        let view = view();

        terminal.draw(|f| render(f, &view, &mut state, &[])).unwrap();
        let text = buffer_text(&terminal);

        assert!(text.contains("WiFi Deauth Detector"));
        assert!(text.contains("MAC"));
        assert!(text.contains("Frames"));
        assert!(text.contains("aa:bb:cc:dd:ee:ff"));
        assert!(text.contains("ATTACK"));
        assert!(text.contains("Watching"));
    }

    #[test]
    fn test_render_log_pane() {
        let mut terminal = Terminal::new(TestBackend::new(120, 34)).unwrap();
        let mut state = UiState::default();
        let logs = vec![
            "2024-05-01 12:00:00,000 - INFO - Started capturing packets...".to_string(),
            "2024-05-01 12:00:09,500 - ERROR - Failed to disable monitor mode".to_string(),
        ];

        terminal.draw(|f| render(f, &view(), &mut state, &logs)).unwrap();
        let text = buffer_text(&terminal);

        assert!(text.contains(" Log "));
        assert!(text.contains("Started capturing packets..."));
        assert!(text.contains("ERROR - Failed to disable monitor mode"));
    }

    #[test]
    fn test_quit_keys_trigger_stop() {
        let mut state = UiState::default();

        let stop = StopHandle::new();
        state.handle_key(KeyCode::Char('q'), KeyModifiers::NONE, &stop);
        assert!(stop.is_triggered());

        let stop = StopHandle::new();
        state.handle_key(KeyCode::Char('c'), KeyModifiers::CONTROL, &stop);
        assert!(stop.is_triggered());

        let stop = StopHandle::new();
        state.handle_key(KeyCode::Char('c'), KeyModifiers::NONE, &stop);
        assert!(!stop.is_triggered());
    }

    #[test]
    fn test_navigation_is_clamped() {
        let stop = StopHandle::new();
        let mut state = UiState {
            rows: 2,
            ..UiState::default()
        };

        state.handle_key(KeyCode::Down, KeyModifiers::NONE, &stop);
        state.handle_key(KeyCode::Down, KeyModifiers::NONE, &stop);
        state.handle_key(KeyCode::Down, KeyModifiers::NONE, &stop);
        assert_eq!(state.table_state.selected(), Some(1));

        state.handle_key(KeyCode::Up, KeyModifiers::NONE, &stop);
        state.handle_key(KeyCode::Up, KeyModifiers::NONE, &stop);
        assert_eq!(state.table_state.selected(), Some(0));
    }
}
