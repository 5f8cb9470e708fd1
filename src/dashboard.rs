//! Dashboard rendering driven from the capture loop.
//!
//! [`DashboardRenderer`] turns a [`WindowSnapshot`] into a [`DashboardView`]
//! and hands it to a [`DisplaySink`]. It is ticked once per poll batch and
//! only redraws when the refresh interval has passed. Sink failures are
//! logged and never stop capture.

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossterm::{
    cursor::MoveTo,
    queue,
    terminal::{Clear, ClearType},
};
use tracing::{debug, error};

use crate::error::RenderError;
use crate::window::{Observation, WindowSnapshot};

/// Keep this many alert lines for display.
const RECENT_ALERTS: usize = 8;

/// Row status shown in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Attack,
    Watching,
}

impl Status {
    pub fn from_count(count: u64, threshold: u64) -> Self {
        if count > threshold {
            Self::Attack
        } else {
            Self::Watching
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attack => write!(f, "ATTACK"),
            Self::Watching => write!(f, "Watching"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardRow {
    pub address: String,
    pub count: u64,
    pub status: Status,
}

/// An alert as shown in the recent-alerts pane.
#[derive(Debug, Clone)]
pub struct AlertLine {
    pub at: DateTime<Local>,
    pub address: String,
    pub count: u64,
}

impl fmt::Display for AlertLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} frames)",
            self.at.format("%H:%M:%S"),
            self.address,
            self.count
        )
    }
}

/// Capture-side counters shown next to the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_seen: u64,
    pub deauth_frames: u64,
}

/// Everything a sink needs to draw one frame.
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub interface: String,
    pub window: u64,
    pub window_age: Duration,
    pub threshold: u64,
    pub stats: CaptureStats,
    pub rows: Vec<DashboardRow>,
    pub recent_alerts: Vec<AlertLine>,
}

impl DashboardView {
    pub fn build(
        interface: &str,
        snapshot: &WindowSnapshot,
        stats: CaptureStats,
        recent_alerts: &VecDeque<AlertLine>,
    ) -> Self {
        let rows = snapshot
            .counts
            .iter()
            .map(|(addr, count)| DashboardRow {
                address: addr.as_str().to_owned(),
                count: *count,
                status: Status::from_count(*count, snapshot.threshold),
            })
            .collect();

        Self {
            interface: interface.to_string(),
            window: snapshot.window,
            window_age: snapshot.started.elapsed(),
            threshold: snapshot.threshold,
            stats,
            rows,
            recent_alerts: recent_alerts.iter().rev().cloned().collect(),
        }
    }

    pub fn attacking(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.status == Status::Attack)
            .count()
    }
}

/// Where the dashboard is drawn.
pub trait DisplaySink: Send {
    fn render(&mut self, view: &DashboardView) -> Result<(), RenderError>;

    /// Releases the display. Called once when capture ends.
    fn finish(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}

pub struct DashboardRenderer {
    interface: String,
    sink: Box<dyn DisplaySink>,
    refresh: Duration,
    last_render: Option<Instant>,
    recent_alerts: VecDeque<AlertLine>,
    failures: u64,
}

impl DashboardRenderer {
    pub fn new(interface: impl Into<String>, sink: Box<dyn DisplaySink>, refresh: Duration) -> Self {
        Self {
            interface: interface.into(),
            sink,
            refresh,
            last_render: None,
            recent_alerts: VecDeque::with_capacity(RECENT_ALERTS),
            failures: 0,
        }
    }

    /// Remembers an alert for the recent-alerts pane.
    pub fn note_alert(&mut self, observation: &Observation) {
        if self.recent_alerts.len() == RECENT_ALERTS {
            self.recent_alerts.pop_front();
        }
        self.recent_alerts.push_back(AlertLine {
            at: Local::now(),
            address: observation.address.as_str().to_owned(),
            count: observation.count,
        });
    }

    /// Redraws if the refresh interval has elapsed since the last draw.
    pub fn tick(&mut self, snapshot: impl FnOnce() -> WindowSnapshot, stats: CaptureStats) {
        let due = self
            .last_render
            .map_or(true, |last| last.elapsed() >= self.refresh);
        if due {
            self.render_now(&snapshot(), stats);
        }
    }

    pub fn render_now(&mut self, snapshot: &WindowSnapshot, stats: CaptureStats) {
        let view = DashboardView::build(&self.interface, snapshot, stats, &self.recent_alerts);
        self.last_render = Some(Instant::now());

        if let Err(e) = self.sink.render(&view) {
            self.failures += 1;
            error!("Dashboard render failed: {}", e);
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn finish(&mut self) {
        if let Err(e) = self.sink.finish() {
            error!("Failed to release display: {}", e);
        } else {
            debug!("Display released");
        }
    }
}

/// Text table redrawn in place with cursor-home + clear.
pub struct PlainSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> PlainSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl PlainSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> DisplaySink for PlainSink<W> {
    fn render(&mut self, view: &DashboardView) -> Result<(), RenderError> {
        queue!(self.out, MoveTo(0, 0), Clear(ClearType::All))?;

        writeln!(
            self.out,
            "WiFi Deauth Detector - {} | window #{} ({}s) | threshold {} | frames {} | deauth {}",
            view.interface,
            view.window,
            view.window_age.as_secs(),
            view.threshold,
            view.stats.frames_seen,
            view.stats.deauth_frames,
        )?;
        writeln!(self.out)?;
        writeln!(self.out, "{:<20} {:>8} {:>10}", "MAC", "Frames", "Status")?;
        writeln!(self.out, "{}", "-".repeat(40))?;
        for row in &view.rows {
            writeln!(
                self.out,
                "{:<20} {:>8} {:>10}",
                row.address,
                row.count,
                row.status.to_string()
            )?;
        }

        if !view.recent_alerts.is_empty() {
            writeln!(self.out)?;
            writeln!(self.out, "Recent alerts:")?;
            for alert in &view.recent_alerts {
                writeln!(self.out, "  {}", alert)?;
            }
        }

        self.out.flush()?;
        Ok(())
    }
}
