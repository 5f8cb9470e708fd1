//! Log setup: `<timestamp> - <LEVEL> - <message>` lines written to an
//! append-only file and to a console stream. The console is stderr, or a
//! [`LogBuffer`] the dashboard draws while it owns the terminal.

use std::collections::VecDeque;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tfmt, EnvFilter};

/// Event formatter for the `<timestamp> - <LEVEL> - <message>` layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct DashFormat;

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

impl<S, N> FormatEvent<S, N> for DashFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} - {} - ",
            Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            level_name(event.metadata().level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Bounded ring of formatted log lines, newest last.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, line: &str) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    /// The most recent `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().skip(lines.len().saturating_sub(n)).cloned().collect()
    }
}

/// Per-event writer; complete lines are pushed when the event is done.
pub struct LogBufferWriter {
    buffer: LogBuffer,
    pending: Vec<u8>,
}

impl io::Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let text = String::from_utf8_lossy(&self.pending);
        for line in text.lines().filter(|l| !l.is_empty()) {
            self.buffer.push(line);
        }
        self.pending.clear();
        Ok(())
    }
}

impl Drop for LogBufferWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter {
            buffer: self.clone(),
            pending: Vec::new(),
        }
    }
}

/// Where console log lines go.
#[derive(Debug, Clone)]
pub enum Console {
    Stderr,
    /// Kept in memory for the dashboard's log pane.
    Buffer(LogBuffer),
}

/// Installs the global subscriber. Without a `log_file` only the console
/// receives events.
pub fn init(log_file: Option<&Path>, console: Console, verbose: bool) -> Result<()> {
    let file = log_file
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))
        })
        .transpose()?;

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = file.map(|file| {
        tfmt::layer()
            .event_format(DashFormat)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    let (stderr_layer, buffer_layer) = match console {
        Console::Stderr => (
            Some(tfmt::layer().event_format(DashFormat).with_writer(io::stderr)),
            None,
        ),
        Console::Buffer(buffer) => (
            None,
            Some(
                tfmt::layer()
                    .event_format(DashFormat)
                    .with_ansi(false)
                    .with_writer(buffer),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .with(buffer_layer)
        .try_init()
        .context("Failed to set tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info, warn};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_line_format() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::registry().with(
            tfmt::layer()
                .event_format(DashFormat)
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            info!("Started capturing packets...");
            warn!("Possible attack from {} ({} frames)", "aa:bb:cc:dd:ee:ff", 16);
            error!("Capture error: device gone");
        });

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" - INFO - Started capturing packets..."));
        assert!(lines[1].ends_with(" - WARNING - Possible attack from aa:bb:cc:dd:ee:ff (16 frames)"));
        assert!(lines[2].ends_with(" - ERROR - Capture error: device gone"));

        // 2024-01-01 12:00:00,000
        let timestamp = lines[0].split(" - ").next().unwrap();
        assert_eq!(timestamp.len(), 23);
    }

    #[test]
    fn test_buffer_layer_keeps_latest_lines() {
        let buffer = LogBuffer::new(2);
        let subscriber = tracing_subscriber::registry().with(
            tfmt::layer()
                .event_format(DashFormat)
                .with_ansi(false)
                .with_writer(buffer.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            info!("Started capturing packets...");
            error!("Failed to disable monitor mode: exit status 1");
            error!("Dashboard render failed: terminal gone");
        });

        let lines = buffer.tail(10);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - ERROR - Failed to disable monitor mode: exit status 1"));
        assert!(lines[1].ends_with(" - ERROR - Dashboard render failed: terminal gone"));
        assert_eq!(buffer.tail(1), vec![lines[1].clone()]);
    }

    #[test]
    fn test_level_names() {
        assert_eq!(level_name(&Level::WARN), "WARNING");
        assert_eq!(level_name(&Level::INFO), "INFO");
        assert_eq!(level_name(&Level::ERROR), "ERROR");
    }
}
