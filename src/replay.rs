//! Offline Analysis Module
//!
//! Runs a saved capture through the same classifier, counter and alert
//! policy as a live session. Window boundaries come from packet timestamps:
//! window `n` covers `[first + n * interval, first + (n + 1) * interval)`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use pcap::Capture;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::frame::{Address, FrameClassifier, LinkType, RawFrame};
use crate::window::{AlertPolicy, WindowedCounter};

/// Output format for offline reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// An alert raised while replaying.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayAlert {
    pub address: String,
    pub window: u64,
    pub count: u64,
    /// Seconds since the first packet in the file
    pub offset_secs: f64,
}

/// Deauth frames seen from one address over the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressTotal {
    pub address: String,
    pub frames: u64,
    pub alerts: u64,
}

/// Result of an offline run.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub version: &'static str,
    pub threshold: u64,
    pub window_secs: f64,
    pub frames_read: u64,
    pub deauth_frames: u64,
    pub windows: u64,
    pub alerts: Vec<ReplayAlert>,
    pub totals: Vec<AddressTotal>,
}

/// Timestamp-windowed detector. Feed frames in file order, then call
/// [`ReplayAnalyzer::finish`].
pub struct ReplayAnalyzer {
    classifier: FrameClassifier,
    counter: WindowedCounter,
    policy: AlertPolicy,
    interval: Duration,
    first: Option<Duration>,
    window: u64,
    frames_read: u64,
    deauth_frames: u64,
    alerts: Vec<ReplayAlert>,
    totals: BTreeMap<Address, AddressTotal>,
}

impl ReplayAnalyzer {
    pub fn new(threshold: u64, interval: Duration) -> Self {
        Self {
            classifier: FrameClassifier::new(),
            counter: WindowedCounter::new(),
            policy: AlertPolicy::new(threshold),
            interval,
            first: None,
            window: 0,
            frames_read: 0,
            deauth_frames: 0,
            alerts: Vec::new(),
            totals: BTreeMap::new(),
        }
    }

    /// Processes one frame captured at `ts` (time since the epoch).
    pub fn observe(&mut self, ts: Duration, frame: &RawFrame) {
        self.frames_read += 1;
        let first = *self.first.get_or_insert(ts);
        let offset = ts.saturating_sub(first);

        // Out-of-order timestamps stay in the current window.
        let window = self.window_index(offset).max(self.window);
        if window != self.window {
            debug!(
                "Window {} closed with {} addresses, window {} begins",
                self.window,
                self.counter.len(),
                window
            );
            self.counter.clear();
            self.policy.clear();
            self.window = window;
        }

        let Some(address) = self.classifier.classify(frame) else {
            return;
        };
        self.deauth_frames += 1;

        let count = self.counter.increment(&address);
        let alert = self.policy.evaluate(&address, count);

        let total = self
            .totals
            .entry(address.clone())
            .or_insert_with(|| AddressTotal {
                address: address.as_str().to_owned(),
                frames: 0,
                alerts: 0,
            });
        total.frames = total.frames.saturating_add(1);

        if alert {
            total.alerts += 1;
            self.alerts.push(ReplayAlert {
                address: address.as_str().to_owned(),
                window: self.window,
                count,
                offset_secs: offset.as_secs_f64(),
            });
        }
    }

    fn window_index(&self, offset: Duration) -> u64 {
        let interval = self.interval.as_nanos().max(1);
        u64::try_from(offset.as_nanos() / interval).unwrap_or(u64::MAX)
    }

    pub fn finish(self) -> ReplayReport {
        let mut totals: Vec<AddressTotal> = self.totals.into_values().collect();
        totals.sort_by(|a, b| b.frames.cmp(&a.frames).then_with(|| a.address.cmp(&b.address)));

        ReplayReport {
            version: "1.0",
            threshold: self.policy.threshold(),
            window_secs: self.interval.as_secs_f64(),
            frames_read: self.frames_read,
            deauth_frames: self.deauth_frames,
            windows: if self.first.is_some() { self.window + 1 } else { 0 },
            alerts: self.alerts,
            totals,
        }
    }
}

/// Reads a pcap file and runs it through a [`ReplayAnalyzer`].
pub fn analyze_file(path: &Path, threshold: u64, interval: Duration) -> Result<ReplayReport> {
    if !path.exists() {
        anyhow::bail!("PCAP file not found: {}", path.display());
    }

    info!("Opening PCAP file: {}", path.display());
    let started = Instant::now();

    let mut cap = Capture::from_file(path).context("Failed to open PCAP file")?;
    let link = LinkType::from(cap.get_datalink());
    if let LinkType::Other(dlt) = link {
        warn!("Link type {} carries no 802.11 frames, nothing will match", dlt);
    }

    let mut analyzer = ReplayAnalyzer::new(threshold, interval);
    loop {
        let packet = match cap.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "Failed to read packet {} of {}",
                        analyzer.frames_read + 1,
                        path.display()
                    )
                });
            }
        };

        let ts = timestamp(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as i64);
        let frame = RawFrame::new(link, packet.data.to_vec());
        analyzer.observe(ts, &frame);
    }

    let report = analyzer.finish();
    info!(
        "Analysis complete: {} frames, {} deauth, {} alerts in {}ms",
        report.frames_read,
        report.deauth_frames,
        report.alerts.len(),
        started.elapsed().as_millis()
    );
    Ok(report)
}

fn timestamp(secs: i64, usecs: i64) -> Duration {
    let secs = u64::try_from(secs).unwrap_or(0);
    let nanos = u32::try_from(usecs.clamp(0, 999_999)).unwrap_or(0) * 1000;
    Duration::new(secs, nanos)
}

/// Formats a report for printing.
pub fn render_report(report: &ReplayReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(report).context("Failed to serialize report")
        }
        OutputFormat::Text => Ok(render_text(report)),
    }
}

fn render_text(report: &ReplayReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Deauth Analysis Report");
    let _ = writeln!(out, "======================");
    let _ = writeln!(
        out,
        "Threshold: {} frames per {:.0}s window",
        report.threshold, report.window_secs
    );
    let _ = writeln!(
        out,
        "Frames: {} read, {} deauth, {} windows",
        report.frames_read, report.deauth_frames, report.windows
    );
    let _ = writeln!(out);

    if report.alerts.is_empty() {
        let _ = writeln!(out, "Alerts: None");
    } else {
        let _ = writeln!(out, "Alerts ({}):", report.alerts.len());
        let _ = writeln!(out, "{:<20} {:>8} {:>8} {:>10}", "MAC", "Window", "Frames", "Offset");
        let _ = writeln!(out, "{}", "-".repeat(49));
        for alert in &report.alerts {
            let _ = writeln!(
                out,
                "{:<20} {:>8} {:>8} {:>9.1}s",
                alert.address, alert.window, alert.count, alert.offset_secs
            );
        }
    }
    let _ = writeln!(out);

    if report.totals.is_empty() {
        let _ = writeln!(out, "Sources: None");
    } else {
        let _ = writeln!(out, "Sources ({}):", report.totals.len());
        let _ = writeln!(out, "{:<20} {:>8} {:>8}", "MAC", "Frames", "Alerts");
        let _ = writeln!(out, "{}", "-".repeat(38));
        for total in &report.totals {
            let _ = writeln!(out, "{:<20} {:>8} {:>8}", total.address, total.frames, total.alerts);
        }
    }

    out
}
