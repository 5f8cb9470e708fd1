//! Capture loop - pulls frames from the monitor interface and feeds the
//! detection window.
//!
//! The loop runs on a dedicated thread. Every iteration checks the stop flag,
//! polls the source for at most one poll timeout, routes deauth frames through
//! the classifier into the [`DetectionWindow`], and then ticks the dashboard.
//! A capture error ends the loop the same way a stop request does.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pcap::{Active, Capture, Device};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::dashboard::{CaptureStats, DashboardRenderer};
use crate::error::CaptureError;
use crate::frame::{FrameClassifier, LinkType, RawFrame};
use crate::window::DetectionWindow;

/// Upper bound on frames gathered by a single poll.
const MAX_BATCH: usize = 1024;

/// Cooperative stop flag shared between the controller, the capture thread
/// and the TUI key handler.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Re-arms the flag for a new session.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Lifecycle of the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CapturePhase {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl CapturePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Shared, lock-free view of the current [`CapturePhase`].
#[derive(Debug, Clone)]
pub struct PhaseCell(Arc<AtomicU8>);

impl PhaseCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(CapturePhase::Stopped as u8)))
    }

    pub fn get(&self) -> CapturePhase {
        CapturePhase::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, phase: CapturePhase) {
        let previous = CapturePhase::from_u8(self.0.swap(phase as u8, Ordering::SeqCst));
        if previous != phase {
            debug!("Capture phase {} -> {}", previous, phase);
        }
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A source of raw captured frames.
pub trait FrameSource: Send {
    /// Returns the frames available within `timeout` (possibly none).
    fn poll(&mut self, timeout: Duration) -> Result<Vec<RawFrame>, CaptureError>;
}

/// libpcap capture on the monitor interface.
pub struct PcapSource {
    cap: Capture<Active>,
    link: LinkType,
}

impl PcapSource {
    pub fn open(device: &str, promiscuous: bool, read_timeout: Duration) -> Result<Self, CaptureError> {
        info!("Opening capture on device: {}", device);

        let timeout_ms = i32::try_from(read_timeout.as_millis()).unwrap_or(i32::MAX).max(1);
        let cap = Capture::from_device(device)
            .map_err(|e| CaptureError::DeviceOpen {
                device: device.to_string(),
                source: e,
            })?
            .promisc(promiscuous)
            .immediate_mode(true)
            .timeout(timeout_ms)
            .open()
            .map_err(|e| CaptureError::DeviceOpen {
                device: device.to_string(),
                source: e,
            })?;

        let link = LinkType::from(cap.get_datalink());
        if let LinkType::Other(dlt) = link {
            warn!(
                "Device {} reports link type {}, expected radiotap (127) or 802.11 (105); no frames will match",
                device, dlt
            );
        }

        Ok(Self { cap, link })
    }
}

impl FrameSource for PcapSource {
    fn poll(&mut self, timeout: Duration) -> Result<Vec<RawFrame>, CaptureError> {
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::new();

        while frames.len() < MAX_BATCH && Instant::now() < deadline {
            match self.cap.next_packet() {
                Ok(packet) => frames.push(RawFrame::new(self.link, packet.data.to_vec())),
                Err(pcap::Error::TimeoutExpired) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(frames)
    }
}

/// Why the capture loop ended.
#[derive(Debug)]
pub enum CaptureExit {
    Requested,
    Failed(CaptureError),
    /// The capture thread panicked before reporting.
    Panicked,
}

/// The capture loop and everything it drives.
pub struct CaptureLoop<S: FrameSource> {
    source: S,
    classifier: FrameClassifier,
    window: Arc<DetectionWindow>,
    renderer: DashboardRenderer,
    poll_timeout: Duration,
    stop: StopHandle,
    phase: PhaseCell,
    stats: CaptureStats,
}

impl<S: FrameSource> CaptureLoop<S> {
    pub fn new(
        source: S,
        window: Arc<DetectionWindow>,
        renderer: DashboardRenderer,
        poll_timeout: Duration,
        stop: StopHandle,
        phase: PhaseCell,
    ) -> Self {
        Self {
            source,
            classifier: FrameClassifier::new(),
            window,
            renderer,
            poll_timeout,
            stop,
            phase,
            stats: CaptureStats::default(),
        }
    }

    /// Runs until stopped or the source fails. Consumes the loop so the
    /// source is released on return.
    pub fn run(mut self) -> CaptureExit {
        self.phase.set(CapturePhase::Running);
        info!("Started capturing packets...");

        let exit = loop {
            if self.stop.is_triggered() {
                break CaptureExit::Requested;
            }

            match self.source.poll(self.poll_timeout) {
                Ok(frames) => {
                    self.process_batch(frames);
                    let window = &self.window;
                    self.renderer.tick(|| window.snapshot(), self.stats);
                }
                Err(e) => {
                    error!("Capture error: {}", e);
                    break CaptureExit::Failed(e);
                }
            }
        };

        self.phase.set(CapturePhase::Stopping);
        self.renderer.finish();
        info!(
            "Capture loop finished: {} frames seen, {} deauth frames",
            self.stats.frames_seen, self.stats.deauth_frames
        );
        if self.renderer.failures() > 0 {
            warn!("Dashboard failed to render {} times", self.renderer.failures());
        }

        let phase = self.phase.clone();
        drop(self);
        phase.set(CapturePhase::Stopped);

        exit
    }

    fn process_batch(&mut self, frames: Vec<RawFrame>) {
        for frame in frames {
            self.stats.frames_seen += 1;

            let Some(address) = self.classifier.classify(&frame) else {
                continue;
            };
            self.stats.deauth_frames += 1;
            if address.is_unknown() {
                debug!("Deauth frame too short to carry a source address");
            }

            let observation = self.window.record(address);
            if observation.alert {
                warn!(
                    "Possible attack from {} ({} frames)",
                    observation.address, observation.count
                );
                self.renderer.note_alert(&observation);
            }
        }
    }
}

impl<S: FrameSource + 'static> CaptureLoop<S> {
    /// Starts the loop on a dedicated thread.
    pub fn spawn(self) -> Result<CaptureHandle, CaptureError> {
        let (exit_tx, exit_rx) = oneshot::channel();
        let stop = self.stop.clone();
        let phase = self.phase.clone();

        let thread = thread::Builder::new()
            .name("deauth-capture".into())
            .spawn(move || {
                let exit = self.run();
                let _ = exit_tx.send(exit);
            })
            .map_err(CaptureError::Thread)?;

        Ok(CaptureHandle {
            stop,
            phase,
            exit_rx,
            exit: None,
            thread: Some(thread),
        })
    }
}

/// Owner-side handle to the capture thread.
pub struct CaptureHandle {
    stop: StopHandle,
    phase: PhaseCell,
    exit_rx: oneshot::Receiver<CaptureExit>,
    exit: Option<CaptureExit>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Resolves once the loop has ended, without asking it to stop.
    pub async fn finished(&mut self) {
        if self.exit.is_none() {
            let exit = match (&mut self.exit_rx).await {
                Ok(exit) => exit,
                // Sender dropped without a report: the thread unwound.
                Err(_) => {
                    error!("Capture error: capture thread panicked");
                    self.phase.set(CapturePhase::Stopped);
                    CaptureExit::Panicked
                }
            };
            self.exit = Some(exit);
        }
    }

    /// Requests a stop, waits for the loop and joins its thread.
    pub async fn stop(mut self) -> CaptureExit {
        self.stop.trigger();
        self.finished().await;

        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => debug!("Joined panicked capture thread"),
                Err(e) => error!("Failed to join capture thread: {}", e),
            }
        }

        self.exit.take().unwrap_or(CaptureExit::Panicked)
    }
}

/// Lists available network devices for capture.
pub fn list_devices() -> Result<Vec<Device>, CaptureError> {
    Ok(Device::list()?)
}
