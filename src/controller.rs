//! Session lifecycle.
//!
//! Start order: enable monitor mode, start the reset scheduler, open the
//! capture source, spawn the capture loop. Stop order: stop the capture loop
//! and wait for it, cancel the scheduler, disable monitor mode. Every exit
//! path (explicit stop, interrupt, quit key, capture error) goes through
//! [`Controller::stop`], which is a no-op when nothing is running.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::adapter::AdapterControl;
use crate::capture::{CaptureExit, CaptureHandle, CaptureLoop, CapturePhase, FrameSource, PhaseCell, StopHandle};
use crate::config::Config;
use crate::dashboard::{DashboardRenderer, DisplaySink, PlainSink};
use crate::error::{CaptureError, RenderError, StartError};
use crate::scheduler::ResetScheduler;
use crate::window::DetectionWindow;

/// Fixed session parameters.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub interface: String,
    pub monitor_interface: String,
    pub threshold: u64,
    pub window_interval: Duration,
    pub poll_timeout: Duration,
    pub refresh_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interface: config.capture.interface.clone(),
            monitor_interface: config.capture.monitor_interface(),
            threshold: config.detection.threshold,
            window_interval: config.window_interval(),
            poll_timeout: config.poll_timeout(),
            refresh_interval: config.refresh_interval(),
        }
    }
}

struct Session {
    scheduler: ResetScheduler,
    capture: CaptureHandle,
}

pub struct Controller<A: AdapterControl> {
    adapter: A,
    settings: SessionSettings,
    window: Arc<DetectionWindow>,
    phase: PhaseCell,
    stop: StopHandle,
    session: Option<Session>,
}

impl<A: AdapterControl> Controller<A> {
    pub fn new(adapter: A, settings: SessionSettings) -> Self {
        let window = Arc::new(DetectionWindow::new(settings.threshold));
        Self {
            adapter,
            settings,
            window,
            phase: PhaseCell::new(),
            stop: StopHandle::new(),
            session: None,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> PhaseCell {
        self.phase.clone()
    }

    pub fn window(&self) -> Arc<DetectionWindow> {
        Arc::clone(&self.window)
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Starts a session.
    ///
    /// `open_source` receives the monitor interface name. `make_sink`
    /// receives the stop handle so an interactive display can request a stop;
    /// if it fails the dashboard falls back to plain output.
    pub async fn start<S, O, K>(&mut self, open_source: O, make_sink: K) -> Result<(), StartError>
    where
        S: FrameSource + 'static,
        O: FnOnce(&str) -> Result<S, CaptureError>,
        K: FnOnce(StopHandle) -> Result<Box<dyn DisplaySink>, RenderError>,
    {
        if self.session.is_some() {
            warn!("Start requested while already running");
            return Ok(());
        }

        self.phase.set(CapturePhase::Starting);
        self.stop.reset();

        if let Err(e) = self.adapter.enable(&self.settings.interface).await {
            error!("Failed to enable monitor mode: {}", e);
            self.phase.set(CapturePhase::Stopped);
            return Err(e.into());
        }

        self.window = Arc::new(DetectionWindow::new(self.settings.threshold));
        let scheduler = ResetScheduler::start(self.window(), self.settings.window_interval);

        let source = match open_source(&self.settings.monitor_interface) {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to open capture: {}", e);
                self.rollback(scheduler).await;
                return Err(e.into());
            }
        };

        let sink = make_sink(self.stop.clone()).unwrap_or_else(|e| {
            error!("Dashboard unavailable ({}), using plain output", e);
            Box::new(PlainSink::stdout()) as Box<dyn DisplaySink>
        });
        let renderer = DashboardRenderer::new(
            self.settings.monitor_interface.clone(),
            sink,
            self.settings.refresh_interval,
        );

        let capture = CaptureLoop::new(
            source,
            self.window(),
            renderer,
            self.settings.poll_timeout,
            self.stop.clone(),
            self.phase.clone(),
        );

        match capture.spawn() {
            Ok(capture) => {
                self.session = Some(Session { scheduler, capture });
                Ok(())
            }
            Err(e) => {
                error!("Failed to start capture loop: {}", e);
                self.rollback(scheduler).await;
                Err(e.into())
            }
        }
    }

    async fn rollback(&mut self, scheduler: ResetScheduler) {
        scheduler.cancel().await;
        self.disable_adapter().await;
        self.phase.set(CapturePhase::Stopped);
    }

    async fn disable_adapter(&self) {
        if let Err(e) = self.adapter.disable(&self.settings.monitor_interface).await {
            error!("Failed to disable monitor mode: {}", e);
        }
    }

    /// Resolves when the capture loop ends on its own (quit key or capture
    /// error). Returns immediately when nothing is running.
    pub async fn wait(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.capture.finished().await;
        }
    }

    /// Tears the session down in order. Returns how the capture loop ended,
    /// or `None` when there was nothing to stop.
    pub async fn stop(&mut self) -> Option<CaptureExit> {
        let Some(session) = self.session.take() else {
            debug!("Stop requested while not running");
            return None;
        };

        let exit = session.capture.stop().await;
        session.scheduler.cancel().await;
        self.disable_adapter().await;
        self.phase.set(CapturePhase::Stopped);

        info!("Stopped");
        Some(exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::{deauths, ScriptedSource};
    use crate::dashboard::tests::RecordingSink;
    use crate::error::AdapterModeError;
    use crate::frame::Address;
    use std::sync::Mutex;

    /// Records adapter calls and the capture phase seen at disable time.
    #[derive(Clone, Default)]
    struct FakeAdapter {
        calls: Arc<Mutex<Vec<String>>>,
        fail_enable: bool,
        fail_disable: bool,
        phase: Arc<Mutex<Option<PhaseCell>>>,
        phase_at_disable: Arc<Mutex<Option<CapturePhase>>>,
    }

    fn failure(action: &'static str, interface: &str) -> AdapterModeError {
        AdapterModeError::Spawn {
            tool: "fake".into(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{action} {interface}"),
            ),
        }
    }

    impl AdapterControl for FakeAdapter {
        async fn enable(&self, interface: &str) -> Result<(), AdapterModeError> {
            self.calls.lock().unwrap().push(format!("enable {interface}"));
            if self.fail_enable {
                return Err(failure("start", interface));
            }
            Ok(())
        }

        async fn disable(&self, monitor_interface: &str) -> Result<(), AdapterModeError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("disable {monitor_interface}"));
            let phase = self.phase.lock().unwrap().as_ref().map(PhaseCell::get);
            *self.phase_at_disable.lock().unwrap() = phase;
            if self.fail_disable {
                return Err(failure("stop", monitor_interface));
            }
            Ok(())
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            interface: "wlan0".into(),
            monitor_interface: "wlan0mon".into(),
            threshold: 15,
            window_interval: Duration::from_secs(10),
            poll_timeout: Duration::from_millis(10),
            refresh_interval: Duration::ZERO,
        }
    }

    fn controller(adapter: &FakeAdapter) -> Controller<FakeAdapter> {
        let controller = Controller::new(adapter.clone(), settings());
        *adapter.phase.lock().unwrap() = Some(controller.phase());
        controller
    }

    fn recording_sink(_stop: StopHandle) -> Result<Box<dyn DisplaySink>, RenderError> {
        Ok(Box::new(RecordingSink::default()))
    }

    fn attacker() -> Address {
        Address::new("aa:bb:cc:dd:ee:ff")
    }

    #[tokio::test]
    async fn test_start_then_stop_disables_once() {
        let adapter = FakeAdapter::default();
        let mut controller = controller(&adapter);

        controller
            .start(|_| Ok(ScriptedSource::new(vec![Ok(deauths(20))])), recording_sink)
            .await
            .unwrap();
        assert!(controller.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let exit = controller.stop().await;
        assert!(matches!(exit, Some(CaptureExit::Requested)));
        assert_eq!(controller.phase().get(), CapturePhase::Stopped);
        assert_eq!(
            *adapter.phase_at_disable.lock().unwrap(),
            Some(CapturePhase::Stopped)
        );

        assert!(controller.stop().await.is_none());
        assert_eq!(
            *adapter.calls.lock().unwrap(),
            vec!["enable wlan0".to_string(), "disable wlan0mon".to_string()]
        );
        assert_eq!(controller.window().snapshot().count_of(&attacker()), 20);
    }

    #[tokio::test]
    async fn test_enable_failure_aborts_start() {
        let adapter = FakeAdapter {
            fail_enable: true,
            ..FakeAdapter::default()
        };
        let mut controller = controller(&adapter);
        let mut opened = false;

        let result = controller
            .start(
                |_| {
                    opened = true;
                    Ok(ScriptedSource::new(vec![]))
                },
                recording_sink,
            )
            .await;

        assert!(matches!(result, Err(StartError::Adapter(_))));
        assert!(!opened);
        assert!(!controller.is_running());
        assert_eq!(controller.phase().get(), CapturePhase::Stopped);
        assert_eq!(*adapter.calls.lock().unwrap(), vec!["enable wlan0".to_string()]);
        assert!(controller.stop().await.is_none());
    }

    #[tokio::test]
    async fn test_source_failure_rolls_back_adapter() {
        let adapter = FakeAdapter::default();
        let mut controller = controller(&adapter);

        let result = controller
            .start(
                |device| -> Result<ScriptedSource, CaptureError> {
                    Err(CaptureError::DeviceOpen {
                        device: device.to_string(),
                        source: pcap::Error::PcapError("no such device".into()),
                    })
                },
                recording_sink,
            )
            .await;

        assert!(matches!(result, Err(StartError::Capture(_))));
        assert_eq!(
            *adapter.calls.lock().unwrap(),
            vec!["enable wlan0".to_string(), "disable wlan0mon".to_string()]
        );
        assert!(controller.stop().await.is_none());
        assert_eq!(adapter.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_capture_error_converges_on_stop() {
        let adapter = FakeAdapter::default();
        let mut controller = controller(&adapter);

        controller
            .start(
                |_| {
                    Ok(ScriptedSource::new(vec![
                        Ok(deauths(5)),
                        Err(CaptureError::PacketRead(pcap::Error::PcapError(
                            "driver reset".into(),
                        ))),
                    ]))
                },
                recording_sink,
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), controller.wait())
            .await
            .expect("capture loop should end on its own");

        let exit = controller.stop().await;
        assert!(matches!(exit, Some(CaptureExit::Failed(_))));
        assert_eq!(
            *adapter.calls.lock().unwrap(),
            vec!["enable wlan0".to_string(), "disable wlan0mon".to_string()]
        );
        assert!(controller.stop().await.is_none());
    }

    #[tokio::test]
    async fn test_sink_stop_request_ends_capture() {
        let adapter = FakeAdapter::default();
        let mut controller = controller(&adapter);

        controller
            .start(
                |_| Ok(ScriptedSource::new(vec![])),
                |stop: StopHandle| -> Result<Box<dyn DisplaySink>, RenderError> {
                    // An interactive sink would do this on a quit key.
                    stop.trigger();
                    Ok(Box::new(RecordingSink::default()))
                },
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), controller.wait())
            .await
            .expect("quit request should end the capture loop");
        assert!(matches!(
            controller.stop().await,
            Some(CaptureExit::Requested)
        ));
    }

    #[tokio::test]
    async fn test_disable_failure_does_not_block_stop() {
        let adapter = FakeAdapter {
            fail_disable: true,
            ..FakeAdapter::default()
        };
        let mut controller = controller(&adapter);

        controller
            .start(|_| Ok(ScriptedSource::new(vec![])), recording_sink)
            .await
            .unwrap();

        assert!(controller.stop().await.is_some());
        assert!(!controller.is_running());
        assert_eq!(controller.phase().get(), CapturePhase::Stopped);
    }

    #[tokio::test]
    async fn test_wait_without_session_returns() {
        let adapter = FakeAdapter::default();
        let mut controller = controller(&adapter);
        tokio::time::timeout(Duration::from_secs(1), controller.wait())
            .await
            .unwrap();
    }
}
