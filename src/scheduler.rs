//! Periodic window reset.
//!
//! A tokio task that clears the [`DetectionWindow`] every `WindowInterval`.
//! The first clear happens one full interval after start, and a cancelled
//! scheduler never clears again once [`ResetScheduler::cancel`] returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::window::DetectionWindow;

/// Handle to a running reset task.
pub struct ResetScheduler {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ResetScheduler {
    /// Spawns the reset task on the current tokio runtime.
    pub fn start(window: Arc<DetectionWindow>, period: Duration) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_resets(window, period, cancel_rx));

        info!("Window reset scheduled every {:?}", period);

        Self { cancel_tx, handle }
    }

    /// Stops the task and waits for it, so no clear can follow.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("Reset task ended abnormally: {}", e);
        }
        debug!("Window reset scheduler cancelled");
    }
}

async fn run_resets(
    window: Arc<DetectionWindow>,
    period: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                if *cancel_rx.borrow() {
                    break;
                }
                window.clear();
            }
        }
    }
}
