//! Windowed per-address counting and one-shot alerting.
//!
//! [`WindowedCounter`] and [`AlertPolicy`] are plain single-owner structures.
//! [`DetectionWindow`] owns both behind one mutex, so an increment, an
//! evaluation, a clear and a snapshot are each a single critical section and
//! no reader can observe counts cleared while the alerted set is not.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::debug;

use crate::frame::Address;

/// Per-address frame counts for the current window.
#[derive(Debug, Default)]
pub struct WindowedCounter {
    counts: HashMap<Address, u64>,
}

impl WindowedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one frame for `addr` and returns the new count (saturating).
    pub fn increment(&mut self, addr: &Address) -> u64 {
        let count = self.counts.entry(addr.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    #[cfg(test)]
    pub fn get(&self, addr: &Address) -> u64 {
        self.counts.get(addr).copied().unwrap_or(0)
    }

    /// Copy of all counts, highest first.
    pub fn snapshot(&self) -> Vec<(Address, u64)> {
        let mut rows: Vec<_> = self
            .counts
            .iter()
            .map(|(addr, count)| (addr.clone(), *count))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Fires at most once per address per window.
#[derive(Debug)]
pub struct AlertPolicy {
    threshold: u64,
    alerted: HashSet<Address>,
}

impl AlertPolicy {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            alerted: HashSet::new(),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Returns true the first time `count` exceeds the threshold for `addr`
    /// in this window.
    pub fn evaluate(&mut self, addr: &Address, count: u64) -> bool {
        if count > self.threshold && !self.alerted.contains(addr) {
            self.alerted.insert(addr.clone());
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn is_alerted(&self, addr: &Address) -> bool {
        self.alerted.contains(addr)
    }

    pub fn alerted(&self) -> &HashSet<Address> {
        &self.alerted
    }

    /// Re-arms every address.
    pub fn clear(&mut self) {
        self.alerted.clear();
    }
}

/// Result of recording one deauth frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub address: Address,
    pub count: u64,
    /// True when this frame pushed the address over the threshold.
    pub alert: bool,
}

/// Point-in-time copy of the window.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    /// Number of clears since start; the first window is 0.
    pub window: u64,
    pub started: Instant,
    pub threshold: u64,
    pub counts: Vec<(Address, u64)>,
    pub alerted: HashSet<Address>,
}

impl WindowSnapshot {
    #[cfg(test)]
    pub fn count_of(&self, addr: &Address) -> u64 {
        self.counts
            .iter()
            .find(|(a, _)| a == addr)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Addresses whose count exceeds the threshold.
    pub fn attacking(&self) -> usize {
        self.counts
            .iter()
            .filter(|(_, count)| *count > self.threshold)
            .count()
    }
}

#[derive(Debug)]
struct WindowState {
    window: u64,
    started: Instant,
    counter: WindowedCounter,
    policy: AlertPolicy,
}

/// Shared detection state.
///
/// Callers never see the inner maps; they get [`Observation`]s and
/// [`WindowSnapshot`]s.
#[derive(Debug)]
pub struct DetectionWindow {
    state: Mutex<WindowState>,
}

impl DetectionWindow {
    pub fn new(threshold: u64) -> Self {
        Self {
            state: Mutex::new(WindowState {
                window: 0,
                started: Instant::now(),
                counter: WindowedCounter::new(),
                policy: AlertPolicy::new(threshold),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        // Every critical section leaves the state consistent, so a panic in
        // another holder does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increments `addr` and evaluates the alert policy on the new count.
    pub fn record(&self, addr: Address) -> Observation {
        let mut state = self.lock();
        let count = state.counter.increment(&addr);
        let alert = state.policy.evaluate(&addr, count);
        Observation {
            address: addr,
            count,
            alert,
        }
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let state = self.lock();
        WindowSnapshot {
            window: state.window,
            started: state.started,
            threshold: state.policy.threshold(),
            counts: state.counter.snapshot(),
            alerted: state.policy.alerted().clone(),
        }
    }

    /// Starts a new window: counts and alerted set are dropped together.
    pub fn clear(&self) -> u64 {
        let mut state = self.lock();
        state.counter.clear();
        state.policy.clear();
        state.window += 1;
        state.started = Instant::now();
        debug!(
            "Window {} started, counts and alerts cleared",
            state.window
        );
        state.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn target() -> Address {
        Address::new("AA:BB:CC:DD:EE:FF")
    }

    #[test]
    fn test_counter_increment_and_get() {
        let mut counter = WindowedCounter::new();
        let addr = target();

        assert_eq!(counter.get(&addr), 0);
        assert_eq!(counter.increment(&addr), 1);
        assert_eq!(counter.increment(&addr), 2);
        assert_eq!(counter.get(&addr), 2);
        assert_eq!(counter.len(), 1);

        counter.clear();
        assert!(counter.is_empty());
        assert_eq!(counter.get(&addr), 0);
    }

    #[test]
    fn test_counter_saturates() {
        let mut counter = WindowedCounter::new();
        let addr = target();
        counter.counts.insert(addr.clone(), u64::MAX);

        assert_eq!(counter.increment(&addr), u64::MAX);
    }

    #[test]
    fn test_counter_snapshot_order() {
        let mut counter = WindowedCounter::new();
        let a = Address::new("aa");
        let b = Address::new("bb");
        counter.increment(&a);
        counter.increment(&b);
        counter.increment(&b);

        let rows = counter.snapshot();
        assert_eq!(rows, vec![(b, 2), (a, 1)]);
    }

    #[test]
    fn test_policy_one_shot() {
        let mut policy = AlertPolicy::new(15);
        let addr = target();

        assert!(!policy.evaluate(&addr, 15));
        assert!(policy.evaluate(&addr, 16));
        assert!(!policy.evaluate(&addr, 17));
        assert!(!policy.evaluate(&addr, 1000));
        assert!(policy.is_alerted(&addr));

        policy.clear();
        assert!(!policy.is_alerted(&addr));
        assert!(policy.evaluate(&addr, 16));
    }

    #[test]
    fn test_policy_is_per_address() {
        let mut policy = AlertPolicy::new(1);
        assert!(policy.evaluate(&Address::new("a"), 2));
        assert!(policy.evaluate(&Address::new("b"), 2));
        assert_eq!(policy.alerted().len(), 2);
    }

    #[test]
    fn test_threshold_scenario() {
        let window = DetectionWindow::new(15);

        for _ in 0..11 {
            assert!(!window.record(target()).alert);
        }
        for _ in 11..15 {
            assert!(!window.record(target()).alert);
        }

        let sixteenth = window.record(target());
        assert_eq!(sixteenth.count, 16);
        assert!(sixteenth.alert);

        let seventeenth = window.record(target());
        assert_eq!(seventeenth.count, 17);
        assert!(!seventeenth.alert);
    }

    #[test]
    fn test_clear_rearms_alerts() {
        let window = DetectionWindow::new(15);
        for _ in 0..16 {
            window.record(target());
        }
        assert!(window.snapshot().alerted.contains(&target()));

        assert_eq!(window.clear(), 1);

        let first = window.record(target());
        assert_eq!(first.count, 1);
        assert!(!first.alert);

        let mut fired = 0;
        for _ in 1..16 {
            if window.record(target()).alert {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(window.snapshot().count_of(&target()), 16);
    }

    #[test]
    fn test_snapshot_contents() {
        let window = DetectionWindow::new(2);
        let noisy = Address::new("noisy");
        let quiet = Address::new("quiet");
        for _ in 0..3 {
            window.record(noisy.clone());
        }
        window.record(quiet.clone());

        let snapshot = window.snapshot();
        assert_eq!(snapshot.window, 0);
        assert_eq!(snapshot.threshold, 2);
        assert_eq!(snapshot.counts[0], (noisy.clone(), 3));
        assert_eq!(snapshot.count_of(&quiet), 1);
        assert_eq!(snapshot.attacking(), 1);
        assert!(snapshot.alerted.contains(&noisy));
        assert!(!snapshot.alerted.contains(&quiet));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let window = Arc::new(DetectionWindow::new(u64::MAX - 1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let window = Arc::clone(&window);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        window.record(target());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(window.snapshot().count_of(&target()), 8000);
    }

    #[test]
    fn test_concurrent_alert_fires_once() {
        let window = Arc::new(DetectionWindow::new(15));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let window = Arc::clone(&window);
                thread::spawn(move || {
                    (0..100).filter(|_| window.record(target()).alert).count()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_snapshot_never_sees_half_cleared_state() {
        let window = Arc::new(DetectionWindow::new(0));
        let writer = {
            let window = Arc::clone(&window);
            thread::spawn(move || {
                for i in 0..2000 {
                    window.record(Address::new(format!("addr-{}", i % 7)));
                    if i % 50 == 0 {
                        window.clear();
                    }
                }
            })
        };

        for _ in 0..2000 {
            let snapshot = window.snapshot();
            // Threshold 0: every counted address has alerted, and only those.
            assert_eq!(snapshot.alerted.len(), snapshot.counts.len());
            for (addr, _) in &snapshot.counts {
                assert!(snapshot.alerted.contains(addr));
            }
        }

        writer.join().unwrap();
    }
}
