//! Engine lifecycle with in-flight exchange tracking.
//!
//! The lifecycle state lives in an `ArcSwap` so the dispatch hot path can
//! check it without locking. In-flight exchanges are counted through RAII
//! guards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::{info, warn};

/// Engine lifecycle state.
///
/// State machine: Starting -> Running -> Draining -> (ForceStopping) -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Engine is being assembled.
    Starting,
    /// Exchanges are accepted and routed.
    Running,
    /// Graceful shutdown: in-flight exchanges finish, callers should stop submitting.
    Draining,
    /// New dispatches are rejected; in-flight exchanges still complete.
    ForceStopping,
    /// Engine has stopped.
    Stopped,
}

/// Coordinates engine shutdown.
///
/// 1. [`AdvisedStep`](crate::dispatch::AdvisedStep) consults
///    [`ShutdownController::is_force_shutdown`] before every dispatch.
/// 2. [`InflightAdvice`](crate::advice::InflightAdvice) holds an
///    [`InFlightGuard`] for every exchange inside a workflow.
/// 3. [`ShutdownController::shutdown`] drains and escalates to force
///    shutdown when the drain times out.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<LifecycleState>,
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<LifecycleState>>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(LifecycleState::Starting);
        Self {
            signal,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Starting)),
        }
    }

    pub fn set_running(&self) {
        self.transition(LifecycleState::Running);
    }

    /// Receiver notified on every lifecycle transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.signal.subscribe()
    }

    /// Starts a graceful drain.
    pub fn trigger_shutdown(&self) {
        info!(in_flight = self.in_flight_count(), "engine draining");
        self.transition(LifecycleState::Draining);
    }

    /// Rejects every dispatch from now on.
    pub fn force_shutdown(&self) {
        warn!(in_flight = self.in_flight_count(), "engine force stopping");
        self.transition(LifecycleState::ForceStopping);
    }

    #[must_use]
    pub fn is_force_shutdown(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::ForceStopping | LifecycleState::Stopped
        )
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Shared handle to the lifecycle state.
    #[must_use]
    pub fn state_handle(&self) -> Arc<ArcSwap<LifecycleState>> {
        Arc::clone(&self.state)
    }

    /// Counts one in-flight exchange until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for every in-flight exchange to complete, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` once the count reaches zero.
    /// On timeout the state is left unchanged.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.transition(LifecycleState::Stopped);
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Graceful drain, escalating to force shutdown on timeout.
    ///
    /// Returns `true` if everything drained within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.trigger_shutdown();
        if self.wait_for_drain(timeout).await {
            return true;
        }
        self.force_shutdown();
        false
    }

    fn transition(&self, next: LifecycleState) {
        self.state.store(Arc::new(next));
        // No receivers is fine.
        let _ = self.signal.send(next);
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let controller = ShutdownController::new();
        assert_eq!(controller.state(), LifecycleState::Starting);

        controller.set_running();
        assert_eq!(controller.state(), LifecycleState::Running);
        assert!(!controller.is_force_shutdown());

        controller.trigger_shutdown();
        assert_eq!(controller.state(), LifecycleState::Draining);
        assert!(!controller.is_force_shutdown());

        controller.force_shutdown();
        assert!(controller.is_force_shutdown());
    }

    #[test]
    fn guards_track_in_flight_count() {
        let controller = ShutdownController::new();

        let first = controller.in_flight_guard();
        let second = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(first);
        assert_eq!(controller.in_flight_count(), 1);
        drop(second);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let controller = ShutdownController::new();
        let mut rx = controller.subscribe();
        assert_eq!(*rx.borrow(), LifecycleState::Starting);

        controller.force_shutdown();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::ForceStopping);
    }

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let controller = ShutdownController::new();
        controller.set_running();
        let guard = controller.in_flight_guard();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.shutdown(Duration::from_secs(2)).await);
        assert_eq!(controller.state(), LifecycleState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn drain_timeout_escalates_to_force() {
        let controller = ShutdownController::new();
        controller.set_running();
        let _guard = controller.in_flight_guard();

        assert!(!controller.shutdown(Duration::from_millis(30)).await);
        assert_eq!(controller.state(), LifecycleState::ForceStopping);
        assert!(controller.is_force_shutdown());
    }
}
