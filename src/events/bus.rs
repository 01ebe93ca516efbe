//! Telemetry bus: fan-out of milestones, progress, problems and plan events
//!
//! A process-wide broadcast channel. Publishing never blocks a worker;
//! subscribers that fall behind observe lag errors on their receiver, the
//! publisher is unaffected. Subscribers exit on the `Shutdown` event.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, broadcast};

use super::metrics::BusMetrics;
use super::types::{ShutdownReason, TelemetryEvent};

/// Default channel capacity; sized for bursty link discovery
const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out event bus for all engine telemetry
#[derive(Debug)]
pub struct TelemetryBus {
    sender: broadcast::Sender<TelemetryEvent>,
    metrics: BusMetrics,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl TelemetryBus {
    /// Create a bus with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a specific channel capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            metrics: BusMetrics::new(),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received it. An event with
    /// no subscribers is counted as dropped, not an error: the engine must
    /// keep running whether or not anyone is listening.
    pub fn publish(&self, event: TelemetryEvent) -> usize {
        if self.shutdown_flag.load(Ordering::Acquire) {
            self.metrics.increment_dropped();
            return 0;
        }
        match self.sender.send(event) {
            Ok(count) => {
                self.metrics.increment_published();
                self.metrics.update_subscriber_count(count);
                count
            }
            Err(_) => {
                self.metrics.increment_dropped();
                0
            }
        }
    }

    /// Subscribe to the event stream
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    /// Current metrics
    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    /// Whether shutdown has been initiated
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }

    /// Publish the shutdown event and stop accepting further events.
    ///
    /// Idempotent: only the first call emits the event.
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.sender.send(TelemetryEvent::shutdown(reason));
            self.shutdown_notify.notify_waiters();
        }
    }

    /// Wait until shutdown is initiated
    pub async fn wait_shutdown(&self) {
        if self.is_shutdown() {
            return;
        }
        self.shutdown_notify.notified().await;
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::ProblemSeverity;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = TelemetryBus::new();
        let mut rx = bus.subscribe();
        let delivered = bus.publish(TelemetryEvent::milestone(
            Some(1),
            "pipeline-configured",
            serde_json::Value::Null,
        ));
        assert_eq!(delivered, 1);
        match rx.recv().await {
            Ok(TelemetryEvent::Milestone { name, job_id, .. }) => {
                assert_eq!(name, "pipeline-configured");
                assert_eq!(job_id, Some(1));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped_not_error() {
        let bus = TelemetryBus::new();
        let delivered = bus.publish(TelemetryEvent::problem(
            None,
            ProblemSeverity::Info,
            "transient-network",
            "timeout",
            None,
        ));
        assert_eq!(delivered, 0);
        assert_eq!(bus.metrics().snapshot().events_dropped, 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_terminal() {
        let bus = TelemetryBus::new();
        let mut rx = bus.subscribe();
        bus.shutdown(ShutdownReason::Completed);
        bus.shutdown(ShutdownReason::Cancelled);
        assert!(matches!(rx.recv().await, Ok(TelemetryEvent::Shutdown { .. })));
        // Only one shutdown event was emitted, and the bus rejects new events.
        assert_eq!(bus.publish(TelemetryEvent::milestone(None, "late", serde_json::Value::Null)), 0);
        assert!(rx.try_recv().is_err());
    }
}
