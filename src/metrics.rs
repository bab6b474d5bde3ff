//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
//! Dispatch-wide counters
//!
//! One [`DispatchMetrics`] instance outlives dispatcher generations, so the
//! numbers keep accumulating across reconfigurations. With the `metrics`
//! feature enabled every update is mirrored to the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge, histogram};

use crate::owner::TierKind;

/// Counters for the whole dispatch system
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Tasks accepted by a tier
    pub tasks_submitted: AtomicU64,

    /// Tasks that returned `Ok`
    pub tasks_completed: AtomicU64,

    /// Tasks that returned an error
    pub tasks_failed: AtomicU64,

    /// Tasks that panicked
    pub tasks_panicked: AtomicU64,

    /// Submissions refused (shutting down or queue full)
    pub tasks_rejected: AtomicU64,

    /// Queued tasks dropped by a forced stop
    pub tasks_discarded: AtomicU64,

    /// Tasks that ran past the slow-task threshold
    pub slow_tasks: AtomicU64,

    /// Completed reconfigurations
    pub reconfigurations: AtomicU64,

    /// Tiers that had to be force-stopped
    pub forced_stops: AtomicU64,

    /// Total wall-clock execution time (microseconds)
    pub total_execution_us: AtomicU64,

    start_time: Instant,
}

impl DispatchMetrics {
    /// Create new metrics instance
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            tasks_discarded: AtomicU64::new(0),
            slow_tasks: AtomicU64::new(0),
            reconfigurations: AtomicU64::new(0),
            forced_stops: AtomicU64::new(0),
            total_execution_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an accepted submission
    pub fn record_submit(&self, tier: TierKind) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_submitted_total", "tier" => tier.name()).increment(1);
        #[cfg(not(feature = "metrics"))]
        let _ = tier;
    }

    /// Record a refused submission
    pub fn record_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_rejected_total").increment(1);
    }

    /// Record a task that returned `Ok`
    pub fn record_completed(&self, elapsed: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.record_execution_time(elapsed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_completed_total").increment(1);
    }

    /// Record a task that returned an error
    pub fn record_failed(&self, elapsed: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.record_execution_time(elapsed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_failed_total").increment(1);
    }

    /// Record a task that panicked
    pub fn record_panicked(&self, elapsed: Duration) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
        self.record_execution_time(elapsed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_panicked_total").increment(1);
    }

    /// Record a slow task
    pub fn record_slow_task(&self) {
        self.slow_tasks.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_slow_tasks_total").increment(1);
    }

    /// Record queued tasks dropped by a forced stop
    pub fn record_discarded(&self, count: u64) {
        self.tasks_discarded.fetch_add(count, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_discarded_total").increment(count);
    }

    /// Record a tier that missed its drain deadline
    pub fn record_forced_stop(&self) {
        self.forced_stops.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_forced_stops_total").increment(1);
    }

    /// Record a completed reconfiguration
    pub fn record_reconfiguration(&self) {
        self.reconfigurations.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        counter!("pulse_dispatch_reconfigurations_total").increment(1);
    }

    /// Update the in-flight gauge
    pub fn update_active_tasks(&self, count: usize) {
        #[cfg(feature = "metrics")]
        gauge!("pulse_dispatch_active_tasks").set(count as f64);
        #[cfg(not(feature = "metrics"))]
        let _ = count;
    }

    fn record_execution_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_execution_us.fetch_add(micros, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        histogram!("pulse_dispatch_execution_microseconds").record(micros as f64);
    }

    /// Seconds since creation
    #[must_use]
    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Get snapshot of current metric values
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            tasks_discarded: self.tasks_discarded.load(Ordering::Relaxed),
            slow_tasks: self.slow_tasks.load(Ordering::Relaxed),
            reconfigurations: self.reconfigurations.load(Ordering::Relaxed),
            forced_stops: self.forced_stops.load(Ordering::Relaxed),
            total_execution_us: self.total_execution_us.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        }
    }

    /// Calculate derived metrics
    #[must_use]
    pub fn derived_metrics(&self) -> DerivedMetrics {
        let snapshot = self.snapshot();
        let finished = snapshot.finished();
        let uptime = snapshot.uptime_seconds.max(1.0); // Avoid division by zero

        let per_finished = |value: u64| {
            if finished > 0 {
                value as f64 / finished as f64
            } else {
                0.0
            }
        };

        DerivedMetrics {
            tasks_per_second: finished as f64 / uptime,
            failure_rate: per_finished(snapshot.tasks_failed + snapshot.tasks_panicked),
            slow_rate: per_finished(snapshot.slow_tasks),
            avg_execution_us: per_finished(snapshot.total_execution_us),
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Tasks accepted by a tier
    pub tasks_submitted: u64,
    /// Tasks that returned `Ok`
    pub tasks_completed: u64,
    /// Tasks that returned an error
    pub tasks_failed: u64,
    /// Tasks that panicked
    pub tasks_panicked: u64,
    /// Submissions refused
    pub tasks_rejected: u64,
    /// Queued tasks dropped by a forced stop
    pub tasks_discarded: u64,
    /// Tasks over the slow-task threshold
    pub slow_tasks: u64,
    /// Completed reconfigurations
    pub reconfigurations: u64,
    /// Force-stopped tiers
    pub forced_stops: u64,
    /// Total execution time (microseconds)
    pub total_execution_us: u64,
    /// Seconds since creation
    pub uptime_seconds: f64,
}

impl MetricsSnapshot {
    /// Tasks that ran to an outcome (ok, error or panic)
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_panicked
    }
}

/// Derived metrics calculated from base counters
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetrics {
    /// Finished tasks per second of uptime
    pub tasks_per_second: f64,
    /// Errors and panics per finished task
    pub failure_rate: f64,
    /// Slow tasks per finished task
    pub slow_rate: f64,
    /// Average execution time (microseconds)
    pub avg_execution_us: f64,
}

/// Register dispatch metrics with zero values
#[cfg(feature = "metrics")]
pub fn init_metrics() {
    #[cfg(feature = "tracing")]
    tracing::info!("Initializing pulse-dispatch metrics registry");

    for tier in TierKind::ALL {
        counter!("pulse_dispatch_submitted_total", "tier" => tier.name()).absolute(0);
    }
    counter!("pulse_dispatch_rejected_total").absolute(0);
    counter!("pulse_dispatch_completed_total").absolute(0);
    counter!("pulse_dispatch_failed_total").absolute(0);
    counter!("pulse_dispatch_panicked_total").absolute(0);
    counter!("pulse_dispatch_slow_tasks_total").absolute(0);
    counter!("pulse_dispatch_discarded_total").absolute(0);
    counter!("pulse_dispatch_forced_stops_total").absolute(0);
    counter!("pulse_dispatch_reconfigurations_total").absolute(0);

    gauge!("pulse_dispatch_active_tasks").set(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = DispatchMetrics::new();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.tasks_submitted, 0);
        assert_eq!(snapshot.finished(), 0);
        assert!(snapshot.uptime_seconds >= 0.0);
    }

    #[test]
    fn test_outcome_recording() {
        let metrics = DispatchMetrics::new();

        metrics.record_submit(TierKind::High);
        metrics.record_submit(TierKind::Low);
        metrics.record_submit(TierKind::Low);
        metrics.record_completed(Duration::from_millis(2));
        metrics.record_failed(Duration::from_millis(1));
        metrics.record_panicked(Duration::from_millis(1));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_submitted, 3);
        assert_eq!(snapshot.finished(), 3);
        assert_eq!(snapshot.total_execution_us, 4000);
    }

    #[test]
    fn test_derived_metrics() {
        let metrics = DispatchMetrics::new();

        for _ in 0..8 {
            metrics.record_completed(Duration::from_micros(100));
        }
        metrics.record_failed(Duration::from_micros(100));
        metrics.record_panicked(Duration::from_micros(100));
        metrics.record_slow_task();

        let derived = metrics.derived_metrics();
        assert_eq!(derived.failure_rate, 0.2);
        assert_eq!(derived.slow_rate, 0.1);
        assert_eq!(derived.avg_execution_us, 100.0);
        assert!(derived.tasks_per_second > 0.0);
    }

    #[test]
    fn test_shutdown_counters() {
        let metrics = DispatchMetrics::new();

        metrics.record_rejected();
        metrics.record_discarded(7);
        metrics.record_forced_stop();
        metrics.record_reconfiguration();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_rejected, 1);
        assert_eq!(snapshot.tasks_discarded, 7);
        assert_eq!(snapshot.forced_stops, 1);
        assert_eq!(snapshot.reconfigurations, 1);
    }
}
