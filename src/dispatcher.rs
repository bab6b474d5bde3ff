//! Priority dispatcher over three tiers
//!
//! A [`Dispatcher`] owns one [`Tier`] per [`TierKind`]. Every submission is
//! counted against its owner, wrapped by the [`TimeoutObserver`] and queued
//! on the tier its priority maps to. Dispatchers are never resized: a new
//! configuration means a new dispatcher.

#![forbid(unsafe_code)]
#![allow(clippy::significant_drop_tightening)] // Tier locks are held for one push

//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::accounting::OwnerAccounting;
use crate::hooks::HookRegistry;
use crate::metrics::DispatchMetrics;
use crate::observer::{DEFAULT_SLOW_TASK_THRESHOLD, TaskResult, TimeoutObserver};
use crate::owner::{EventPriority, OwnerId, TierKind};
use crate::tier::{Job, Tier, TierConfig, TierError, TierMetricsSnapshot};

#[cfg(feature = "tracing")]
use tracing::{debug, error, info};

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// High tier worker count
    pub high_workers: usize,

    /// Normal tier worker count
    pub normal_workers: usize,

    /// Low tier worker count
    pub low_workers: usize,

    /// Runs longer than this are reported as slow
    pub slow_task_threshold: Duration,

    /// Per-tier queue bound; `None` for unbounded
    pub queue_capacity: Option<usize>,

    /// Time each shutdown gets to drain queued and running work
    pub shutdown_grace: Duration,

    /// Time running jobs get to return after a forced stop
    pub force_stop_grace: Duration,

    /// Worker thread name prefix
    pub thread_name_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            high_workers: 2,
            normal_workers: 5,
            low_workers: 3,
            slow_task_threshold: DEFAULT_SLOW_TASK_THRESHOLD,
            queue_capacity: None,
            shutdown_grace: Duration::from_secs(60),
            force_stop_grace: Duration::from_secs(60),
            thread_name_prefix: "pulse-dispatch".to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Worker count for `kind`
    #[must_use]
    pub fn workers(&self, kind: TierKind) -> usize {
        match kind {
            TierKind::High => self.high_workers,
            TierKind::Normal => self.normal_workers,
            TierKind::Low => self.low_workers,
        }
    }

    /// Total worker threads across all tiers
    #[must_use]
    pub fn total_workers(&self) -> usize {
        self.high_workers + self.normal_workers + self.low_workers
    }

    fn tier_config(&self, kind: TierKind) -> TierConfig {
        TierConfig {
            workers: self.workers(kind),
            queue_capacity: self.queue_capacity,
            thread_name_prefix: self.thread_name_prefix.clone(),
        }
    }
}

/// Outcome of [`Dispatcher::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tiers that drained inside the grace period
    pub drained: Vec<TierKind>,
    /// Tiers that had to be force-stopped
    pub forced: Vec<TierKind>,
    /// Queued jobs dropped by forced stops
    pub discarded: u64,
    /// Workers left running after forced stops
    pub detached: usize,
    /// Wall-clock time spent shutting down
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Whether every tier drained without a forced stop
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }
}

/// Routes owner work onto the high, normal and low tiers
pub struct Dispatcher {
    high: Tier,
    normal: Tier,
    low: Tier,
    accounting: Arc<OwnerAccounting>,
    observer: TimeoutObserver,
    hooks: Arc<HookRegistry>,
    metrics: Arc<DispatchMetrics>,
    config: DispatcherConfig,
    accepting: AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher with its own accounting, hooks and metrics
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        Self::with_shared(
            config,
            Arc::new(OwnerAccounting::new()),
            Arc::new(HookRegistry::new()),
            Arc::new(DispatchMetrics::new()),
        )
    }

    /// Create a dispatcher that reports into existing shared state.
    ///
    /// Used across reconfigurations so owner counts, hooks and counters
    /// survive the swap.
    pub fn with_shared(
        config: DispatcherConfig,
        accounting: Arc<OwnerAccounting>,
        hooks: Arc<HookRegistry>,
        metrics: Arc<DispatchMetrics>,
    ) -> Result<Self, DispatchError> {
        let high = Tier::new(TierKind::High, config.tier_config(TierKind::High))?;
        let normal = Tier::new(TierKind::Normal, config.tier_config(TierKind::Normal))?;
        let low = Tier::new(TierKind::Low, config.tier_config(TierKind::Low))?;

        let observer = TimeoutObserver::new(
            config.slow_task_threshold,
            Arc::clone(&hooks),
            Arc::clone(&metrics),
        );

        #[cfg(feature = "tracing")]
        info!(
            high = config.high_workers,
            normal = config.normal_workers,
            low = config.low_workers,
            slow_task_threshold_ms = config.slow_task_threshold.as_millis() as u64,
            "Dispatcher started"
        );

        Ok(Self {
            high,
            normal,
            low,
            accounting,
            observer,
            hooks,
            metrics,
            config,
            accepting: AtomicBool::new(true),
        })
    }

    /// Queue `task` for `owner` on the tier `priority` maps to.
    ///
    /// Returns once the task is queued; the task's own result is only
    /// logged. The owner's active count covers the task from this call until
    /// the task finishes or is discarded.
    pub fn submit<F>(&self, owner: &OwnerId, task: F, priority: EventPriority) -> Result<(), DispatchError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            self.metrics.record_rejected();
            return Err(DispatchError::ShuttingDown);
        }

        let kind = priority.tier();
        let guard = self.accounting.begin(owner);
        let observer = self.observer.clone();
        let job_owner = owner.clone();

        let job: Job = Box::new(move || {
            let _guard = guard;
            observer.run(&job_owner, task);
        });

        // A refused job is dropped inside the tier, releasing its guard
        match self.tier(kind).submit(job) {
            Ok(()) => {
                self.metrics.record_submit(kind);
                self.hooks.on_submit(owner, kind);
                Ok(())
            }
            Err(TierError::QueueFull(tier)) => {
                self.metrics.record_rejected();
                Err(DispatchError::QueueFull { tier })
            }
            Err(TierError::ShuttingDown(_)) => {
                self.metrics.record_rejected();
                Err(DispatchError::ShuttingDown)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Stop accepting work and drain every tier.
    ///
    /// All tiers share one grace deadline. A tier that misses it is
    /// force-stopped; the failure is logged and recorded in the report.
    /// Later calls return an empty report.
    pub fn shutdown(&self) -> ShutdownReport {
        let started = Instant::now();
        let mut report = ShutdownReport::default();

        if !self.accepting.swap(false, Ordering::AcqRel) {
            return report;
        }

        #[cfg(feature = "tracing")]
        debug!(
            active = self.accounting.total_active(),
            grace_secs = self.config.shutdown_grace.as_secs(),
            "Dispatcher shutting down"
        );

        // Close every queue up front so all tiers drain in parallel
        let tiers = [&self.high, &self.normal, &self.low];
        for tier in tiers {
            tier.close();
        }

        // None: the grace period outlasts any representable instant
        let deadline = started.checked_add(self.config.shutdown_grace);
        for tier in tiers {
            let grace = deadline.map_or(self.config.shutdown_grace, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });

            match tier.shutdown(grace, self.config.force_stop_grace) {
                Ok(drained) => report.drained.push(drained.tier),
                Err(TierError::ShutdownTimeout {
                    tier: kind,
                    discarded,
                    detached,
                }) => {
                    #[cfg(feature = "tracing")]
                    error!(
                        tier = %kind,
                        discarded,
                        detached,
                        "Tier force-stopped during dispatcher shutdown"
                    );

                    self.metrics.record_forced_stop();
                    self.metrics.record_discarded(discarded);
                    report.forced.push(kind);
                    report.discarded += discarded;
                    report.detached += detached;
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    error!(tier = %tier.kind(), error = %_err, "Tier shutdown failed");

                    report.forced.push(tier.kind());
                }
            }
        }

        report.elapsed = started.elapsed();

        #[cfg(feature = "tracing")]
        info!(
            clean = report.is_clean(),
            discarded = report.discarded,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Dispatcher stopped"
        );

        report
    }

    /// Whether submissions are accepted
    #[inline]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Tasks in flight for `owner`
    #[must_use]
    pub fn active_count(&self, owner: &OwnerId) -> usize {
        self.accounting.active_count(owner)
    }

    /// Metrics for one tier
    pub fn tier_metrics(&self, kind: TierKind) -> TierMetricsSnapshot {
        self.tier(kind).metrics()
    }

    /// Jobs queued across all tiers
    pub fn queued(&self) -> usize {
        self.high.queue_depth() + self.normal.queue_depth() + self.low.queue_depth()
    }

    /// Configuration this dispatcher was built with
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Shared owner accounting
    pub fn accounting(&self) -> &Arc<OwnerAccounting> {
        &self.accounting
    }

    /// Shared hook registry
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Shared dispatch metrics
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    fn tier(&self, kind: TierKind) -> &Tier {
        match kind {
            TierKind::High => &self.high,
            TierKind::Normal => &self.normal,
            TierKind::Low => &self.low,
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Tier drops close the queues without waiting
        if self.accepting.swap(false, Ordering::AcqRel) {
            #[cfg(feature = "tracing")]
            debug!("Dispatcher dropped without shutdown");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("accepting", &self.is_accepting())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

/// Submission errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Dispatcher no longer accepts work
    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    /// Target tier's bounded queue is full
    #[error("{tier} tier queue is full")]
    QueueFull {
        /// Tier that refused the task
        tier: TierKind,
    },

    /// Tier construction or operation failed
    #[error(transparent)]
    Tier(#[from] TierError),
}
