//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
//! Fixed-size worker pool for one priority tier
//!
//! A [`Tier`] owns a FIFO queue and a fixed set of OS threads that only ever
//! pull from that queue, so a flood of work in one tier cannot occupy the
//! workers of another. Submission never blocks: the queue is unbounded unless
//! a capacity is configured, in which case a full queue is reported as
//! [`TierError::QueueFull`] and the job is dropped.

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::owner::TierKind;

#[cfg(feature = "tracing")]
use tracing::{debug, error, info, warn};

/// Unit of work executed by a tier worker
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for one tier
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Queue bound; `None` for unbounded
    pub queue_capacity: Option<usize>,
    /// Thread name prefix
    pub thread_name_prefix: String,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: None,
            thread_name_prefix: "pulse-dispatch".to_string(),
        }
    }
}

/// Metrics for one tier
#[derive(Debug, Default)]
pub struct TierMetrics {
    /// Jobs accepted into the queue
    pub jobs_submitted: AtomicU64,
    /// Jobs run to completion by a worker
    pub jobs_completed: AtomicU64,
    /// Jobs refused at submission
    pub jobs_rejected: AtomicU64,
    /// Queued jobs dropped by a forced stop
    pub jobs_discarded: AtomicU64,
    /// Jobs whose panic reached the worker loop
    pub jobs_panicked: AtomicU64,
    /// Workers currently alive
    pub live_workers: AtomicUsize,
    /// Workers currently running a job
    pub busy_workers: AtomicUsize,
}

impl TierMetrics {
    /// Get snapshot of current metrics
    pub fn snapshot(&self, queue_depth: usize) -> TierMetricsSnapshot {
        TierMetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            jobs_discarded: self.jobs_discarded.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            live_workers: self.live_workers.load(Ordering::Acquire),
            busy_workers: self.busy_workers.load(Ordering::Acquire),
            queue_depth,
        }
    }
}

/// Snapshot of tier metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierMetricsSnapshot {
    /// Jobs accepted into the queue
    pub jobs_submitted: u64,
    /// Jobs run to completion
    pub jobs_completed: u64,
    /// Jobs refused at submission
    pub jobs_rejected: u64,
    /// Jobs dropped by a forced stop
    pub jobs_discarded: u64,
    /// Jobs that panicked in the worker loop
    pub jobs_panicked: u64,
    /// Workers currently alive
    pub live_workers: usize,
    /// Workers currently running a job
    pub busy_workers: usize,
    /// Jobs waiting in the queue
    pub queue_depth: usize,
}

/// Result of a tier shutdown that finished inside its grace period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierDrained {
    /// Tier that was stopped
    pub tier: TierKind,
    /// Workers joined
    pub workers_joined: usize,
    /// Time spent draining
    pub elapsed: Duration,
}

/// Worker pool for one priority tier
pub struct Tier {
    kind: TierKind,
    config: TierConfig,
    /// `None` once shutdown has started
    sender: RwLock<Option<Sender<Job>>>,
    /// Kept for queue depth and forced discards
    receiver: Receiver<Job>,
    workers: Mutex<Vec<(usize, JoinHandle<()>)>>,
    exits: Receiver<usize>,
    abort: Arc<AtomicBool>,
    metrics: Arc<TierMetrics>,
}

impl Tier {
    /// Spawns the tier's workers
    pub fn new(kind: TierKind, config: TierConfig) -> Result<Self, TierError> {
        if config.workers == 0 {
            return Err(TierError::InvalidConfig(format!(
                "{kind} tier needs at least one worker"
            )));
        }
        if config.queue_capacity == Some(0) {
            return Err(TierError::InvalidConfig(format!(
                "{kind} tier queue capacity must be positive"
            )));
        }

        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };
        let (exit_sender, exits) = channel::unbounded();
        let abort = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(TierMetrics::default());

        #[cfg(feature = "tracing")]
        debug!(
            tier = %kind,
            workers = config.workers,
            queue_capacity = ?config.queue_capacity,
            "Starting tier workers"
        );

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let spawned = Self::spawn_worker(
                kind,
                &config,
                index,
                receiver.clone(),
                exit_sender.clone(),
                Arc::clone(&abort),
                Arc::clone(&metrics),
            );

            match spawned {
                Ok(handle) => workers.push((index, handle)),
                Err(err) => {
                    // Close the queue so already-spawned workers exit
                    drop(sender);
                    for (_, handle) in workers {
                        let _ = handle.join();
                    }
                    return Err(TierError::Spawn(err));
                }
            }
        }

        Ok(Self {
            kind,
            config,
            sender: RwLock::new(Some(sender)),
            receiver,
            workers: Mutex::new(workers),
            exits,
            abort,
            metrics,
        })
    }

    /// Priority class served by this tier
    #[inline]
    pub fn kind(&self) -> TierKind {
        self.kind
    }

    /// Configured worker count
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Enqueues `job` without blocking
    pub fn submit(&self, job: Job) -> Result<(), TierError> {
        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            self.metrics.jobs_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(TierError::ShuttingDown(self.kind));
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.metrics.jobs_submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(channel::TrySendError::Full(_job)) => {
                self.metrics.jobs_rejected.fetch_add(1, Ordering::Relaxed);

                #[cfg(feature = "tracing")]
                warn!(
                    tier = %self.kind,
                    queue_depth = self.receiver.len(),
                    "Job rejected: tier queue is full"
                );

                Err(TierError::QueueFull(self.kind))
            }
            Err(channel::TrySendError::Disconnected(_job)) => {
                self.metrics.jobs_rejected.fetch_add(1, Ordering::Relaxed);
                Err(TierError::ShuttingDown(self.kind))
            }
        }
    }

    /// Jobs waiting to be picked up
    #[inline]
    pub fn queue_depth(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the tier still accepts jobs
    pub fn is_accepting(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> TierMetricsSnapshot {
        self.metrics.snapshot(self.receiver.len())
    }

    /// Refuses further submissions; queued jobs still run.
    ///
    /// Returns `false` if the tier was already closed.
    pub fn close(&self) -> bool {
        // Dropping the last sender lets workers drain the queue, then exit
        self.sender.write().take().is_some()
    }

    /// Stops the tier.
    ///
    /// New submissions are refused at once. Queued and running jobs get
    /// `grace` to finish. Past that the tier is force-stopped: queued jobs
    /// are discarded, running jobs get `force_grace` to return, and workers
    /// still stuck after that are detached. A forced stop is reported as
    /// [`TierError::ShutdownTimeout`]; calling this twice is a no-op.
    pub fn shutdown(&self, grace: Duration, force_grace: Duration) -> Result<TierDrained, TierError> {
        let started = Instant::now();
        self.close();

        let handles = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return Ok(TierDrained {
                tier: self.kind,
                workers_joined: 0,
                elapsed: Duration::ZERO,
            });
        }

        #[cfg(feature = "tracing")]
        debug!(tier = %self.kind, queue_depth = self.receiver.len(), "Draining tier");

        let expected = handles.len();
        let mut exited = HashSet::with_capacity(expected);

        self.collect_exits(&mut exited, expected, started.checked_add(grace));

        if exited.len() == expected {
            let workers_joined = Self::join_exited(handles, &exited);

            #[cfg(feature = "tracing")]
            debug!(tier = %self.kind, workers_joined, "Tier drained");

            return Ok(TierDrained {
                tier: self.kind,
                workers_joined,
                elapsed: started.elapsed(),
            });
        }

        #[cfg(feature = "tracing")]
        error!(
            tier = %self.kind,
            busy_workers = expected - exited.len(),
            queue_depth = self.receiver.len(),
            grace_ms = grace.as_millis() as u64,
            "Tier did not drain within grace period, forcing stop"
        );

        // Workers and discard_queued race for the remaining jobs once abort
        // is set; both count into jobs_discarded
        let discarded_before = self.metrics.jobs_discarded.load(Ordering::Acquire);
        self.abort.store(true, Ordering::Release);
        self.discard_queued();

        self.collect_exits(&mut exited, expected, Instant::now().checked_add(force_grace));
        let workers_joined = Self::join_exited(handles, &exited);
        let detached = expected - workers_joined;
        let discarded = self
            .metrics
            .jobs_discarded
            .load(Ordering::Acquire)
            .saturating_sub(discarded_before);

        if detached > 0 {
            #[cfg(feature = "tracing")]
            error!(
                tier = %self.kind,
                detached,
                "Workers still running after forced stop, detaching"
            );
        }

        Err(TierError::ShutdownTimeout {
            tier: self.kind,
            discarded,
            detached,
        })
    }

    /// Waits for worker exits until `deadline`; `None` waits without limit
    fn collect_exits(&self, exited: &mut HashSet<usize>, expected: usize, deadline: Option<Instant>) {
        while exited.len() < expected {
            let notice = match deadline {
                Some(deadline) => self.exits.recv_deadline(deadline).ok(),
                None => self.exits.recv().ok(),
            };
            match notice {
                Some(index) => {
                    exited.insert(index);
                }
                None => break,
            }
        }
    }

    fn join_exited(handles: Vec<(usize, JoinHandle<()>)>, exited: &HashSet<usize>) -> usize {
        let mut joined = 0;
        for (index, handle) in handles {
            if !exited.contains(&index) {
                // Detached; the thread ends whenever its job returns
                continue;
            }
            if let Err(_panic) = handle.join() {
                #[cfg(feature = "tracing")]
                error!(worker = index, "Worker thread join failed");
            }
            joined += 1;
        }
        joined
    }

    /// Drops every queued job; their accounting guards release on drop
    fn discard_queued(&self) {
        while let Ok(job) = self.receiver.try_recv() {
            drop(job);
            self.metrics.jobs_discarded.fetch_add(1, Ordering::AcqRel);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_worker(
        kind: TierKind,
        config: &TierConfig,
        index: usize,
        jobs: Receiver<Job>,
        exits: Sender<usize>,
        abort: Arc<AtomicBool>,
        metrics: Arc<TierMetrics>,
    ) -> std::io::Result<JoinHandle<()>> {
        let thread_name = format!("{}-{}-{}", config.thread_name_prefix, kind.name(), index);

        thread::Builder::new().name(thread_name).spawn(move || {
            let _exit = ExitNotice {
                index,
                exits,
                metrics: Arc::clone(&metrics),
            };
            metrics.live_workers.fetch_add(1, Ordering::AcqRel);

            // Ends when the queue is closed and empty, or on abort
            while let Ok(job) = jobs.recv() {
                if abort.load(Ordering::Acquire) {
                    drop(job);
                    metrics.jobs_discarded.fetch_add(1, Ordering::AcqRel);
                    continue;
                }

                metrics.busy_workers.fetch_add(1, Ordering::AcqRel);
                let result = panic::catch_unwind(AssertUnwindSafe(job));
                metrics.busy_workers.fetch_sub(1, Ordering::AcqRel);

                match result {
                    Ok(()) => {
                        metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_payload) => {
                        metrics.jobs_panicked.fetch_add(1, Ordering::Relaxed);

                        #[cfg(feature = "tracing")]
                        error!(
                            tier = %kind,
                            worker = index,
                            panic = %crate::observer::panic_message(_payload.as_ref()),
                            "Job panicked in tier worker"
                        );
                    }
                }
            }
        })
    }
}

impl Drop for Tier {
    fn drop(&mut self) {
        // Don't block in drop: close the queue and let workers finish
        if self.close() {
            #[cfg(feature = "tracing")]
            info!(tier = %self.kind, "Tier dropped without shutdown, detaching workers");
        }
    }
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("accepting", &self.is_accepting())
            .field("queue_depth", &self.queue_depth())
            .finish()
    }
}

/// Reports a worker's exit, including unwinding out of the loop
struct ExitNotice {
    index: usize,
    exits: Sender<usize>,
    metrics: Arc<TierMetrics>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        self.metrics.live_workers.fetch_sub(1, Ordering::AcqRel);
        let _ = self.exits.send(self.index);
    }
}

/// Errors raised by a tier
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    /// Bounded queue is full
    #[error("{0} tier queue is full")]
    QueueFull(TierKind),

    /// Tier no longer accepts jobs
    #[error("{0} tier is shutting down")]
    ShuttingDown(TierKind),

    /// Worker thread creation failed
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Invalid configuration
    #[error("Invalid tier configuration: {0}")]
    InvalidConfig(String),

    /// Tier missed its drain deadline and was force-stopped
    #[error("{tier} tier did not drain in time: {discarded} queued jobs discarded, {detached} workers detached")]
    ShutdownTimeout {
        /// Tier that was force-stopped
        tier: TierKind,
        /// Queued jobs dropped
        discarded: u64,
        /// Workers left running
        detached: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn config(workers: usize) -> TierConfig {
        TierConfig {
            workers,
            queue_capacity: None,
            thread_name_prefix: "tier-test".to_string(),
        }
    }

    #[test]
    fn test_tier_creation() {
        let tier = Tier::new(TierKind::Normal, config(3)).expect("tier");

        assert!(tier.is_accepting());
        assert_eq!(tier.worker_count(), 3);
        assert_eq!(tier.queue_depth(), 0);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = Tier::new(TierKind::Low, config(0));
        assert!(matches!(result, Err(TierError::InvalidConfig(_))));
    }

    #[test]
    fn test_jobs_run_and_drain() {
        let tier = Tier::new(TierKind::Normal, config(2)).expect("tier");
        let ran = Arc::new(AtomicU32::new(0));

        for _ in 0..20 {
            let ran = Arc::clone(&ran);
            tier.submit(Box::new(move || {
                thread::sleep(Duration::from_millis(1));
                ran.fetch_add(1, Ordering::Relaxed);
            }))
            .expect("submit");
        }

        let drained = tier
            .shutdown(Duration::from_secs(10), Duration::from_secs(1))
            .expect("drain");

        assert_eq!(drained.workers_joined, 2);
        assert_eq!(ran.load(Ordering::Relaxed), 20);

        let metrics = tier.metrics();
        assert_eq!(metrics.jobs_submitted, 20);
        assert_eq!(metrics.jobs_completed, 20);
        assert_eq!(metrics.live_workers, 0);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let tier = Tier::new(TierKind::High, config(1)).expect("tier");
        tier.shutdown(Duration::from_secs(1), Duration::from_secs(1))
            .expect("drain");

        let result = tier.submit(Box::new(|| {}));
        assert!(matches!(result, Err(TierError::ShuttingDown(TierKind::High))));
        assert_eq!(tier.metrics().jobs_rejected, 1);

        // Second shutdown is a no-op
        let again = tier
            .shutdown(Duration::from_secs(1), Duration::from_secs(1))
            .expect("no-op");
        assert_eq!(again.workers_joined, 0);
    }

    #[test]
    fn test_bounded_queue_backpressure() {
        let tier = Tier::new(
            TierKind::Low,
            TierConfig {
                queue_capacity: Some(1),
                ..config(1)
            },
        )
        .expect("tier");

        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (started_tx, started_rx) = channel::bounded::<()>(1);

        // Occupy the only worker
        tier.submit(Box::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }))
        .expect("first");
        started_rx.recv().expect("worker started");

        tier.submit(Box::new(|| {})).expect("fills queue");
        let overflow = tier.submit(Box::new(|| {}));
        assert!(matches!(overflow, Err(TierError::QueueFull(TierKind::Low))));

        drop(release_tx);
        tier.shutdown(Duration::from_secs(5), Duration::from_secs(1))
            .expect("drain");
        assert_eq!(tier.metrics().jobs_completed, 2);
    }

    #[test]
    fn test_worker_survives_panic() {
        let tier = Tier::new(TierKind::Normal, config(1)).expect("tier");
        let ran = Arc::new(AtomicU32::new(0));

        tier.submit(Box::new(|| panic!("raw job panic"))).expect("submit");
        let after = Arc::clone(&ran);
        tier.submit(Box::new(move || {
            after.fetch_add(1, Ordering::Relaxed);
        }))
        .expect("submit");

        tier.shutdown(Duration::from_secs(5), Duration::from_secs(1))
            .expect("drain");

        assert_eq!(ran.load(Ordering::Relaxed), 1);
        assert_eq!(tier.metrics().jobs_panicked, 1);
    }

    #[test]
    fn test_forced_stop_discards_queue() {
        let tier = Tier::new(TierKind::Low, config(1)).expect("tier");
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (started_tx, started_rx) = channel::bounded::<()>(1);
        let ran = Arc::new(AtomicU32::new(0));

        tier.submit(Box::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .expect("blocker");
        started_rx.recv().expect("worker started");

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            tier.submit(Box::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            }))
            .expect("queued");
        }

        // Release the blocker once the forced stop has begun
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            drop(release_tx);
        });

        let result = tier.shutdown(Duration::from_millis(50), Duration::from_secs(5));
        releaser.join().expect("releaser");

        match result {
            Err(TierError::ShutdownTimeout {
                tier: kind,
                discarded,
                detached,
            }) => {
                assert_eq!(kind, TierKind::Low);
                assert_eq!(discarded, 3);
                assert_eq!(detached, 0);
            }
            other => panic!("expected forced stop, got {other:?}"),
        }

        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert_eq!(tier.metrics().jobs_discarded, 3);
    }

    #[test]
    fn test_forced_stop_counts_every_discard() {
        let tier = Tier::new(TierKind::Normal, config(4)).expect("tier");
        let total = 2000;

        for _ in 0..total {
            tier.submit(Box::new(|| thread::sleep(Duration::from_millis(1))))
                .expect("queued");
        }

        // Workers are still busy when abort is raised and race discard_queued
        let result = tier.shutdown(Duration::from_millis(10), Duration::from_secs(5));
        let metrics = tier.metrics();

        match result {
            Err(TierError::ShutdownTimeout { discarded, detached, .. }) => {
                assert_eq!(detached, 0);
                assert_eq!(discarded, metrics.jobs_discarded);
                assert_eq!(metrics.jobs_completed + discarded, total);
            }
            other => panic!("expected forced stop, got {other:?}"),
        }
    }

    #[test]
    fn test_unbounded_grace_does_not_overflow() {
        let tier = Tier::new(TierKind::High, config(2)).expect("tier");
        tier.submit(Box::new(|| {})).expect("submit");

        let drained = tier.shutdown(Duration::MAX, Duration::MAX).expect("drained");
        assert_eq!(drained.workers_joined, 2);
    }
}
