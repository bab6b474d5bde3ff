//! Execution observer for offloaded handlers
//!
//! [`TimeoutObserver::run`] is the innermost wrapper around every task: it
//! measures wall-clock execution time, reports tasks that exceed the
//! slow-task threshold, and contains errors and panics so they never reach
//! the worker thread. It never interrupts a running task.

#![forbid(unsafe_code)]

//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::{error, warn};

use crate::hooks::HookRegistry;
use crate::metrics::DispatchMetrics;
use crate::owner::OwnerId;

/// Error type handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of one handler invocation
pub type TaskResult = Result<(), HandlerError>;

/// Default slow-task threshold
pub const DEFAULT_SLOW_TASK_THRESHOLD: Duration = Duration::from_millis(5000);

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Returned `Ok`
    Completed,
    /// Returned an error (rendered message)
    Failed(String),
    /// Panicked (panic message)
    Panicked(String),
}

impl TaskOutcome {
    /// Whether the task returned `Ok`
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Timing and outcome of one observed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRun {
    /// Wall-clock execution time
    pub elapsed: Duration,
    /// How the task ended
    pub outcome: TaskOutcome,
    /// Whether `elapsed` exceeded the threshold
    pub slow: bool,
}

/// Measures, reports and contains task execution
#[derive(Debug, Clone)]
pub struct TimeoutObserver {
    threshold: Duration,
    hooks: Arc<HookRegistry>,
    metrics: Arc<DispatchMetrics>,
}

impl TimeoutObserver {
    /// Creates an observer reporting through `hooks` and `metrics`
    pub fn new(threshold: Duration, hooks: Arc<HookRegistry>, metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            threshold,
            hooks,
            metrics,
        }
    }

    /// Configured slow-task threshold
    #[inline]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Runs `task` to completion on the calling thread.
    ///
    /// Errors and panics are logged with the owner and swallowed. A run
    /// strictly longer than the threshold produces one slow-task report.
    pub fn run<F>(&self, owner: &OwnerId, task: F) -> ObservedRun
    where
        F: FnOnce() -> TaskResult,
    {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(task));
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(Ok(())) => {
                self.metrics.record_completed(elapsed);
                TaskOutcome::Completed
            }
            Ok(Err(err)) => {
                #[cfg(feature = "tracing")]
                error!(
                    owner = %owner,
                    error = %err,
                    details = ?err,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Offloaded handler returned an error"
                );

                self.metrics.record_failed(elapsed);
                TaskOutcome::Failed(err.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());

                #[cfg(feature = "tracing")]
                {
                    let worker = std::thread::current();
                    error!(
                        owner = %owner,
                        panic = %message,
                        thread = worker.name().unwrap_or("<unnamed>"),
                        "Offloaded handler panicked"
                    );
                }

                self.metrics.record_panicked(elapsed);
                TaskOutcome::Panicked(message)
            }
        };

        let slow = elapsed > self.threshold;
        if slow {
            #[cfg(feature = "tracing")]
            warn!(
                owner = %owner,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "Offloaded handler exceeded slow-task threshold"
            );

            self.metrics.record_slow_task();
            contain_hook(owner, "on_slow_task", || {
                self.hooks.on_slow_task(owner, elapsed, self.threshold);
            });
        }

        contain_hook(owner, "on_completion", || {
            self.hooks.on_completion(owner, elapsed, &outcome);
        });

        ObservedRun {
            elapsed,
            outcome,
            slow,
        }
    }
}

/// Runs a user hook; a panicking hook is logged and otherwise ignored
fn contain_hook(owner: &OwnerId, hook: &'static str, call: impl FnOnce()) {
    if let Err(_payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
        #[cfg(feature = "tracing")]
        error!(
            owner = %owner,
            hook,
            panic = %panic_message(_payload.as_ref()),
            "Dispatch hook panicked"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (owner, hook);
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
