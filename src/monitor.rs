//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
//! Periodic report of owners with work in flight

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::accounting::{OwnerAccounting, OwnerActivity};
use crate::hooks::HookRegistry;
use crate::metrics::DispatchMetrics;

#[cfg(feature = "tracing")]
use tracing::{debug, error, info, warn};

/// Default report interval
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Background thread polling [`OwnerAccounting`]
#[derive(Debug)]
pub struct ActivityMonitor {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ActivityMonitor {
    /// Starts reporting now and then every `interval`.
    ///
    /// A zero `interval` is replaced by [`DEFAULT_MONITOR_INTERVAL`].
    pub fn spawn(
        accounting: Arc<OwnerAccounting>,
        hooks: Arc<HookRegistry>,
        metrics: Arc<DispatchMetrics>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let interval = if interval.is_zero() {
            #[cfg(feature = "tracing")]
            warn!(
                default_secs = DEFAULT_MONITOR_INTERVAL.as_secs(),
                "Monitor interval 0 is invalid, using default"
            );
            DEFAULT_MONITOR_INTERVAL
        } else {
            interval
        };
        let (stop, stopped) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("pulse-dispatch-monitor".to_string())
            .spawn(move || {
                loop {
                    let busy = report(&accounting, &hooks);
                    metrics.update_active_tasks(busy.iter().map(|a| a.active).sum());

                    // A message or a dropped sender both mean stop
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                #[cfg(feature = "tracing")]
                debug!("Activity monitor stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Stops the thread and waits for it
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                #[cfg(feature = "tracing")]
                error!("Activity monitor thread panicked");
            }
        }
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reports every owner with tasks in flight; returns what was reported
pub fn report(accounting: &OwnerAccounting, hooks: &HookRegistry) -> Vec<OwnerActivity> {
    let busy = accounting.busy_owners();
    for activity in &busy {
        #[cfg(feature = "tracing")]
        info!(owner = %activity.owner, active = activity.active, "Active offloaded tasks");

        hooks.on_activity(&activity.owner, activity.active);
    }
    busy
}
