//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
// Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pulse_dispatch::{DispatchHooks, DispatcherConfig, OwnerId, TaskOutcome, TierKind};

/// Hooks that count every callback
#[derive(Default)]
pub struct CountingHooks {
    pub submits: AtomicU64,
    pub completions: AtomicU64,
    pub failures: AtomicU64,
    pub slow_tasks: AtomicU64,
    pub activity_reports: AtomicU64,
}

impl CountingHooks {
    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn slow_tasks(&self) -> u64 {
        self.slow_tasks.load(Ordering::SeqCst)
    }
}

impl DispatchHooks for CountingHooks {
    fn on_submit(&self, _owner: &OwnerId, _tier: TierKind) {
        self.submits.fetch_add(1, Ordering::SeqCst);
    }

    fn on_completion(&self, _owner: &OwnerId, _elapsed: Duration, outcome: &TaskOutcome) {
        if !outcome.is_success() {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    fn on_slow_task(&self, _owner: &OwnerId, _elapsed: Duration, _threshold: Duration) {
        self.slow_tasks.fetch_add(1, Ordering::SeqCst);
    }

    fn on_activity(&self, _owner: &OwnerId, _active: usize) {
        self.activity_reports.fetch_add(1, Ordering::SeqCst);
    }
}

/// One worker per tier, short grace periods
pub fn single_worker_config() -> DispatcherConfig {
    DispatcherConfig {
        high_workers: 1,
        normal_workers: 1,
        low_workers: 1,
        shutdown_grace: Duration::from_secs(10),
        force_stop_grace: Duration::from_secs(2),
        thread_name_prefix: "it".to_string(),
        ..DispatcherConfig::default()
    }
}

/// Polls `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
