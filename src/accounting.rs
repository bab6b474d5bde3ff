//! Per-owner in-flight task accounting
//!
//! Every submission takes an [`ActiveGuard`] before it is queued. The guard
//! travels with the job and decrements the owner's counter when dropped, so
//! the count stays exact whether the job completes, fails, panics, or is
//! discarded by a forced shutdown.

#![forbid(unsafe_code)]

//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::owner::OwnerId;

/// Concurrent owner → in-flight counter map
#[derive(Debug, Default)]
pub struct OwnerAccounting {
    counters: DashMap<OwnerId, Arc<AtomicUsize>>,
}

/// Point-in-time activity for one owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerActivity {
    /// Owner identity
    pub owner: OwnerId,
    /// Tasks submitted but not yet finished
    pub active: usize,
}

impl OwnerAccounting {
    /// Creates an empty accounting map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one task in flight for `owner`.
    ///
    /// The first submission for an unseen owner creates its counter under the
    /// shard lock, so racing first submissions share one counter.
    pub fn begin(&self, owner: &OwnerId) -> ActiveGuard {
        let counter = match self.counters.get(owner) {
            Some(existing) => Arc::clone(existing.value()),
            None => Arc::clone(
                self.counters
                    .entry(owner.clone())
                    .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                    .value(),
            ),
        };
        counter.fetch_add(1, Ordering::AcqRel);

        ActiveGuard { counter }
    }

    /// Tasks in flight for `owner`; zero for unknown owners
    #[must_use]
    pub fn active_count(&self, owner: &OwnerId) -> usize {
        self.counters
            .get(owner)
            .map_or(0, |counter| counter.load(Ordering::Acquire))
    }

    /// Sum across all owners
    #[must_use]
    pub fn total_active(&self) -> usize {
        self.counters
            .iter()
            .map(|entry| entry.value().load(Ordering::Acquire))
            .sum()
    }

    /// Number of owners with a counter, idle or not
    #[must_use]
    pub fn known_owners(&self) -> usize {
        self.counters.len()
    }

    /// Snapshot of every known owner, sorted by owner.
    ///
    /// Values may be momentarily stale relative to running workers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OwnerActivity> {
        let mut activity: Vec<_> = self
            .counters
            .iter()
            .map(|entry| OwnerActivity {
                owner: entry.key().clone(),
                active: entry.value().load(Ordering::Acquire),
            })
            .collect();
        activity.sort_by(|a, b| a.owner.cmp(&b.owner));
        activity
    }

    /// Owners with at least one task in flight
    #[must_use]
    pub fn busy_owners(&self) -> Vec<OwnerActivity> {
        let mut busy = self.snapshot();
        busy.retain(|activity| activity.active > 0);
        busy
    }

    /// Drops counters that are zero and referenced by no guard.
    ///
    /// Returns the number of counters removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.counters.len();
        // strong_count == 1: only the map holds it, no guard can bump it again
        self.counters.retain(|_, counter| {
            Arc::strong_count(counter) > 1 || counter.load(Ordering::Acquire) > 0
        });
        before.saturating_sub(self.counters.len())
    }
}

/// Releases one in-flight slot for an owner when dropped
#[derive(Debug)]
#[must_use = "dropping the guard immediately ends the task's accounting"]
pub struct ActiveGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
