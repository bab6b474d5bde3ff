#![forbid(unsafe_code)]
#![allow(clippy::inline_always)] /* Called on every task */

/*
 *     ______   __  __     __         ______     ______
 *    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
 *    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
 *     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
 *      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
 *
 * Author: Colin MacRitchie / Ripple Group
 */

/* Observation hooks for dispatch lifecycle events */

use crate::observer::TaskOutcome;
use crate::owner::{OwnerId, TierKind};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Dispatch observation interface.
pub trait DispatchHooks: Send + Sync {
    /// Called after a task was accepted by a tier.
    fn on_submit(&self, owner: &OwnerId, tier: TierKind);

    /// Called after a task ran, whatever its outcome.
    fn on_completion(&self, owner: &OwnerId, elapsed: Duration, outcome: &TaskOutcome);

    /// Called when a task ran longer than the slow-task threshold.
    fn on_slow_task(&self, owner: &OwnerId, elapsed: Duration, threshold: Duration);

    /// Called by the activity monitor for each busy owner.
    fn on_activity(&self, owner: &OwnerId, active: usize);
}

/// No-op `DispatchHooks`
#[derive(Debug, Default)]
pub struct NullHooks;

impl DispatchHooks for NullHooks {
    #[inline(always)]
    fn on_submit(&self, _owner: &OwnerId, _tier: TierKind) {
        // No-op
    }

    #[inline(always)]
    fn on_completion(&self, _owner: &OwnerId, _elapsed: Duration, _outcome: &TaskOutcome) {
        // No-op
    }

    #[inline(always)]
    fn on_slow_task(&self, _owner: &OwnerId, _elapsed: Duration, _threshold: Duration) {
        // No-op
    }

    #[inline(always)]
    fn on_activity(&self, _owner: &OwnerId, _active: usize) {
        // No-op
    }
}

/// Hook registry; hooks can be swapped while workers run
pub struct HookRegistry {
    hooks: RwLock<Option<Arc<dyn DispatchHooks>>>,
}

impl HookRegistry {
    /// Creates a registry with no hooks installed
    #[must_use]
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(None),
        }
    }

    /// Installs hooks, returning the previous ones
    pub fn set_hooks(&self, hooks: Arc<dyn DispatchHooks>) -> Option<Arc<dyn DispatchHooks>> {
        self.hooks.write().replace(hooks)
    }

    /// Removes installed hooks
    pub fn clear_hooks(&self) -> Option<Arc<dyn DispatchHooks>> {
        self.hooks.write().take()
    }

    /// Forwards to [`DispatchHooks::on_submit`]
    #[inline(always)]
    pub fn on_submit(&self, owner: &OwnerId, tier: TierKind) {
        if let Some(hooks) = self.current() {
            hooks.on_submit(owner, tier);
        }
    }

    /// Forwards to [`DispatchHooks::on_completion`]
    #[inline(always)]
    pub fn on_completion(&self, owner: &OwnerId, elapsed: Duration, outcome: &TaskOutcome) {
        if let Some(hooks) = self.current() {
            hooks.on_completion(owner, elapsed, outcome);
        }
    }

    /// Forwards to [`DispatchHooks::on_slow_task`]
    #[inline(always)]
    pub fn on_slow_task(&self, owner: &OwnerId, elapsed: Duration, threshold: Duration) {
        if let Some(hooks) = self.current() {
            hooks.on_slow_task(owner, elapsed, threshold);
        }
    }

    /// Forwards to [`DispatchHooks::on_activity`]
    #[inline(always)]
    pub fn on_activity(&self, owner: &OwnerId, active: usize) {
        if let Some(hooks) = self.current() {
            hooks.on_activity(owner, active);
        }
    }

    /// Whether hooks are installed
    #[inline]
    pub fn has_hooks(&self) -> bool {
        self.hooks.read().is_some()
    }

    /* Clone out so user hooks never run under the lock */
    #[inline(always)]
    fn current(&self) -> Option<Arc<dyn DispatchHooks>> {
        self.hooks.read().clone()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("installed", &self.has_hooks())
            .finish()
    }
}
