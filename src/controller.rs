//! Lifecycle and hot reconfiguration
//!
//! The [`Controller`] wires an [`EventHost`] to a [`Dispatcher`]: every
//! eligible handler gets a host listener that forwards the event to the
//! dispatcher. Reconfiguration replaces the dispatcher wholesale in a fixed
//! order (unregister, install settings, drain old, build new, re-register)
//! under one lifecycle mutex, so reconfigure and shutdown never interleave.

#![forbid(unsafe_code)]
#![allow(clippy::significant_drop_tightening)] // The lifecycle lock spans each whole operation

//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::accounting::OwnerAccounting;
use crate::dispatcher::{DispatchError, Dispatcher, ShutdownReport};
use crate::hooks::{DispatchHooks, HookRegistry};
use crate::host::{EventHost, FireCallback, HandlerDescriptor, ListenerHandle};
use crate::metrics::DispatchMetrics;
use crate::monitor::ActivityMonitor;
use crate::observer::TaskResult;
use crate::owner::{EventPriority, OwnerId};
use crate::settings::{Settings, SettingsError, SettingsSource};

#[cfg(feature = "tracing")]
use tracing::{debug, error, info, warn};

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Created, nothing running yet
    Idle,
    /// Dispatcher live and listeners registered
    Running,
    /// Shut down for good
    Stopped,
}

/// What one reconfiguration did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconfigureReport {
    /// Shutdown of the replaced dispatcher, if there was one
    pub previous: Option<ShutdownReport>,
    /// Host listeners removed
    pub listeners_removed: usize,
    /// Owners with at least one offloaded handler
    pub owners_wrapped: usize,
    /// Listeners registered against the new dispatcher
    pub handlers_registered: usize,
    /// Handlers left alone because their category is excluded
    pub handlers_skipped: usize,
    /// Registrations the host refused
    pub registration_failures: usize,
    /// Wall-clock time for the whole sequence
    pub elapsed: Duration,
}

struct Lifecycle {
    state: ControllerState,
    handles: Vec<ListenerHandle>,
    monitor: Option<(Duration, ActivityMonitor)>,
}

/// Owns the current dispatcher and its host registrations
pub struct Controller {
    host: Arc<dyn EventHost>,
    source: Arc<dyn SettingsSource>,
    self_owner: Option<OwnerId>,
    settings: RwLock<Arc<Settings>>,
    dispatcher: RwLock<Option<Arc<Dispatcher>>>,
    accounting: Arc<OwnerAccounting>,
    hooks: Arc<HookRegistry>,
    metrics: Arc<DispatchMetrics>,
    lifecycle: Mutex<Lifecycle>,
}

impl Controller {
    /// Idle controller over `host`, configured from `source`
    pub fn new(host: Arc<dyn EventHost>, source: Arc<dyn SettingsSource>) -> Self {
        Self {
            host,
            source,
            self_owner: None,
            settings: RwLock::new(Arc::new(Settings::default())),
            dispatcher: RwLock::new(None),
            accounting: Arc::new(OwnerAccounting::new()),
            hooks: Arc::new(HookRegistry::new()),
            metrics: Arc::new(DispatchMetrics::new()),
            lifecycle: Mutex::new(Lifecycle {
                state: ControllerState::Idle,
                handles: Vec::new(),
                monitor: None,
            }),
        }
    }

    /// Owner identity of the embedding component; never offloaded
    #[must_use]
    pub fn with_self_owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.self_owner = Some(owner.into());
        self
    }

    /// Installs observation hooks
    #[must_use]
    pub fn with_hooks(self, hooks: Arc<dyn DispatchHooks>) -> Self {
        self.hooks.set_hooks(hooks);
        self
    }

    /// Loads settings from the source and starts dispatching
    pub fn start(&self) -> Result<ReconfigureReport, ControllerError> {
        self.reload()
    }

    /// Reconfigures with freshly loaded settings
    pub fn reload(&self) -> Result<ReconfigureReport, ControllerError> {
        let settings = self.source.load();
        self.reconfigure(settings)
    }

    /// Replaces the dispatcher and registrations according to `settings`.
    ///
    /// Work submitted before the call finishes on the old dispatcher (or is
    /// discarded by its forced stop) before this returns. Starts the system
    /// when idle; fails once shut down. If the new dispatcher cannot be
    /// built the controller drops back to [`ControllerState::Idle`] with no
    /// listeners registered, and a later reconfigure or reload recovers.
    pub fn reconfigure(&self, settings: Settings) -> Result<ReconfigureReport, ControllerError> {
        let mut lifecycle = self.lifecycle.lock();
        self.reconfigure_locked(&mut lifecycle, settings)
    }

    fn reconfigure_locked(
        &self,
        lifecycle: &mut Lifecycle,
        settings: Settings,
    ) -> Result<ReconfigureReport, ControllerError> {
        if lifecycle.state == ControllerState::Stopped {
            return Err(ControllerError::Stopped);
        }

        let started = Instant::now();
        let mut report = ReconfigureReport {
            listeners_removed: self.unregister_listeners(lifecycle),
            ..ReconfigureReport::default()
        };

        let settings = Arc::new(settings);
        *self.settings.write() = Arc::clone(&settings);
        Self::apply_log_level(&settings);

        // Take the slot first so submitters never wait on the drain
        let previous = self.dispatcher.write().take();
        report.previous = previous.map(|dispatcher| dispatcher.shutdown());

        let built = Dispatcher::with_shared(
            settings.dispatcher_config(),
            Arc::clone(&self.accounting),
            Arc::clone(&self.hooks),
            Arc::clone(&self.metrics),
        );
        let dispatcher = match built {
            Ok(dispatcher) => Arc::new(dispatcher),
            Err(err) => {
                // Nothing is dispatching; the next reconfigure starts from scratch
                #[cfg(feature = "tracing")]
                error!(error = %err, "Failed to build dispatcher, dispatch is idle");

                if let Some((_, mut monitor)) = lifecycle.monitor.take() {
                    monitor.stop();
                }
                lifecycle.state = ControllerState::Idle;
                return Err(err.into());
            }
        };
        *self.dispatcher.write() = Some(Arc::clone(&dispatcher));

        self.register_handlers(lifecycle, &settings, &dispatcher, &mut report);
        self.ensure_monitor(lifecycle, settings.monitor_interval());

        let pruned = self.accounting.prune_idle();
        self.metrics.record_reconfiguration();
        lifecycle.state = ControllerState::Running;
        report.elapsed = started.elapsed();

        #[cfg(feature = "tracing")]
        info!(
            owners = report.owners_wrapped,
            handlers = report.handlers_registered,
            skipped = report.handlers_skipped,
            excluded_owners = settings.excluded_owners.len(),
            excluded_categories = settings.excluded_categories.len(),
            slow_task_threshold_ms = settings.advanced.slow_task_threshold_ms,
            pruned,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Dispatch configured"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = pruned;

        Ok(report)
    }

    /// Unregisters every listener and drains the dispatcher.
    ///
    /// Later submissions are rejected with [`DispatchError::ShuttingDown`].
    /// Calling it again returns an empty report.
    pub fn shutdown(&self) -> ShutdownReport {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ControllerState::Stopped {
            return ShutdownReport::default();
        }

        self.unregister_listeners(&mut lifecycle);
        if let Some((_, mut monitor)) = lifecycle.monitor.take() {
            monitor.stop();
        }

        let current = self.dispatcher.write().take();
        let report = current.map(|dispatcher| dispatcher.shutdown()).unwrap_or_default();
        lifecycle.state = ControllerState::Stopped;

        #[cfg(feature = "tracing")]
        info!(clean = report.is_clean(), "Dispatch shut down");

        report
    }

    /// Submits `task` to the live dispatcher
    pub fn submit<F>(&self, owner: &OwnerId, task: F, priority: EventPriority) -> Result<(), DispatchError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let dispatcher = self.dispatcher.read().clone();
        match dispatcher {
            Some(dispatcher) => dispatcher.submit(owner, task, priority),
            None => {
                self.metrics.record_rejected();
                Err(DispatchError::ShuttingDown)
            }
        }
    }

    /// Tasks in flight for `owner`, across dispatcher generations
    #[must_use]
    pub fn active_count(&self, owner: &OwnerId) -> usize {
        self.accounting.active_count(owner)
    }

    /// Adds an excluded category, persists the set, and reconfigures.
    ///
    /// Returns `false` without touching anything when already excluded.
    pub fn add_exclusion(&self, category: impl Into<String>) -> Result<bool, ControllerError> {
        let category = category.into();
        self.update_exclusions(|excluded| excluded.insert(category))
    }

    /// Removes an excluded category, persists the set, and reconfigures.
    ///
    /// Returns `false` without touching anything when not excluded.
    pub fn remove_exclusion(&self, category: &str) -> Result<bool, ControllerError> {
        self.update_exclusions(|excluded| excluded.remove(category))
    }

    /// Excluded categories, sorted
    #[must_use]
    pub fn list_exclusions(&self) -> Vec<String> {
        self.settings.read().excluded_categories.iter().cloned().collect()
    }

    fn update_exclusions<F>(&self, change: F) -> Result<bool, ControllerError>
    where
        F: FnOnce(&mut BTreeSet<String>) -> bool,
    {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ControllerState::Stopped {
            return Err(ControllerError::Stopped);
        }

        let current = self.settings();
        let mut excluded = current.excluded_categories.clone();
        if !change(&mut excluded) {
            return Ok(false);
        }

        // Persist before applying so a failed write changes nothing
        self.source.store_exclusions(&excluded)?;
        let updated = current.with_excluded_categories(excluded);

        if lifecycle.state == ControllerState::Idle {
            *self.settings.write() = Arc::new(updated);
        } else {
            self.reconfigure_locked(&mut lifecycle, updated)?;
        }
        Ok(true)
    }

    /// Settings currently in effect
    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings.read())
    }

    /// Lifecycle state
    pub fn state(&self) -> ControllerState {
        self.lifecycle.lock().state
    }

    /// Live dispatcher, if running
    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.dispatcher.read().clone()
    }

    /// Owner accounting shared by every dispatcher generation
    pub fn accounting(&self) -> &Arc<OwnerAccounting> {
        &self.accounting
    }

    /// Hook registry shared by every dispatcher generation
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Metrics shared by every dispatcher generation
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    fn unregister_listeners(&self, lifecycle: &mut Lifecycle) -> usize {
        let removed = lifecycle.handles.len();
        for handle in lifecycle.handles.drain(..) {
            self.host.unregister_all(handle);
        }

        #[cfg(feature = "tracing")]
        if removed > 0 {
            debug!(listeners = removed, "Listeners unregistered");
        }

        removed
    }

    fn register_handlers(
        &self,
        lifecycle: &mut Lifecycle,
        settings: &Settings,
        dispatcher: &Arc<Dispatcher>,
        report: &mut ReconfigureReport,
    ) {
        for component in self.host.components() {
            let owner = component.owner;
            if self.self_owner.as_ref() == Some(&owner) || !settings.should_wrap(owner.as_str()) {
                continue;
            }

            let mut registered = 0;
            for handler in component.handlers {
                if settings.is_category_excluded(&handler.category) {
                    #[cfg(feature = "tracing")]
                    info!(
                        owner = %owner,
                        category = %handler.category,
                        "Category excluded, handler not offloaded"
                    );

                    report.handlers_skipped += 1;
                    continue;
                }

                let registration = handler.registration();
                let on_fire = forward_to(Arc::downgrade(dispatcher), owner.clone(), handler);

                match self.host.register(&owner, registration, on_fire) {
                    Ok(handle) => {
                        lifecycle.handles.push(handle);
                        registered += 1;
                    }
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        warn!(owner = %owner, error = %_err, "Host refused listener registration");

                        report.registration_failures += 1;
                    }
                }
            }

            if registered > 0 {
                #[cfg(feature = "tracing")]
                info!(owner = %owner, handlers = registered, "Offloading handlers");

                report.owners_wrapped += 1;
                report.handlers_registered += registered;
            }
        }
    }

    fn ensure_monitor(&self, lifecycle: &mut Lifecycle, interval: Duration) {
        if matches!(&lifecycle.monitor, Some((current, _)) if *current == interval) {
            return;
        }
        if let Some((_, mut monitor)) = lifecycle.monitor.take() {
            monitor.stop();
        }

        match ActivityMonitor::spawn(
            Arc::clone(&self.accounting),
            Arc::clone(&self.hooks),
            Arc::clone(&self.metrics),
            interval,
        ) {
            Ok(monitor) => lifecycle.monitor = Some((interval, monitor)),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                error!(error = %_err, "Failed to start activity monitor");
            }
        }
    }

    fn apply_log_level(_settings: &Settings) {
        #[cfg(feature = "tracing")]
        if let Err(err) = crate::logging::set_level(_settings.advanced.log_level) {
            warn!(error = %err, "Failed to apply log level");
        }
    }
}

/// Listener body: forward the fired event to the dispatcher it was built for
fn forward_to(dispatcher: Weak<Dispatcher>, owner: OwnerId, handler: HandlerDescriptor) -> FireCallback {
    let priority = handler.priority;
    let invoke = handler.invoke;

    Arc::new(move || {
        // Gone once a reconfigure has replaced it
        let Some(dispatcher) = dispatcher.upgrade() else {
            return;
        };

        let invoke = Arc::clone(&invoke);
        if let Err(_err) = dispatcher.submit(&owner, move || invoke(), priority) {
            #[cfg(feature = "tracing")]
            warn!(owner = %owner, error = %_err, "Event not offloaded");
        }
    })
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.lifecycle.get_mut().state == ControllerState::Running {
            let _report = self.shutdown();

            #[cfg(feature = "tracing")]
            if !_report.is_clean() {
                error!(forced = ?_report.forced, "Dispatch force-stopped on drop");
            }
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("self_owner", &self.self_owner)
            .field("settings", &self.settings())
            .field("dispatcher", &self.dispatcher())
            .finish_non_exhaustive()
    }
}

/// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The controller was shut down
    #[error("Controller is shut down")]
    Stopped,

    /// Building the dispatcher failed
    #[error("Dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Persisting settings failed
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Component, LocalEventBus};
    use crate::settings::MemorySettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.thread_pools.high_priority = 1;
        settings.thread_pools.normal_priority = 1;
        settings.thread_pools.low_priority = 1;
        settings.advanced.shutdown_grace_secs = 5;
        settings.advanced.force_stop_grace_secs = 1;
        settings
    }

    fn counting_handler(category: &str, counter: &Arc<AtomicUsize>) -> HandlerDescriptor {
        let counter = Arc::clone(counter);
        HandlerDescriptor::new(category, EventPriority::Normal, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn setup() -> (Arc<LocalEventBus>, Arc<MemorySettings>, Arc<AtomicUsize>) {
        let bus = Arc::new(LocalEventBus::new());
        let runs = Arc::new(AtomicUsize::new(0));
        bus.add_component(
            Component::new("Shops")
                .with_handler(counting_handler("ChatEvent", &runs))
                .with_handler(counting_handler("MoveEvent", &runs)),
        );
        bus.add_component(Component::new("Wrapper").with_handler(counting_handler("ChatEvent", &runs)));
        (bus, Arc::new(MemorySettings::new(fast_settings())), runs)
    }

    #[test]
    fn test_start_registers_eligible_handlers() {
        let (bus, source, _) = setup();
        let controller = Controller::new(bus.clone(), source).with_self_owner("Wrapper");
        assert_eq!(controller.state(), ControllerState::Idle);

        let report = controller.start().expect("start");
        assert_eq!(controller.state(), ControllerState::Running);
        assert!(report.previous.is_none());
        assert_eq!(report.owners_wrapped, 1);
        assert_eq!(report.handlers_registered, 2);
        assert_eq!(bus.listener_count(), 2);

        controller.shutdown();
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_excluded_category_not_registered() {
        let (bus, source, _) = setup();
        let mut settings = fast_settings();
        settings.excluded_categories.insert("MoveEvent".to_string());
        source.set(settings);

        let controller = Controller::new(bus.clone(), source).with_self_owner("Wrapper");
        let report = controller.start().expect("start");

        assert_eq!(report.handlers_registered, 1);
        assert_eq!(report.handlers_skipped, 1);
        assert_eq!(bus.listeners_for("MoveEvent"), 0);
        controller.shutdown();
    }

    #[test]
    fn test_excluded_owner_not_registered() {
        let (bus, source, _) = setup();
        let mut settings = fast_settings();
        settings.excluded_owners.insert("Shops".to_string());
        source.set(settings);

        let controller = Controller::new(bus.clone(), source).with_self_owner("Wrapper");
        let report = controller.start().expect("start");

        assert_eq!(report.owners_wrapped, 0);
        assert_eq!(bus.listener_count(), 0);
        controller.shutdown();
    }

    #[test]
    fn test_fired_event_runs_on_dispatcher() {
        let (bus, source, runs) = setup();
        let controller = Controller::new(bus.clone(), source).with_self_owner("Wrapper");
        controller.start().expect("start");

        assert_eq!(bus.fire("ChatEvent", false), 1);
        let report = controller.shutdown();

        assert!(report.is_clean());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(controller.metrics().snapshot().tasks_completed, 1);
    }

    #[test]
    fn test_reconfigure_after_shutdown_fails() {
        let (bus, source, _) = setup();
        let controller = Controller::new(bus, source);
        controller.start().expect("start");
        controller.shutdown();

        assert!(matches!(controller.reload(), Err(ControllerError::Stopped)));
        assert!(matches!(controller.add_exclusion("ChatEvent"), Err(ControllerError::Stopped)));
        assert_eq!(controller.shutdown(), ShutdownReport::default());
    }

    #[test]
    fn test_exclusion_while_idle_does_not_start() {
        let (bus, source, _) = setup();
        let controller = Controller::new(bus.clone(), source.clone());

        assert!(controller.add_exclusion("ChatEvent").expect("add"));
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.list_exclusions(), vec!["ChatEvent".to_string()]);
        assert!(source.load().is_category_excluded("ChatEvent"));
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_unchanged_exclusion_is_noop() {
        let (bus, source, _) = setup();
        let controller = Controller::new(bus, source);
        controller.start().expect("start");

        let before = controller.metrics().snapshot().reconfigurations;
        assert!(!controller.remove_exclusion("NeverExcluded").expect("remove"));
        assert_eq!(controller.metrics().snapshot().reconfigurations, before);
        controller.shutdown();
    }

    #[test]
    fn test_failed_rebuild_drops_to_idle_and_recovers() {
        let (bus, source, runs) = setup();
        let controller = Controller::new(bus.clone(), source);
        controller.start().expect("start");

        let mut broken = fast_settings();
        broken.thread_pools.low_priority = 0;
        let result = controller.reconfigure(broken);

        assert!(matches!(result, Err(ControllerError::Dispatch(_))));
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(controller.dispatcher().is_none());
        assert_eq!(bus.fire("ChatEvent", false), 0);
        assert!(matches!(
            controller.submit(&OwnerId::from("Shops"), || Ok(()), EventPriority::Low),
            Err(DispatchError::ShuttingDown)
        ));

        controller.reload().expect("reload recovers");
        assert_eq!(controller.state(), ControllerState::Running);
        assert_eq!(bus.fire("ChatEvent", false), 2);

        controller.shutdown();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
