//! Pulse-Dispatch: priority worker pools for offloaded event handlers
//!
//! This library takes synchronous, callback-style event handlers owned by
//! third-party components and runs them on three fixed-size worker pools
//! instead of the thread that fired the event.
//!
//! # Features
//!
//! - **Priority Partitioning**: high, normal and low tiers with their own
//!   threads, so a flood of background work never starves urgent handlers
//! - **Per-Owner Accounting**: exact in-flight counts per component, released
//!   by an RAII guard on success, error, panic or discard
//! - **Slow-Task Observation**: handlers running past a threshold are
//!   reported once; nothing is ever interrupted
//! - **Failure Containment**: handler errors and panics are logged and never
//!   reach a worker thread
//! - **Hot Reconfiguration**: unregister, drain, rebuild and re-register
//!   under one lifecycle lock, with a bounded drain and forced stop
//!
//! # Example
//!
//! ```rust
//! use pulse_dispatch::{Dispatcher, DispatcherConfig, EventPriority, OwnerId};
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
//! let owner = OwnerId::from("Shops");
//!
//! dispatcher
//!     .submit(&owner, || Ok(()), EventPriority::High)
//!     .unwrap();
//!
//! let report = dispatcher.shutdown();
//! assert!(report.is_clean());
//! assert_eq!(dispatcher.active_count(&owner), 0);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
/// Per-owner in-flight accounting
pub mod accounting;
/// Administrative operations
pub mod admin;
/// Lifecycle and hot reconfiguration
pub mod controller;
/// Priority dispatcher over three tiers
pub mod dispatcher;
/// Hook system for dispatch instrumentation
pub mod hooks;
/// Event host interface and in-process bus
pub mod host;
/// Runtime-adjustable log subscriber
#[cfg(feature = "tracing")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracing")))]
pub mod logging;
/// Metrics collection and reporting
pub mod metrics;
/// Periodic activity reports
pub mod monitor;
/// Execution timing and failure containment
pub mod observer;
/// Owner identities and priorities
pub mod owner;
/// Settings and settings sources
pub mod settings;
/// Fixed-size worker pool per priority tier
pub mod tier;

// Public API exports
pub use accounting::{ActiveGuard, OwnerAccounting, OwnerActivity};
pub use admin::{AdminOp, AdminReply, Caller, Console, PermissionSet, execute};
pub use controller::{Controller, ControllerError, ControllerState, ReconfigureReport};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig, ShutdownReport};
pub use hooks::{DispatchHooks, HookRegistry, NullHooks};
pub use host::{
    Component, EventHost, FireCallback, Handler, HandlerDescriptor, HostError, ListenerHandle,
    LocalEventBus, Registration,
};
#[cfg(feature = "tracing")]
pub use logging::{LoggingError, init_logging, set_level};
pub use metrics::{DerivedMetrics, DispatchMetrics, MetricsSnapshot};
pub use monitor::ActivityMonitor;
pub use observer::{HandlerError, ObservedRun, TaskOutcome, TaskResult, TimeoutObserver};
pub use owner::{EventPriority, OwnerId, TierKind};
pub use settings::{
    AdvancedSettings, LogLevel, MemorySettings, PoolSizes, Settings, SettingsError, SettingsSource,
    YamlFileSettings,
};
pub use tier::{Tier, TierConfig, TierError, TierMetrics, TierMetricsSnapshot};
