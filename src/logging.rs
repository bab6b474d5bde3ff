//! Log subscriber with a runtime-adjustable level
//!
//! [`init_logging`] installs a global `tracing` subscriber whose filter can be
//! swapped later by [`set_level`]; the controller calls it on every
//! reconfigure so `advanced.log_level` follows the settings. `RUST_LOG`, when
//! set, wins over the configured level at startup.

#![forbid(unsafe_code)]

//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
use std::sync::OnceLock;

use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::settings::LogLevel;

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Installs the global subscriber at `level`
pub fn init_logging(level: LogLevel) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .try_init()?;

    // Only the first successful init reaches here
    let _ = FILTER.set(handle);

    tracing::debug!(level = %level, "Logging initialized");
    Ok(())
}

/// Changes the active level.
///
/// Returns `Ok(false)` when [`init_logging`] was never called, in which case
/// whatever subscriber the host installed is left alone.
pub fn set_level(level: LogLevel) -> Result<bool, LoggingError> {
    let Some(handle) = FILTER.get() else {
        return Ok(false);
    };

    handle.reload(EnvFilter::new(level.filter_directive()))?;
    tracing::info!(level = %level, "Log level changed");
    Ok(true)
}

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A global subscriber is already installed
    #[error("Failed to install log subscriber: {0}")]
    Init(#[from] TryInitError),

    /// The subscriber backing the filter is gone
    #[error("Failed to change log level: {0}")]
    Reload(#[from] reload::Error),
}
