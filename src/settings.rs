//! Dispatch settings and their sources
//!
//! [`Settings`] is an immutable value: the controller swaps whole
//! `Arc<Settings>` instances, never individual fields. Parsing is lenient
//! per field, so one malformed entry falls back to its default without
//! discarding the rest of the document.

#![forbid(unsafe_code)]

//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::dispatcher::DispatcherConfig;

#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

/// Owner name that matches every owner in `wrapped_owners`
pub const WILDCARD: &str = "*";

/// Largest accepted interval or grace period, in seconds (one day)
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Minimum level for emitted log events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Everything including per-task details
    Debug,
    /// Lifecycle events and activity reports
    #[default]
    Info,
    /// Slow tasks and failures only
    Warning,
}

impl LogLevel {
    /// Parses `DEBUG`, `INFO`, `WARNING` (or `WARN`), ignoring case
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            _ => None,
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`
    #[must_use]
    pub const fn filter_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        })
    }
}

/// Worker counts per tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSizes {
    /// High tier workers
    pub high_priority: usize,
    /// Normal tier workers
    pub normal_priority: usize,
    /// Low tier workers
    pub low_priority: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            high_priority: 2,
            normal_priority: 5,
            low_priority: 3,
        }
    }
}

/// Tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvancedSettings {
    /// Minimum level for emitted log events
    pub log_level: LogLevel,
    /// Runs longer than this are reported as slow (ms)
    pub slow_task_threshold_ms: u64,
    /// Activity report interval (seconds)
    pub monitor_interval_secs: u64,
    /// Drain grace period per shutdown (seconds)
    pub shutdown_grace_secs: u64,
    /// Time running jobs get after a forced stop (seconds)
    pub force_stop_grace_secs: u64,
    /// Per-tier queue bound; `None` for unbounded
    pub queue_capacity: Option<usize>,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            slow_task_threshold_ms: 5000,
            monitor_interval_secs: 60,
            shutdown_grace_secs: 60,
            force_stop_grace_secs: 60,
            queue_capacity: None,
        }
    }
}

/// Complete dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Owners whose handlers are offloaded; `"*"` means all
    pub wrapped_owners: BTreeSet<String>,
    /// Owners never offloaded, even when wrapped
    pub excluded_owners: BTreeSet<String>,
    /// Event categories whose handlers are never offloaded
    pub excluded_categories: BTreeSet<String>,
    /// Worker counts per tier
    pub thread_pools: PoolSizes,
    /// Tuning knobs
    pub advanced: AdvancedSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wrapped_owners: BTreeSet::from([WILDCARD.to_string()]),
            excluded_owners: BTreeSet::new(),
            excluded_categories: BTreeSet::new(),
            thread_pools: PoolSizes::default(),
            advanced: AdvancedSettings::default(),
        }
    }
}

impl Settings {
    /// Parses a YAML document.
    ///
    /// Only a syntax error fails; missing or malformed fields fall back to
    /// their defaults with a warning naming the field.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SettingsError> {
        let root: Value = serde_yaml::from_str(yaml)?;
        Ok(Self::from_value(&root))
    }

    /// Builds settings from an already-parsed YAML tree
    #[must_use]
    pub fn from_value(root: &Value) -> Self {
        let defaults = Self::default();
        let pools = defaults.thread_pools;
        let advanced = defaults.advanced;

        let log_level = match field::<Option<String>>(root, &["advanced", "log_level"], None) {
            Some(raw) => LogLevel::parse(&raw).unwrap_or_else(|| {
                #[cfg(feature = "tracing")]
                warn!(field = "advanced.log_level", value = %raw, "Unknown log level, using INFO");
                LogLevel::Info
            }),
            None => advanced.log_level,
        };

        let queue_capacity = match field(root, &["advanced", "queue_capacity"], advanced.queue_capacity) {
            Some(0) => {
                #[cfg(feature = "tracing")]
                warn!(field = "advanced.queue_capacity", "Queue capacity 0 is invalid, using unbounded queues");
                None
            }
            other => other,
        };

        Self {
            wrapped_owners: field(root, &["wrapped_owners"], defaults.wrapped_owners),
            excluded_owners: field(root, &["excluded_owners"], defaults.excluded_owners),
            excluded_categories: field(root, &["excluded_categories"], defaults.excluded_categories),
            thread_pools: PoolSizes {
                high_priority: pool_size(root, "high_priority", pools.high_priority),
                normal_priority: pool_size(root, "normal_priority", pools.normal_priority),
                low_priority: pool_size(root, "low_priority", pools.low_priority),
            },
            advanced: AdvancedSettings {
                log_level,
                slow_task_threshold_ms: field(
                    root,
                    &["advanced", "slow_task_threshold_ms"],
                    advanced.slow_task_threshold_ms,
                ),
                monitor_interval_secs: bounded_secs(
                    root,
                    "monitor_interval_secs",
                    advanced.monitor_interval_secs,
                    1..=MAX_INTERVAL_SECS,
                ),
                shutdown_grace_secs: bounded_secs(
                    root,
                    "shutdown_grace_secs",
                    advanced.shutdown_grace_secs,
                    0..=MAX_INTERVAL_SECS,
                ),
                force_stop_grace_secs: bounded_secs(
                    root,
                    "force_stop_grace_secs",
                    advanced.force_stop_grace_secs,
                    0..=MAX_INTERVAL_SECS,
                ),
                queue_capacity,
            },
        }
    }

    /// Renders the settings as YAML
    pub fn to_yaml(&self) -> Result<String, SettingsError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Whether handlers of `owner` should be offloaded
    #[must_use]
    pub fn should_wrap(&self, owner: &str) -> bool {
        (self.wrapped_owners.contains(WILDCARD) || self.wrapped_owners.contains(owner))
            && !self.excluded_owners.contains(owner)
    }

    /// Whether handlers for `category` are left alone
    #[must_use]
    pub fn is_category_excluded(&self, category: &str) -> bool {
        self.excluded_categories.contains(category)
    }

    /// Copy with a different excluded-category set
    #[must_use]
    pub fn with_excluded_categories(&self, excluded: BTreeSet<String>) -> Self {
        Self {
            excluded_categories: excluded,
            ..self.clone()
        }
    }

    /// Activity report interval
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.advanced.monitor_interval_secs)
    }

    /// Dispatcher configuration derived from these settings
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            high_workers: self.thread_pools.high_priority,
            normal_workers: self.thread_pools.normal_priority,
            low_workers: self.thread_pools.low_priority,
            slow_task_threshold: Duration::from_millis(self.advanced.slow_task_threshold_ms),
            queue_capacity: self.advanced.queue_capacity,
            shutdown_grace: Duration::from_secs(self.advanced.shutdown_grace_secs),
            force_stop_grace: Duration::from_secs(self.advanced.force_stop_grace_secs),
            ..DispatcherConfig::default()
        }
    }
}

/// Reads one field, falling back to `default` when missing or malformed
fn field<T: DeserializeOwned>(root: &Value, path: &[&str], default: T) -> T {
    let mut node = root;
    for key in path {
        match node.get(*key) {
            Some(child) => node = child,
            None => {
                #[cfg(feature = "tracing")]
                debug!(field = %path.join("."), "Setting missing, using default");
                return default;
            }
        }
    }

    match serde_yaml::from_value(node.clone()) {
        Ok(value) => value,
        Err(_err) => {
            #[cfg(feature = "tracing")]
            warn!(field = %path.join("."), error = %_err, "Invalid setting, using default");
            default
        }
    }
}

fn pool_size(root: &Value, key: &str, default: usize) -> usize {
    match field(root, &["thread_pools", key], default) {
        0 => {
            #[cfg(feature = "tracing")]
            warn!(field = %format!("thread_pools.{key}"), default, "Pool size 0 is invalid, using default");
            default
        }
        size => size,
    }
}

fn bounded_secs(root: &Value, key: &str, default: u64, range: RangeInclusive<u64>) -> u64 {
    let secs = field(root, &["advanced", key], default);
    if range.contains(&secs) {
        return secs;
    }

    #[cfg(feature = "tracing")]
    warn!(
        field = %format!("advanced.{key}"),
        value = secs,
        min = *range.start(),
        max = *range.end(),
        default,
        "Setting out of range, using default"
    );
    default
}

/// Configuration collaborator
pub trait SettingsSource: Send + Sync {
    /// Current settings; never fails, falls back to defaults
    fn load(&self) -> Settings;

    /// Persists the excluded-category set
    fn store_exclusions(&self, excluded: &BTreeSet<String>) -> Result<(), SettingsError>;
}

/// Settings stored in a YAML file
#[derive(Debug, Clone)]
pub struct YamlFileSettings {
    path: PathBuf,
}

impl YamlFileSettings {
    /// Source backed by `path`; the file need not exist yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the default settings if the file does not exist.
    ///
    /// Returns `true` when a file was written.
    pub fn write_default_if_missing(&self) -> Result<bool, SettingsError> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, Settings::default().to_yaml()?)?;

        #[cfg(feature = "tracing")]
        info!(path = %self.path.display(), "Wrote default settings");

        Ok(true)
    }

    fn read_tree(&self) -> Result<Option<Value>, SettingsError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(serde_yaml::from_str(&text)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl SettingsSource for YamlFileSettings {
    fn load(&self) -> Settings {
        match self.read_tree() {
            Ok(Some(root)) => Settings::from_value(&root),
            Ok(None) => {
                #[cfg(feature = "tracing")]
                info!(path = %self.path.display(), "Settings file not found, using defaults");
                Settings::default()
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                warn!(path = %self.path.display(), error = %_err, "Unreadable settings file, using defaults");
                Settings::default()
            }
        }
    }

    fn store_exclusions(&self, excluded: &BTreeSet<String>) -> Result<(), SettingsError> {
        // Rewrite only the exclusion list; other keys stay as the user wrote them
        let mut root = match self.read_tree()? {
            Some(Value::Mapping(mapping)) => mapping,
            Some(_) | None => match serde_yaml::to_value(Settings::default())? {
                Value::Mapping(mapping) => mapping,
                _ => Mapping::new(),
            },
        };

        let list = excluded.iter().cloned().map(Value::String).collect();
        root.insert(
            Value::String("excluded_categories".to_string()),
            Value::Sequence(list),
        );

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_yaml::to_string(&Value::Mapping(root))?)?;

        #[cfg(feature = "tracing")]
        debug!(path = %self.path.display(), count = excluded.len(), "Stored excluded categories");

        Ok(())
    }
}

/// In-memory settings source
#[derive(Debug, Default)]
pub struct MemorySettings {
    settings: RwLock<Settings>,
}

impl MemorySettings {
    /// Source holding `settings`
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Replaces the held settings; picked up by the next reload
    pub fn set(&self, settings: Settings) {
        *self.settings.write() = settings;
    }
}

impl SettingsSource for MemorySettings {
    fn load(&self) -> Settings {
        self.settings.read().clone()
    }

    fn store_exclusions(&self, excluded: &BTreeSet<String>) -> Result<(), SettingsError> {
        self.settings.write().excluded_categories = excluded.clone();
        Ok(())
    }
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Reading or writing the settings file failed
    #[error("Settings I/O error: {0}")]
    Io(#[from] io::Error),

    /// The document is not valid YAML
    #[error("Settings YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.should_wrap("AnyPlugin"));
        assert_eq!(settings.thread_pools, PoolSizes::default());
        assert_eq!(settings.advanced.slow_task_threshold_ms, 5000);
        assert_eq!(settings.advanced.log_level, LogLevel::Info);
        assert_eq!(settings.monitor_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_full_document() {
        let yaml = r"
wrapped_owners: [Shops, Quests]
excluded_owners: [Quests]
excluded_categories: [PlayerMoveEvent]
thread_pools:
  high_priority: 4
  normal_priority: 8
  low_priority: 1
advanced:
  log_level: debug
  slow_task_threshold_ms: 250
  queue_capacity: 1024
";
        let settings = Settings::from_yaml_str(yaml).expect("parse");

        assert!(settings.should_wrap("Shops"));
        assert!(!settings.should_wrap("Quests"));
        assert!(!settings.should_wrap("Other"));
        assert!(settings.is_category_excluded("PlayerMoveEvent"));
        assert_eq!(settings.advanced.log_level, LogLevel::Debug);

        let config = settings.dispatcher_config();
        assert_eq!(config.high_workers, 4);
        assert_eq!(config.normal_workers, 8);
        assert_eq!(config.low_workers, 1);
        assert_eq!(config.slow_task_threshold, Duration::from_millis(250));
        assert_eq!(config.queue_capacity, Some(1024));
        assert_eq!(config.shutdown_grace, Duration::from_secs(60));
    }

    #[test]
    fn test_malformed_fields_fall_back_individually() {
        let yaml = r"
wrapped_owners: 12
excluded_categories: [ChatEvent]
thread_pools:
  high_priority: lots
  normal_priority: 0
  low_priority: 6
advanced:
  log_level: VERBOSE
  slow_task_threshold_ms: -3
  queue_capacity: 0
";
        let settings = Settings::from_yaml_str(yaml).expect("parse");

        assert_eq!(settings.wrapped_owners, Settings::default().wrapped_owners);
        assert!(settings.is_category_excluded("ChatEvent"));
        assert_eq!(settings.thread_pools.high_priority, 2);
        assert_eq!(settings.thread_pools.normal_priority, 5);
        assert_eq!(settings.thread_pools.low_priority, 6);
        assert_eq!(settings.advanced.log_level, LogLevel::Info);
        assert_eq!(settings.advanced.slow_task_threshold_ms, 5000);
        assert_eq!(settings.advanced.queue_capacity, None);
    }

    #[test]
    fn test_out_of_range_durations_fall_back() {
        let yaml = r"
advanced:
  monitor_interval_secs: 0
  shutdown_grace_secs: 18446744073709551615
  force_stop_grace_secs: 86401
";
        let settings = Settings::from_yaml_str(yaml).expect("parse");
        let defaults = AdvancedSettings::default();

        assert_eq!(settings.advanced.monitor_interval_secs, defaults.monitor_interval_secs);
        assert_eq!(settings.advanced.shutdown_grace_secs, defaults.shutdown_grace_secs);
        assert_eq!(settings.advanced.force_stop_grace_secs, defaults.force_stop_grace_secs);
        assert_eq!(settings.monitor_interval(), Duration::from_secs(60));

        // Zero grace is legal: drain is skipped straight to the forced stop
        let settings = Settings::from_yaml_str("advanced:\n  shutdown_grace_secs: 0\n").expect("parse");
        assert_eq!(settings.advanced.shutdown_grace_secs, 0);
    }

    #[test]
    fn test_empty_document_is_defaults() {
        let settings = Settings::from_yaml_str("").expect("parse");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_syntax_error_reported() {
        let result = Settings::from_yaml_str("thread_pools: [unclosed");
        assert!(matches!(result, Err(SettingsError::Yaml(_))));
    }

    #[test]
    fn test_yaml_output_parses_back() {
        let settings = Settings::default()
            .with_excluded_categories(BTreeSet::from(["BlockBreakEvent".to_string()]));
        let yaml = settings.to_yaml().expect("render");

        assert!(yaml.contains("log_level: INFO"));
        assert_eq!(Settings::from_yaml_str(&yaml).expect("parse"), settings);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse(" Warning "), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("trace"), None);
        assert_eq!(LogLevel::Warning.filter_directive(), "warn");
    }

    #[test]
    fn test_memory_source_stores_exclusions() {
        let source = MemorySettings::new(Settings::default());
        let excluded = BTreeSet::from(["ChatEvent".to_string()]);

        source.store_exclusions(&excluded).expect("store");
        assert_eq!(source.load().excluded_categories, excluded);
    }

    #[test]
    fn test_file_source_round_trip() {
        let dir = std::env::temp_dir().join(format!("pulse-settings-{}", std::process::id()));
        let path = dir.join("settings.yml");
        let _ = fs::remove_file(&path);
        let source = YamlFileSettings::new(&path);

        // Missing file: defaults
        assert_eq!(source.load(), Settings::default());

        assert!(source.write_default_if_missing().expect("write"));
        assert!(!source.write_default_if_missing().expect("exists"));

        fs::write(&path, "thread_pools:\n  high_priority: 7\n").expect("seed");
        let excluded = BTreeSet::from(["ChatEvent".to_string(), "AsyncTick".to_string()]);
        source.store_exclusions(&excluded).expect("store");

        let loaded = source.load();
        assert_eq!(loaded.thread_pools.high_priority, 7);
        assert_eq!(loaded.excluded_categories, excluded);

        let _ = fs::remove_dir_all(&dir);
    }
}
