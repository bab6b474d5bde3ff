//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
//! Owner identities and priority classification
//!
//! Every unit of work belongs to an owner (the component whose handler is
//! being offloaded) and carries an [`EventPriority`] chosen by that handler.
//! The priority decides which [`TierKind`] executes the work.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

/// Opaque identity of the component a task belongs to.
///
/// Cheap to clone; compared and hashed by name only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId(Arc<str>);

impl OwnerId {
    /// Create an owner identity from a component name
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Component name
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for OwnerId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Handler priority as declared by the owning component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    /// Runs first, least important
    Lowest,
    /// Background-ish handlers
    Low,
    /// Default handler priority
    #[default]
    Normal,
    /// Important handlers
    High,
    /// Most important handlers
    Highest,
    /// Observation-only handlers, delivered last
    Monitor,
}

impl EventPriority {
    /// Tier that executes work of this priority
    ///
    /// - `Lowest`, `Low` → [`TierKind::Low`]
    /// - `Normal` → [`TierKind::Normal`]
    /// - `High`, `Highest` → [`TierKind::High`]
    /// - anything else → [`TierKind::Normal`]
    #[inline]
    #[must_use]
    pub const fn tier(self) -> TierKind {
        match self {
            Self::Lowest | Self::Low => TierKind::Low,
            Self::High | Self::Highest => TierKind::High,
            Self::Normal | Self::Monitor => TierKind::Normal,
        }
    }
}

/// One of the three worker pools owned by a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Latency-sensitive handlers
    High,
    /// Default pool
    Normal,
    /// Background handlers
    Low,
}

impl TierKind {
    /// All tiers, highest first
    pub const ALL: [TierKind; 3] = [TierKind::High, TierKind::Normal, TierKind::Low];

    /// Short lowercase name used in thread names and log fields
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
