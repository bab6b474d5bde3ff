//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
//! Administrative operations
//!
//! Typed operations for an operator surface. Parsing command text is the
//! embedder's job; this module checks permissions, runs the operation on the
//! [`Controller`] and turns the result into an [`AdminReply`]. Nothing here
//! panics on bad input.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use crate::controller::Controller;

#[cfg(feature = "tracing")]
use tracing::{info, warn};

/// Permission node for [`AdminOp::Reload`]
pub const PERMISSION_RELOAD: &str = "pulse.reload";
/// Permission node for [`AdminOp::Exclude`]
pub const PERMISSION_EXCLUDE: &str = "pulse.exclude";
/// Permission node for [`AdminOp::Include`]
pub const PERMISSION_INCLUDE: &str = "pulse.include";
/// Permission node for [`AdminOp::ListExclusions`]
pub const PERMISSION_LIST: &str = "pulse.list";

/// Operator request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOp {
    /// Reload settings and rebuild the dispatcher
    Reload,
    /// Exclude an event category from offloading
    Exclude(String),
    /// Offload an excluded category again
    Include(String),
    /// Show excluded categories
    ListExclusions,
}

impl AdminOp {
    /// Permission node required to run this operation
    #[must_use]
    pub const fn permission(&self) -> &'static str {
        match self {
            Self::Reload => PERMISSION_RELOAD,
            Self::Exclude(_) => PERMISSION_EXCLUDE,
            Self::Include(_) => PERMISSION_INCLUDE,
            Self::ListExclusions => PERMISSION_LIST,
        }
    }

    /// Operation name as shown to operators
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Reload => "reload",
            Self::Exclude(_) => "exclude",
            Self::Include(_) => "include",
            Self::ListExclusions => "list",
        }
    }
}

/// Whoever issued an operation
pub trait Caller {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether the caller holds `node`
    fn has_permission(&self, node: &str) -> bool;
}

/// Server console; holds every permission
#[derive(Debug, Default, Clone, Copy)]
pub struct Console;

impl Caller for Console {
    fn name(&self) -> &str {
        "console"
    }

    fn has_permission(&self, _node: &str) -> bool {
        true
    }
}

/// Caller with an explicit set of permission nodes.
///
/// `pulse.*` grants every node.
#[derive(Debug, Clone)]
pub struct PermissionSet {
    name: String,
    granted: BTreeSet<String>,
}

impl PermissionSet {
    /// Caller named `name` with no permissions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            granted: BTreeSet::new(),
        }
    }

    /// Grants `node`
    #[must_use]
    pub fn grant(mut self, node: impl Into<String>) -> Self {
        self.granted.insert(node.into());
        self
    }
}

impl Caller for PermissionSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_permission(&self, node: &str) -> bool {
        self.granted.contains(node) || self.granted.contains("pulse.*")
    }
}

/// Human-readable result of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminReply {
    /// Whether the operation succeeded
    pub success: bool,
    /// Message for the caller
    pub message: String,
}

impl AdminReply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for AdminReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Runs `op` on behalf of `caller`
pub fn execute(controller: &Controller, caller: &dyn Caller, op: AdminOp) -> AdminReply {
    if !caller.has_permission(op.permission()) {
        #[cfg(feature = "tracing")]
        warn!(
            caller = caller.name(),
            operation = op.name(),
            permission = op.permission(),
            "Admin operation denied"
        );

        return AdminReply::failed("You do not have permission to run this command.");
    }

    #[cfg(feature = "tracing")]
    info!(caller = caller.name(), operation = op.name(), "Admin operation");

    match op {
        AdminOp::Reload => match controller.reload() {
            Ok(report) => AdminReply::ok(format!(
                "Settings reloaded: {} handlers offloaded for {} components.",
                report.handlers_registered, report.owners_wrapped
            )),
            Err(err) => AdminReply::failed(format!("Reload failed: {err}")),
        },
        AdminOp::Exclude(category) => {
            let Some(category) = category_arg(&category) else {
                return AdminReply::failed("Usage: exclude <category>");
            };
            match controller.add_exclusion(category) {
                Ok(true) => AdminReply::ok(format!("{category} added to the exclusion list.")),
                Ok(false) => AdminReply::ok(format!("{category} is already excluded.")),
                Err(err) => AdminReply::failed(format!("Could not exclude {category}: {err}")),
            }
        }
        AdminOp::Include(category) => {
            let Some(category) = category_arg(&category) else {
                return AdminReply::failed("Usage: include <category>");
            };
            match controller.remove_exclusion(category) {
                Ok(true) => AdminReply::ok(format!("{category} removed from the exclusion list.")),
                Ok(false) => AdminReply::ok(format!("{category} is not excluded.")),
                Err(err) => AdminReply::failed(format!("Could not include {category}: {err}")),
            }
        }
        AdminOp::ListExclusions => {
            let excluded = controller.list_exclusions();
            if excluded.is_empty() {
                AdminReply::ok("No categories are excluded.")
            } else {
                AdminReply::ok(format!("Excluded categories: {}", excluded.join(", ")))
            }
        }
    }
}

fn category_arg(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
