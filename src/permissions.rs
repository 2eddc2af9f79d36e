//! # Permissions Module
//!
//! Runtime permission model for Bluetooth operations.
//!
//! Every controller operation that touches the adapter is gated on one
//! permission. `guard` runs the operation when the permission is granted and
//! otherwise asks the user, returning immediately: the operation is never
//! queued, the user re-triggers it once the permission is granted.
//!
//! ## Desktop Behaviour
//! Desktop hosts have no OS permission broker, so `PromptPermissions` keeps
//! the decisions in memory and exposes one pending request at a time for the
//! UI to render as a prompt.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Power the adapter on and off
    Connect,
    /// Run a discovery pass
    Scan,
    /// Make the local adapter discoverable
    Advertise,
    /// Legacy broad permission, needed to read device names
    Bluetooth,
}

impl Permission {
    pub fn label(&self) -> &'static str {
        match self {
            Permission::Connect => "Bluetooth connect",
            Permission::Scan => "Bluetooth scan",
            Permission::Advertise => "Bluetooth advertise",
            Permission::Bluetooth => "Bluetooth",
        }
    }

    /// Whether the permission only exists on platforms with runtime grants
    pub fn is_runtime(&self) -> bool {
        !matches!(self, Permission::Bluetooth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

/// The user's answer to a permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    /// Deny and stop asking for the rest of the session
    Never,
}

/// Result of a permission-guarded operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    /// Permission was granted and the operation ran
    Executed(T),
    /// Permission is denied and cannot be requested
    Denied(Permission),
    /// A request was handed to the user; the operation did not run
    RequestInFlight(Permission),
}

impl<T> Guarded<T> {
    pub fn is_executed(&self) -> bool {
        matches!(self, Guarded::Executed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        match self {
            Guarded::Executed(value) => Guarded::Executed(f(value)),
            Guarded::Denied(permission) => Guarded::Denied(permission),
            Guarded::RequestInFlight(permission) => Guarded::RequestInFlight(permission),
        }
    }
}

pub trait PermissionGate {
    fn check(&self, permission: Permission) -> PermissionStatus;

    /// Ask the user for `permission`.
    ///
    /// Returns false when the request cannot be issued at all.
    fn request(&mut self, permission: Permission) -> bool;
}

/// Runs `op` if `permission` is granted, otherwise requests it.
pub fn guard<G, T, F>(gate: &mut G, permission: Permission, op: F) -> Guarded<T>
where
    G: PermissionGate + ?Sized,
    F: FnOnce() -> T,
{
    match gate.check(permission) {
        PermissionStatus::Granted => Guarded::Executed(op()),
        _ => {
            if gate.request(permission) {
                log::debug!("Requested {} permission", permission.label());
                Guarded::RequestInFlight(permission)
            } else {
                Guarded::Denied(permission)
            }
        }
    }
}

/// In-memory permission store answered through a UI prompt
#[derive(Debug, Default)]
pub struct PromptPermissions {
    decisions: HashMap<Permission, Decision>,
    pending: VecDeque<Permission>,
    runtime_required: bool,
}

impl PromptPermissions {
    pub fn new(runtime_required: bool, pre_granted: &[Permission]) -> Self {
        let decisions = pre_granted.iter().map(|p| (*p, Decision::Allow)).collect();
        Self {
            decisions,
            pending: VecDeque::new(),
            runtime_required,
        }
    }

    /// The request currently awaiting the user's answer
    pub fn pending(&self) -> Option<Permission> {
        self.pending.front().copied()
    }

    /// Records the user's answer for the front-most pending request.
    pub fn resolve(&mut self, decision: Decision) -> Option<Permission> {
        let permission = self.pending.pop_front()?;
        log::info!("{} permission answered: {:?}", permission.label(), decision);
        self.decisions.insert(permission, decision);
        Some(permission)
    }
}

impl PermissionGate for PromptPermissions {
    fn check(&self, permission: Permission) -> PermissionStatus {
        if permission.is_runtime() && !self.runtime_required {
            return PermissionStatus::Granted;
        }
        match self.decisions.get(&permission) {
            Some(Decision::Allow) => PermissionStatus::Granted,
            Some(Decision::Deny) | Some(Decision::Never) => PermissionStatus::Denied,
            None => PermissionStatus::Undetermined,
        }
    }

    fn request(&mut self, permission: Permission) -> bool {
        if self.decisions.get(&permission) == Some(&Decision::Never) {
            return false;
        }
        if !self.pending.contains(&permission) {
            self.pending.push_back(permission);
        }
        true
    }
}
