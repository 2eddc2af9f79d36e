//! # Adapter Port Module
//!
//! The boundary between the session controller and whatever owns the
//! Bluetooth radio. Requests are fire-and-forget: their completion is
//! reported later as an `AdapterEvent` on the session's subscription.

use crate::error::{PlatformError, SessionError};
use crate::permissions::{Permission, PermissionGate, PermissionStatus};
use crossbeam_channel::{Receiver, TryRecvError};
use std::time::Duration;

/// Identifies one discovery pass
pub type PassId = u64;

/// Snapshot of the adapter as last reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterState {
    pub powered: bool,
    pub discovering: bool,
    pub discoverable: bool,
}

/// Raw device handle carried by a `DeviceFound` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    address: String,
    name: Option<String>,
    pass: PassId,
}

impl DeviceHandle {
    pub fn new(address: impl Into<String>, name: Option<String>, pass: PassId) -> Self {
        Self {
            address: address.into(),
            name,
            pass,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pass(&self) -> PassId {
        self.pass
    }

    /// Reads the advertised name. Requires the broad Bluetooth permission.
    pub fn read_name<G>(&self, gate: &G) -> Result<Option<&str>, SessionError>
    where
        G: PermissionGate + ?Sized,
    {
        match gate.check(Permission::Bluetooth) {
            PermissionStatus::Granted => Ok(self.name.as_deref()),
            _ => Err(SessionError::DeviceNameUnreadable {
                address: self.address.clone(),
            }),
        }
    }
}

/// Which request a `RequestFailed` event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Power,
    Discoverable,
    /// Starting the given discovery pass
    Discovery(PassId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    PowerChanged(bool),
    DiscoverableChanged(bool),
    DiscoveryStarted(PassId),
    DeviceFound(DeviceHandle),
    DiscoveryFinished(PassId),
    RequestFailed { request: Request, error: PlatformError },
}

pub trait BluetoothAdapter {
    fn state(&self) -> AdapterState;

    fn request_power(&self, on: bool) -> Result<(), PlatformError>;

    fn request_discoverable(&self, window: Duration) -> Result<(), PlatformError>;

    /// Starts a new discovery pass and returns its id.
    fn start_discovery(&self) -> Result<PassId, PlatformError>;

    fn cancel_discovery(&self) -> Result<(), PlatformError>;

    /// Registers for adapter events. Dropping the subscription unregisters.
    fn subscribe(&self) -> Result<EventSubscription, PlatformError>;
}

/// A registered event listener.
///
/// Owns the receiving end of the backend's event channel; the release hook
/// runs exactly once when the subscription is dropped.
pub struct EventSubscription {
    receiver: Receiver<AdapterEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    pub fn new(receiver: Receiver<AdapterEvent>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// Next queued event, if any. Never blocks.
    pub fn try_next(&self) -> Option<AdapterEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("queued", &self.receiver.len())
            .finish()
    }
}
