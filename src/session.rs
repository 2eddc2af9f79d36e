//! # Discovery Session Module
//!
//! The controller behind the single bluelist screen. It owns the discovered
//! device list, forwards user actions to the adapter behind permission
//! checks, and folds adapter events back into the list.
//!
//! ## Model
//! - Everything runs on the UI thread; events are pulled with `pump_events`.
//! - Power requests are tracked as a `PendingTransition` until the adapter
//!   reports the new power state. Decisions taken while a transition is
//!   pending use the requested state, not the last reported one.
//! - Each discovery pass has an id. Device events from a pass that was
//!   cancelled or superseded are ignored.
//! - The event subscription is released when the session is dropped.

use crate::adapter::{AdapterEvent, AdapterState, BluetoothAdapter, DeviceHandle, EventSubscription, PassId, Request};
use crate::error::{PlatformError, SessionError};
use crate::permissions::{guard, Guarded, Permission, PermissionGate};
use std::fmt;
use std::time::Duration;

const UNKNOWN_DEVICE_NAME: &str = "Unknown device";

/// A discovered device as shown in the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub name: String,
    pub address: String,
}

impl DeviceRecord {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.name, self.address)
    }
}

/// Devices found since the last clear, in arrival order.
///
/// The same address may appear more than once.
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    records: Vec<DeviceRecord>,
    revision: u64,
}

impl DeviceList {
    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bumped on every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn push(&mut self, record: DeviceRecord) {
        self.records.push(record);
        self.revision += 1;
    }

    fn clear(&mut self) {
        self.records.clear();
        self.revision += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLength {
    Short,
    Long,
}

/// Transient message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub length: NoticeLength,
}

impl Notice {
    pub fn short(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            length: NoticeLength::Short,
        }
    }

    pub fn long(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            length: NoticeLength::Long,
        }
    }
}

/// What the session needs from the screen
pub trait Presenter {
    /// The device list changed
    fn refresh(&mut self, devices: &DeviceList);

    fn notify(&mut self, notice: Notice);
}

impl<T: Presenter + ?Sized> Presenter for &mut T {
    fn refresh(&mut self, devices: &DeviceList) {
        (**self).refresh(devices)
    }

    fn notify(&mut self, notice: Notice) {
        (**self).notify(notice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingTransition {
    Enabling,
    Disabling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterPhase {
    Disabled,
    Enabling,
    Enabled,
    Discovering,
    Disabling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request was handed to the adapter
    Requested,
    /// The adapter already is, or is becoming, what was asked
    AlreadyInState,
}

pub struct Session<A, G, P> {
    adapter: A,
    permissions: G,
    presenter: P,
    devices: DeviceList,
    pending: Option<PendingTransition>,
    current_pass: Option<PassId>,
    discoverable_window: Duration,
    subscription: EventSubscription,
}

impl<A, G, P> Session<A, G, P>
where
    A: BluetoothAdapter,
    G: PermissionGate,
    P: Presenter,
{
    /// Starts a session on `adapter`.
    ///
    /// Without an adapter the session ends here: a notice is posted and no
    /// event subscription is made.
    pub fn initialize(
        adapter: Option<A>,
        permissions: G,
        mut presenter: P,
        discoverable_window: Duration,
    ) -> Result<Self, SessionError> {
        let adapter = match adapter {
            Some(adapter) => adapter,
            None => {
                let error = SessionError::AdapterUnavailable;
                log::error!("{}", error);
                presenter.notify(Notice::long(error.to_string()));
                return Err(error);
            }
        };

        let subscription = adapter.subscribe()?;
        log::info!("Session started, adapter state: {:?}", adapter.state());

        let mut session = Session {
            adapter,
            permissions,
            presenter,
            devices: DeviceList::default(),
            pending: None,
            current_pass: None,
            discoverable_window,
            subscription,
        };
        session.ensure_permissions();
        Ok(session)
    }

    /// Asks up front for the permission every power action needs.
    fn ensure_permissions(&mut self) -> Guarded<()> {
        guard(&mut self.permissions, Permission::Connect, || ())
    }

    pub fn enable(&mut self) -> Result<Guarded<Outcome>, SessionError> {
        if self.power_target() {
            return Ok(Guarded::Executed(Outcome::AlreadyInState));
        }

        let adapter = &self.adapter;
        let guarded = guard(&mut self.permissions, Permission::Connect, || adapter.request_power(true));
        let guarded = self.settle(guarded)?;
        if guarded.is_executed() {
            log::info!("Bluetooth enable requested");
            self.pending = Some(PendingTransition::Enabling);
        }
        Ok(guarded.map(|()| Outcome::Requested))
    }

    pub fn disable(&mut self) -> Result<Guarded<Outcome>, SessionError> {
        if !self.power_target() {
            return Ok(Guarded::Executed(Outcome::AlreadyInState));
        }

        let adapter = &self.adapter;
        let guarded = guard(&mut self.permissions, Permission::Connect, || adapter.request_power(false));
        let guarded = self.settle(guarded)?;
        if guarded.is_executed() {
            log::info!("Bluetooth disable requested");
            self.pending = Some(PendingTransition::Disabling);
            self.current_pass = None;
            self.clear_devices();
        }
        Ok(guarded.map(|()| Outcome::Requested))
    }

    /// Asks the adapter for a discoverable window. The result is not tracked.
    pub fn request_discoverable(&mut self) -> Result<Guarded<Outcome>, SessionError> {
        let adapter = &self.adapter;
        let window = self.discoverable_window;
        let guarded = guard(&mut self.permissions, Permission::Advertise, || {
            adapter.request_discoverable(window)
        });
        let guarded = self.settle(guarded)?;
        if guarded.is_executed() {
            log::info!("Discoverable window of {}s requested", window.as_secs());
        }
        Ok(guarded.map(|()| Outcome::Requested))
    }

    /// Cancels any running pass, clears the list and starts a new pass.
    pub fn start_discovery(&mut self) -> Result<Guarded<PassId>, SessionError> {
        let adapter = &self.adapter;
        let devices = &mut self.devices;
        let presenter = &mut self.presenter;
        let current_pass = &mut self.current_pass;
        let running = current_pass.is_some() || adapter.state().discovering;

        let guarded = guard(&mut self.permissions, Permission::Scan, || -> Result<PassId, PlatformError> {
            if running {
                adapter.cancel_discovery()?;
                *current_pass = None;
            }
            devices.clear();
            presenter.refresh(devices);
            adapter.start_discovery()
        });
        let guarded = self.settle(guarded)?;
        if let Guarded::Executed(pass) = guarded {
            log::info!("Discovery pass {} started", pass);
            self.current_pass = Some(pass);
        }
        Ok(guarded)
    }

    /// Handles every event queued on the subscription. Returns how many ran.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.subscription.try_next() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::DeviceFound(device) => self.on_device_found(device),
            AdapterEvent::DiscoveryFinished(pass) => {
                log::info!("Discovery pass {} finished", pass);
                if self.current_pass == Some(pass) {
                    self.current_pass = None;
                }
                self.presenter.notify(Notice::short("Discovery Finished"));
            }
            AdapterEvent::DiscoveryStarted(pass) => {
                log::debug!("Adapter reports discovery pass {} running", pass);
            }
            AdapterEvent::PowerChanged(powered) => self.on_power_changed(powered),
            AdapterEvent::DiscoverableChanged(discoverable) => {
                log::debug!("Adapter discoverable: {}", discoverable);
            }
            AdapterEvent::RequestFailed { request, error } => {
                log::warn!("{:?} request failed: {}", request, error);
                match request {
                    Request::Power => self.pending = None,
                    Request::Discovery(pass) => {
                        if self.current_pass == Some(pass) {
                            self.current_pass = None;
                        }
                    }
                    Request::Discoverable => {}
                }
                self.presenter.notify(Notice::short(error.to_string()));
            }
        }
    }

    fn on_device_found(&mut self, device: DeviceHandle) {
        if self.current_pass != Some(device.pass()) {
            log::debug!(
                "Dropping {} from stale discovery pass {}",
                device.address(),
                device.pass()
            );
            return;
        }

        match device.read_name(&self.permissions) {
            Ok(name) => {
                let record = DeviceRecord::new(name.unwrap_or(UNKNOWN_DEVICE_NAME), device.address());
                log::debug!("Found device {} ({})", record.name, record.address);
                self.devices.push(record);
                self.presenter.refresh(&self.devices);
            }
            Err(e) => {
                log::warn!("{}", e);
                let notice = SessionError::PermissionDenied(Permission::Bluetooth);
                self.presenter.notify(Notice::short(notice.to_string()));
            }
        }
    }

    fn on_power_changed(&mut self, powered: bool) {
        log::info!("Adapter powered: {}", powered);
        if !powered {
            self.current_pass = None;
        }

        let completed = match (self.pending, powered) {
            (Some(PendingTransition::Enabling), true) => Some("Bluetooth is Enabled"),
            (Some(PendingTransition::Disabling), false) => Some("Bluetooth is Disabled"),
            _ => None,
        };
        if let Some(text) = completed {
            self.pending = None;
            self.presenter.notify(Notice::short(text));
        }
    }

    /// Notifies the user about a denied or failed guarded operation.
    fn settle<T>(&mut self, guarded: Guarded<Result<T, PlatformError>>) -> Result<Guarded<T>, SessionError> {
        match guarded {
            Guarded::Executed(Ok(value)) => Ok(Guarded::Executed(value)),
            Guarded::Executed(Err(e)) => {
                log::error!("{}", e);
                self.presenter.notify(Notice::short(e.to_string()));
                Err(e.into())
            }
            Guarded::Denied(permission) => {
                let error = SessionError::PermissionDenied(permission);
                log::warn!("{}", error);
                self.presenter.notify(Notice::short(error.to_string()));
                Ok(Guarded::Denied(permission))
            }
            Guarded::RequestInFlight(permission) => Ok(Guarded::RequestInFlight(permission)),
        }
    }

    fn clear_devices(&mut self) {
        self.devices.clear();
        self.presenter.refresh(&self.devices);
    }

    /// The power state the adapter is at, or is heading to.
    fn power_target(&self) -> bool {
        match self.pending {
            Some(PendingTransition::Enabling) => true,
            Some(PendingTransition::Disabling) => false,
            None => self.adapter.state().powered,
        }
    }

    pub fn phase(&self) -> AdapterPhase {
        match self.pending {
            Some(PendingTransition::Enabling) => AdapterPhase::Enabling,
            Some(PendingTransition::Disabling) => AdapterPhase::Disabling,
            None => {
                let state = self.adapter.state();
                if !state.powered {
                    AdapterPhase::Disabled
                } else if state.discovering || self.current_pass.is_some() {
                    AdapterPhase::Discovering
                } else {
                    AdapterPhase::Enabled
                }
            }
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<PendingTransition> {
        self.pending
    }

    #[cfg(test)]
    pub fn current_pass(&self) -> Option<PassId> {
        self.current_pass
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter.state()
    }

    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    #[cfg(test)]
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn permissions(&self) -> &G {
        &self.permissions
    }

    pub fn permissions_mut(&mut self) -> &mut G {
        &mut self.permissions
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Decision, PromptPermissions};
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::cell::{Cell, RefCell};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(120);

    struct FakeAdapter {
        state: Cell<AdapterState>,
        next_pass: Cell<PassId>,
        active_passes: Cell<usize>,
        requests: RefCell<Vec<String>>,
        fail_power: Cell<bool>,
        fail_start: Cell<bool>,
        sender: Sender<AdapterEvent>,
        receiver: Receiver<AdapterEvent>,
        released: Arc<AtomicBool>,
    }

    impl FakeAdapter {
        fn new(powered: bool) -> Self {
            let (sender, receiver) = unbounded();
            Self {
                state: Cell::new(AdapterState {
                    powered,
                    ..Default::default()
                }),
                next_pass: Cell::new(1),
                active_passes: Cell::new(0),
                requests: RefCell::new(Vec::new()),
                fail_power: Cell::new(false),
                fail_start: Cell::new(false),
                sender,
                receiver,
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        fn set_powered(&self, powered: bool) {
            let mut state = self.state.get();
            state.powered = powered;
            self.state.set(state);
        }

        fn emit(&self, event: AdapterEvent) {
            self.sender.send(event).unwrap();
        }

        fn requests(&self) -> Vec<String> {
            self.requests.borrow().clone()
        }
    }

    impl BluetoothAdapter for FakeAdapter {
        fn state(&self) -> AdapterState {
            self.state.get()
        }

        fn request_power(&self, on: bool) -> Result<(), PlatformError> {
            if self.fail_power.get() {
                return Err(PlatformError::Unsupported("Powering the adapter"));
            }
            self.requests.borrow_mut().push(format!("power:{}", on));
            Ok(())
        }

        fn request_discoverable(&self, window: Duration) -> Result<(), PlatformError> {
            self.requests
                .borrow_mut()
                .push(format!("discoverable:{}", window.as_secs()));
            Ok(())
        }

        fn start_discovery(&self) -> Result<PassId, PlatformError> {
            if self.fail_start.get() {
                return Err(PlatformError::OperationFailed {
                    operation: "Starting discovery",
                    reason: "adapter busy".to_string(),
                });
            }
            let pass = self.next_pass.get();
            self.next_pass.set(pass + 1);
            self.active_passes.set(self.active_passes.get() + 1);
            let mut state = self.state.get();
            state.discovering = true;
            self.state.set(state);
            self.requests.borrow_mut().push(format!("start:{}", pass));
            Ok(pass)
        }

        fn cancel_discovery(&self) -> Result<(), PlatformError> {
            self.active_passes.set(self.active_passes.get().saturating_sub(1));
            let mut state = self.state.get();
            state.discovering = false;
            self.state.set(state);
            self.requests.borrow_mut().push("cancel".to_string());
            Ok(())
        }

        fn subscribe(&self) -> Result<EventSubscription, PlatformError> {
            let released = self.released.clone();
            Ok(EventSubscription::new(self.receiver.clone(), move || {
                released.store(true, Ordering::SeqCst);
            }))
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        refreshes: usize,
        shown: Vec<DeviceRecord>,
        notices: Vec<Notice>,
    }

    impl Presenter for RecordingPresenter {
        fn refresh(&mut self, devices: &DeviceList) {
            self.refreshes += 1;
            self.shown = devices.records().to_vec();
        }

        fn notify(&mut self, notice: Notice) {
            self.notices.push(notice);
        }
    }

    type TestSession = Session<FakeAdapter, PromptPermissions, RecordingPresenter>;

    fn all_granted() -> PromptPermissions {
        PromptPermissions::new(
            true,
            &[
                Permission::Connect,
                Permission::Scan,
                Permission::Advertise,
                Permission::Bluetooth,
            ],
        )
    }

    fn session_with(adapter: FakeAdapter, permissions: PromptPermissions) -> TestSession {
        Session::initialize(Some(adapter), permissions, RecordingPresenter::default(), WINDOW)
            .expect("session should start")
    }

    fn found(address: &str, name: &str, pass: PassId) -> AdapterEvent {
        AdapterEvent::DeviceFound(DeviceHandle::new(address, Some(name.to_string()), pass))
    }

    #[test]
    fn test_missing_adapter_terminates_without_subscribing() {
        let mut presenter = RecordingPresenter::default();
        let result = Session::<FakeAdapter, _, _>::initialize(None, all_granted(), &mut presenter, WINDOW);
        assert!(matches!(result, Err(SessionError::AdapterUnavailable)));
        drop(result);
        assert_eq!(
            presenter.notices,
            vec![Notice::long("Bluetooth is not supported on this device")]
        );
    }

    #[test]
    fn test_initialize_requests_connect_permission() {
        let session = session_with(FakeAdapter::new(false), PromptPermissions::new(true, &[]));
        assert_eq!(session.permissions().pending(), Some(Permission::Connect));
    }

    #[test]
    fn test_dropping_session_releases_subscription() {
        let adapter = FakeAdapter::new(true);
        let released = adapter.released.clone();
        let session = session_with(adapter, all_granted());
        assert!(!released.load(Ordering::SeqCst));
        drop(session);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_two_devices_in_arrival_order() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let pass = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };

        session.adapter().emit(found("AA:BB:CC:DD:EE:01", "Phone-A", pass));
        session.adapter().emit(found("AA:BB:CC:DD:EE:02", "Phone-B", pass));
        assert_eq!(session.pump_events(), 2);

        let expected = vec![
            DeviceRecord::new("Phone-A", "AA:BB:CC:DD:EE:01"),
            DeviceRecord::new("Phone-B", "AA:BB:CC:DD:EE:02"),
        ];
        assert_eq!(session.devices().records(), expected.as_slice());
        assert_eq!(session.presenter().shown, expected);

        session.adapter().emit(AdapterEvent::DiscoveryFinished(pass));
        session.pump_events();
        assert_eq!(session.devices().records(), expected.as_slice());
        assert_eq!(
            session.presenter().notices.last(),
            Some(&Notice::short("Discovery Finished"))
        );
        assert_eq!(session.current_pass(), None);
    }

    #[test]
    fn test_device_found_without_permission_is_dropped() {
        let permissions = PromptPermissions::new(true, &[Permission::Connect, Permission::Scan]);
        let mut session = session_with(FakeAdapter::new(true), permissions);
        let pass = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        let revision = session.devices().revision();
        let notices_before = session.presenter().notices.len();

        session.handle_event(found("AA:BB:CC:DD:EE:01", "Phone-A", pass));

        assert!(session.devices().is_empty());
        assert_eq!(session.devices().revision(), revision);
        assert_eq!(session.presenter().notices.len(), notices_before + 1);
        assert_eq!(
            session.presenter().notices.last(),
            Some(&Notice::short("Bluetooth permission not granted"))
        );
    }

    #[test]
    fn test_list_length_matches_found_events() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let pass = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        for i in 0..5 {
            session.handle_event(found(&format!("AA:BB:CC:DD:EE:0{}", i), "Speaker", pass));
        }
        assert_eq!(session.devices().len(), 5);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let pass = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        session.handle_event(found("AA:BB:CC:DD:EE:01", "Phone-A", pass));
        session.handle_event(found("AA:BB:CC:DD:EE:01", "Phone-A", pass));
        assert_eq!(session.devices().len(), 2);
    }

    #[test]
    fn test_unnamed_device_gets_placeholder() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let pass = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        session.handle_event(AdapterEvent::DeviceFound(DeviceHandle::new("AA:BB:CC:DD:EE:09", None, pass)));
        assert_eq!(session.devices().records()[0].name, "Unknown device");
    }

    #[test]
    fn test_restart_leaves_one_active_pass() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let first = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        session.handle_event(found("AA:BB:CC:DD:EE:01", "Phone-A", first));

        let second = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not restart: {:?}", other),
        };

        assert_ne!(first, second);
        assert_eq!(session.adapter().active_passes.get(), 1);
        assert_eq!(session.current_pass(), Some(second));
        assert!(session.devices().is_empty());
        assert_eq!(
            session.adapter().requests(),
            vec!["start:1".to_string(), "cancel".to_string(), "start:2".to_string()]
        );
    }

    #[test]
    fn test_stale_pass_events_are_ignored() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let first = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        session.start_discovery().unwrap();

        session.handle_event(found("AA:BB:CC:DD:EE:01", "Phone-A", first));
        assert!(session.devices().is_empty());

        // Finishing the cancelled pass must not end the new one
        session.handle_event(AdapterEvent::DiscoveryFinished(first));
        assert!(session.current_pass().is_some());
    }

    #[test]
    fn test_disable_always_clears_list() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let pass = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        session.handle_event(found("AA:BB:CC:DD:EE:01", "Phone-A", pass));
        session.handle_event(found("AA:BB:CC:DD:EE:02", "Phone-B", pass));
        let refreshes = session.presenter().refreshes;

        let outcome = session.disable().unwrap();

        assert_eq!(outcome, Guarded::Executed(Outcome::Requested));
        assert!(session.devices().is_empty());
        assert!(session.presenter().shown.is_empty());
        assert_eq!(session.presenter().refreshes, refreshes + 1);
        assert_eq!(session.phase(), AdapterPhase::Disabling);
    }

    #[test]
    fn test_enable_waits_for_power_event() {
        let mut session = session_with(FakeAdapter::new(false), all_granted());
        assert_eq!(session.phase(), AdapterPhase::Disabled);

        assert_eq!(session.enable().unwrap(), Guarded::Executed(Outcome::Requested));
        assert_eq!(session.phase(), AdapterPhase::Enabling);

        // A second tap while the request is pending does nothing
        assert_eq!(session.enable().unwrap(), Guarded::Executed(Outcome::AlreadyInState));
        assert_eq!(session.adapter().requests(), vec!["power:true".to_string()]);

        session.adapter().set_powered(true);
        session.adapter().emit(AdapterEvent::PowerChanged(true));
        session.pump_events();

        assert_eq!(session.pending(), None);
        assert_eq!(session.phase(), AdapterPhase::Enabled);
        assert_eq!(
            session.presenter().notices.last(),
            Some(&Notice::short("Bluetooth is Enabled"))
        );
    }

    #[test]
    fn test_enable_when_already_enabled_is_noop() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        assert_eq!(session.enable().unwrap(), Guarded::Executed(Outcome::AlreadyInState));
        assert!(session.adapter().requests().is_empty());
    }

    #[test]
    fn test_disable_completion_notifies() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        session.disable().unwrap();
        session.adapter().set_powered(false);
        session.handle_event(AdapterEvent::PowerChanged(false));
        assert_eq!(session.phase(), AdapterPhase::Disabled);
        assert_eq!(
            session.presenter().notices.last(),
            Some(&Notice::short("Bluetooth is Disabled"))
        );
    }

    #[test]
    fn test_power_request_failure_clears_pending() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        session.disable().unwrap();
        session.handle_event(AdapterEvent::RequestFailed {
            request: Request::Power,
            error: PlatformError::OperationFailed {
                operation: "Powering the adapter",
                reason: "busy".to_string(),
            },
        });
        assert_eq!(session.pending(), None);
        assert_eq!(session.phase(), AdapterPhase::Enabled);
    }

    #[test]
    fn test_rejected_power_request_surfaces_error() {
        let adapter = FakeAdapter::new(false);
        adapter.fail_power.set(true);
        let mut session = session_with(adapter, all_granted());

        let result = session.enable();

        assert!(matches!(result, Err(SessionError::Platform(PlatformError::Unsupported(_)))));
        assert_eq!(session.pending(), None);
        assert_eq!(session.presenter().notices.len(), 1);
    }

    #[test]
    fn test_missing_scan_permission_aborts_discovery() {
        let permissions = PromptPermissions::new(true, &[Permission::Connect, Permission::Bluetooth]);
        let mut session = session_with(FakeAdapter::new(true), permissions);

        let result = session.start_discovery().unwrap();

        assert_eq!(result, Guarded::RequestInFlight(Permission::Scan));
        assert!(session.adapter().requests().is_empty());
        assert_eq!(session.permissions().pending(), Some(Permission::Scan));

        // Granting does not start discovery on its own
        session.permissions_mut().resolve(Decision::Allow);
        assert!(session.adapter().requests().is_empty());
        assert!(session.start_discovery().unwrap().is_executed());
    }

    #[test]
    fn test_never_ask_again_reports_denied() {
        let permissions = PromptPermissions::new(true, &[Permission::Connect]);
        let mut session = session_with(FakeAdapter::new(true), permissions);
        session.request_discoverable().unwrap();
        session.permissions_mut().resolve(Decision::Never);

        let result = session.request_discoverable().unwrap();

        assert_eq!(result, Guarded::Denied(Permission::Advertise));
        assert_eq!(
            session.presenter().notices.last(),
            Some(&Notice::short("Bluetooth advertise permission not granted"))
        );
    }

    #[test]
    fn test_discoverable_uses_configured_window() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        assert_eq!(
            session.request_discoverable().unwrap(),
            Guarded::Executed(Outcome::Requested)
        );
        assert_eq!(session.adapter().requests(), vec!["discoverable:120".to_string()]);
    }

    #[test]
    fn test_late_failure_of_replaced_pass_keeps_current_pass() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let first = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        let second = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not restart: {:?}", other),
        };

        session.handle_event(AdapterEvent::RequestFailed {
            request: Request::Discovery(first),
            error: PlatformError::OperationFailed {
                operation: "Starting discovery",
                reason: "timed out".to_string(),
            },
        });
        assert_eq!(session.current_pass(), Some(second));

        session.handle_event(found("AA:BB:CC:DD:EE:02", "Phone-B", second));
        assert_eq!(session.devices().len(), 1);
    }

    #[test]
    fn test_failure_of_current_pass_ends_it() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let pass = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        session.handle_event(AdapterEvent::RequestFailed {
            request: Request::Discovery(pass),
            error: PlatformError::Unsupported("Starting discovery"),
        });
        assert_eq!(session.current_pass(), None);
    }

    #[test]
    fn test_failed_restart_forgets_cancelled_pass() {
        let mut session = session_with(FakeAdapter::new(true), all_granted());
        let pass = match session.start_discovery().unwrap() {
            Guarded::Executed(pass) => pass,
            other => panic!("discovery did not start: {:?}", other),
        };
        session.handle_event(found("AA:BB:CC:DD:EE:01", "Phone-A", pass));
        session.adapter().fail_start.set(true);

        assert!(session.start_discovery().is_err());

        assert_eq!(session.current_pass(), None);
        assert!(session.devices().is_empty());
        assert_eq!(session.phase(), AdapterPhase::Enabled);
    }
}
