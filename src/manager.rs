//! # Adapter Manager Module
//!
//! The Bluetooth backend behind `BluetoothAdapter`. Plays the part of the
//! operating system for the session: it owns the radio, runs discovery
//! passes, and reports everything back as `AdapterEvent`s.
//!
//! ## Key Components
//! - `AdapterManager`: Runs on a dedicated thread with its own Tokio runtime
//! - `AdapterHandle`: Cheap, clonable front end used on the UI thread
//! - `AdapterCommand`: Requests sent from the handle to the manager thread
//!
//! ## Platform Support
//! Scanning goes through btleplug on every platform. btleplug cannot switch
//! the radio on or off or make it discoverable, so those requests go through
//! BlueZ when built with the `bluez` feature on Linux and are reported as
//! unsupported everywhere else.

use crate::adapter::{AdapterEvent, AdapterState, BluetoothAdapter, DeviceHandle, EventSubscription, PassId, Request};
use crate::config::Config;
use crate::error::PlatformError;
use btleplug::api::{BDAddr, Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum AdapterCommand {
    SetPower(bool),
    MakeDiscoverable(Duration),
    StartDiscovery(PassId),
    CancelDiscovery,
    Subscribe { id: u64, sender: Sender<AdapterEvent> },
    Unsubscribe(u64),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Discovery pass currently running on the radio
#[derive(Debug)]
struct ScanPass<K = PeripheralId> {
    active: Option<PassId>,
    /// Peripherals already reported during the active pass
    reported: HashSet<K>,
}

impl<K> Default for ScanPass<K> {
    fn default() -> Self {
        Self {
            active: None,
            reported: HashSet::new(),
        }
    }
}

impl<K: Eq + Hash> ScanPass<K> {
    fn begin(&mut self, pass: PassId) {
        self.active = Some(pass);
        self.reported.clear();
    }

    /// Ends `pass` if it is still the active one.
    fn end(&mut self, pass: PassId) -> bool {
        if self.active != Some(pass) {
            return false;
        }
        self.active = None;
        self.reported.clear();
        true
    }

    /// The active pass, if `id` has not been reported during it yet.
    fn claim(&self, id: &K) -> Option<PassId> {
        match self.active {
            Some(pass) if !self.reported.contains(id) => Some(pass),
            _ => None,
        }
    }

    /// Records `id` as reported. False when `pass` is over or `id` was
    /// reported meanwhile.
    fn mark_reported(&mut self, pass: PassId, id: K) -> bool {
        self.active == Some(pass) && self.reported.insert(id)
    }
}

/// State shared between the command loop and the runtime's tasks
#[derive(Clone, Default)]
struct Shared {
    state: Arc<Mutex<AdapterState>>,
    subscribers: Arc<Mutex<HashMap<u64, Sender<AdapterEvent>>>>,
    scan: Arc<Mutex<ScanPass>>,
}

impl Shared {
    /// Delivers `event` to every subscriber, forgetting the ones that hung up.
    fn broadcast(&self, event: AdapterEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    fn update(&self, f: impl FnOnce(&mut AdapterState)) {
        f(&mut lock(&self.state));
    }

    fn fail(&self, request: Request, error: PlatformError) {
        log::error!("Adapter manager: {}", error);
        self.broadcast(AdapterEvent::RequestFailed { request, error });
    }

    /// Ends `pass` if it is still the active one.
    async fn finish_pass(&self, central: &Adapter, pass: PassId) {
        if !lock(&self.scan).end(pass) {
            return;
        }

        if let Err(e) = central.stop_scan().await {
            log::warn!("Adapter manager: Failed to stop scan: {}", e);
        }
        self.update(|state| state.discovering = false);
        log::info!("Adapter manager: Discovery pass {} finished", pass);
        self.broadcast(AdapterEvent::DiscoveryFinished(pass));
    }
}

/// Front end of the manager thread
#[derive(Clone)]
pub struct AdapterHandle {
    commands: Sender<AdapterCommand>,
    shared: Shared,
    next_pass: Arc<AtomicU64>,
    next_subscriber: Arc<AtomicU64>,
}

impl AdapterHandle {
    fn send(&self, command: AdapterCommand) -> Result<(), PlatformError> {
        self.commands
            .send(command)
            .map_err(|_| PlatformError::Disconnected)
    }
}

impl BluetoothAdapter for AdapterHandle {
    fn state(&self) -> AdapterState {
        *lock(&self.shared.state)
    }

    fn request_power(&self, on: bool) -> Result<(), PlatformError> {
        self.send(AdapterCommand::SetPower(on))
    }

    fn request_discoverable(&self, window: Duration) -> Result<(), PlatformError> {
        self.send(AdapterCommand::MakeDiscoverable(window))
    }

    fn start_discovery(&self) -> Result<PassId, PlatformError> {
        let pass = self.next_pass.fetch_add(1, Ordering::Relaxed);
        self.send(AdapterCommand::StartDiscovery(pass))?;
        Ok(pass)
    }

    fn cancel_discovery(&self) -> Result<(), PlatformError> {
        self.send(AdapterCommand::CancelDiscovery)
    }

    fn subscribe(&self) -> Result<EventSubscription, PlatformError> {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded();
        self.send(AdapterCommand::Subscribe { id, sender })?;

        let commands = self.commands.clone();
        Ok(EventSubscription::new(receiver, move || {
            log::debug!("Releasing event subscription {}", id);
            let _ = commands.send(AdapterCommand::Unsubscribe(id));
        }))
    }
}

/// Owns the btleplug adapter and serves `AdapterCommand`s.
pub struct AdapterManager {
    command_receiver: Receiver<AdapterCommand>,
    shared: Shared,
    discovery_duration: Duration,
}

impl AdapterManager {
    /// Starts the manager thread and waits for it to find an adapter.
    ///
    /// Returns `Ok(None)` when the host has no Bluetooth adapter; the thread
    /// has already exited in that case.
    pub fn spawn(config: &Config) -> Result<Option<AdapterHandle>, PlatformError> {
        let (command_sender, command_receiver) = unbounded();
        let (ready_sender, ready_receiver) = bounded(1);
        let shared = Shared::default();

        let manager = AdapterManager {
            command_receiver,
            shared: shared.clone(),
            discovery_duration: config.discovery_duration(),
        };
        std::thread::Builder::new()
            .name("adapter-manager".to_string())
            .spawn(move || manager.run(ready_sender))
            .map_err(|e| PlatformError::RuntimeCreation(e.to_string()))?;

        let found = ready_receiver
            .recv()
            .map_err(|_| PlatformError::Disconnected)??;
        if !found {
            return Ok(None);
        }

        Ok(Some(AdapterHandle {
            commands: command_sender,
            shared,
            next_pass: Arc::new(AtomicU64::new(1)),
            next_subscriber: Arc::new(AtomicU64::new(1)),
        }))
    }

    /// Runs the command loop until every handle has been dropped.
    fn run(self, ready: Sender<Result<bool, PlatformError>>) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = ready.send(Err(PlatformError::RuntimeCreation(e.to_string())));
                return;
            }
        };

        let central = match rt.block_on(first_adapter()) {
            Ok(Some(central)) => central,
            Ok(None) => {
                log::warn!("Adapter manager: No Bluetooth adapter found");
                let _ = ready.send(Ok(false));
                return;
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let powered = match rt.block_on(central.adapter_state()) {
            Ok(state) => matches!(state, CentralState::PoweredOn),
            Err(e) => {
                log::warn!("Adapter manager: Could not read adapter state: {}", e);
                false
            }
        };
        self.shared.update(|state| state.powered = powered);
        log::info!("Adapter manager: Adapter ready, powered: {}", powered);

        let events = rt.spawn(forward_events(central.clone(), self.shared.clone()));
        let _ = ready.send(Ok(true));

        let mut pass_timer: Option<JoinHandle<()>> = None;

        while let Ok(command) = self.command_receiver.recv() {
            match command {
                AdapterCommand::SetPower(on) => {
                    log::info!("Adapter manager: Power {} requested", if on { "on" } else { "off" });
                    let shared = self.shared.clone();
                    rt.spawn(async move {
                        match radio::set_powered(on).await {
                            Ok(()) => {
                                shared.update(|state| state.powered = on);
                                shared.broadcast(AdapterEvent::PowerChanged(on));
                            }
                            Err(e) => shared.fail(Request::Power, e),
                        }
                    });
                }
                AdapterCommand::MakeDiscoverable(window) => {
                    log::info!("Adapter manager: Discoverable for {}s requested", window.as_secs());
                    let shared = self.shared.clone();
                    rt.spawn(async move {
                        if let Err(e) = radio::make_discoverable(window).await {
                            shared.fail(Request::Discoverable, e);
                            return;
                        }
                        shared.update(|state| state.discoverable = true);
                        shared.broadcast(AdapterEvent::DiscoverableChanged(true));

                        tokio::time::sleep(window).await;
                        shared.update(|state| state.discoverable = false);
                        shared.broadcast(AdapterEvent::DiscoverableChanged(false));
                    });
                }
                AdapterCommand::StartDiscovery(pass) => {
                    if let Some(timer) = pass_timer.take() {
                        timer.abort();
                    }
                    match rt.block_on(central.start_scan(ScanFilter::default())) {
                        Ok(()) => {
                            lock(&self.shared.scan).begin(pass);
                            self.shared.update(|state| state.discovering = true);
                            log::info!("Adapter manager: Discovery pass {} started", pass);
                            self.shared.broadcast(AdapterEvent::DiscoveryStarted(pass));

                            let shared = self.shared.clone();
                            let central = central.clone();
                            let duration = self.discovery_duration;
                            pass_timer = Some(rt.spawn(async move {
                                tokio::time::sleep(duration).await;
                                shared.finish_pass(&central, pass).await;
                            }));
                        }
                        Err(e) => self.shared.fail(
                            Request::Discovery(pass),
                            PlatformError::OperationFailed {
                                operation: "Starting discovery",
                                reason: e.to_string(),
                            },
                        ),
                    }
                }
                AdapterCommand::CancelDiscovery => {
                    if let Some(timer) = pass_timer.take() {
                        timer.abort();
                    }
                    let active = lock(&self.shared.scan).active;
                    if let Some(pass) = active {
                        log::info!("Adapter manager: Cancelling discovery pass {}", pass);
                        rt.block_on(self.shared.finish_pass(&central, pass));
                    }
                }
                AdapterCommand::Subscribe { id, sender } => {
                    log::debug!("Adapter manager: Subscriber {} registered", id);
                    lock(&self.shared.subscribers).insert(id, sender);
                }
                AdapterCommand::Unsubscribe(id) => {
                    log::debug!("Adapter manager: Subscriber {} released", id);
                    lock(&self.shared.subscribers).remove(&id);
                }
            }
        }

        events.abort();
        let active = lock(&self.shared.scan).active;
        if let Some(pass) = active {
            rt.block_on(self.shared.finish_pass(&central, pass));
        }
        log::info!("Adapter manager: Command channel closed, shutting down");
    }
}

async fn first_adapter() -> Result<Option<Adapter>, PlatformError> {
    let manager = Manager::new()
        .await
        .map_err(|e| PlatformError::ManagerInit(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| PlatformError::ManagerInit(e.to_string()))?;

    Ok(adapters.into_iter().next())
}

/// Translates btleplug central events into adapter events.
async fn forward_events(central: Adapter, shared: Shared) {
    let mut events = match central.events().await {
        Ok(events) => events,
        Err(e) => {
            log::error!("Adapter manager: Could not listen for adapter events: {}", e);
            return;
        }
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Some(pass) = lock(&shared.scan).claim(&id) else {
                    continue;
                };
                // Unreadable peripherals stay unclaimed so a later update can report them
                let Some(device) = describe(&central, &id, pass).await else {
                    continue;
                };
                if lock(&shared.scan).mark_reported(pass, id) {
                    shared.broadcast(AdapterEvent::DeviceFound(device));
                }
            }
            CentralEvent::StateUpdate(state) => {
                let powered = matches!(state, CentralState::PoweredOn);
                shared.update(|s| s.powered = powered);
                shared.broadcast(AdapterEvent::PowerChanged(powered));
            }
            _ => {}
        }
    }
}

async fn describe(central: &Adapter, id: &PeripheralId, pass: PassId) -> Option<DeviceHandle> {
    let peripheral = match central.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            log::debug!("Adapter manager: Peripheral {:?} vanished: {}", id, e);
            return None;
        }
    };
    let name = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|props| props.local_name);

    // Some platforms hide the hardware address
    let address = match peripheral.address() {
        addr if addr == BDAddr::default() => format!("{:?}", peripheral.id()),
        addr => addr.to_string(),
    };

    Some(DeviceHandle::new(address, name, pass))
}

#[cfg(all(feature = "bluez", target_os = "linux"))]
mod radio {
    use crate::error::PlatformError;
    use std::time::Duration;

    fn failed(operation: &'static str) -> impl Fn(bluer::Error) -> PlatformError {
        move |e| PlatformError::OperationFailed {
            operation,
            reason: e.to_string(),
        }
    }

    async fn default_adapter(operation: &'static str) -> Result<bluer::Adapter, PlatformError> {
        let session = bluer::Session::new().await.map_err(failed(operation))?;
        session.default_adapter().await.map_err(failed(operation))
    }

    pub async fn set_powered(on: bool) -> Result<(), PlatformError> {
        const OPERATION: &str = "Powering the adapter";
        let adapter = default_adapter(OPERATION).await?;
        if adapter.is_powered().await.map_err(failed(OPERATION))? != on {
            adapter.set_powered(on).await.map_err(failed(OPERATION))?;
        }
        Ok(())
    }

    pub async fn make_discoverable(window: Duration) -> Result<(), PlatformError> {
        const OPERATION: &str = "Making the adapter discoverable";
        let adapter = default_adapter(OPERATION).await?;
        let timeout = u32::try_from(window.as_secs()).unwrap_or(u32::MAX);
        adapter
            .set_discoverable_timeout(timeout)
            .await
            .map_err(failed(OPERATION))?;
        adapter.set_discoverable(true).await.map_err(failed(OPERATION))
    }
}

/// Stand-in for hosts without BlueZ support compiled in. btleplug cannot
/// switch power or discoverability, so both requests fail as unsupported.
/// Linux builds get the real implementation with `--features bluez`.
#[cfg(not(all(feature = "bluez", target_os = "linux")))]
mod radio {
    use crate::error::PlatformError;
    use std::time::Duration;

    pub async fn set_powered(_on: bool) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("Powering the adapter"))
    }

    pub async fn make_discoverable(_window: Duration) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("Making the adapter discoverable"))
    }
}
