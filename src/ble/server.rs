//! GATT server engine.
//!
//! Opens the peripheral, advertises, installs the three services one at a
//! time and pushes measurement notifications to subscribed centrals on a
//! fixed period.
//!
//! State machine:
//! `Stopped -> (WaitingForRadio) -> Starting -> Running -> Stopped`.
//! Losing the radio while starting or running tears the transport down and
//! waits for it to come back.

use crate::ble::codec::ServiceCodec;
use crate::ble::services::{
    ServiceType, CLIENT_CONFIG_UUID, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
    SERVICE_TABLE,
};
use crate::ble::transport::{
    Advertisement, CentralId, GattError, GattEvent, GattEventListener, GattServiceDefinition,
    GattStatus, GattTransport, RadioState,
};
use crate::bridge::selection::SelectionMap;
use crate::sensors::types::SensorDevice;
use crate::sync::{lock, read, write};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// Default notification period
pub const DEFAULT_NOTIFY_INTERVAL: Duration = Duration::from_millis(1000);

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Advertised local name
    pub device_name: String,
    /// Period of the notification loop
    pub notify_interval: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            device_name: "ANT+ Bridge".to_string(),
            notify_interval: DEFAULT_NOTIFY_INTERVAL,
        }
    }
}

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    /// Radio is off; start resumes when it comes on
    WaitingForRadio,
    /// Advertising, services still being installed
    Starting,
    Running,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "Stopped"),
            ServerState::WaitingForRadio => write!(f, "Waiting for radio"),
            ServerState::Starting => write!(f, "Starting"),
            ServerState::Running => write!(f, "Running"),
        }
    }
}

/// BLE service lifecycle, subscriber registry and notification loop.
///
/// Cheap to clone; clones share the same server.
#[derive(Clone)]
pub struct GattServerEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    transport: Arc<dyn GattTransport>,
    settings: ServerSettings,
    runtime: Handle,
    state: Mutex<ServerState>,
    /// Services still to be created, front first
    pending: Mutex<VecDeque<ServiceType>>,
    installed: Mutex<BTreeSet<ServiceType>>,
    codecs: BTreeMap<ServiceType, ServiceCodec>,
    /// Latest snapshot of every device, per service, for encoding
    data: RwLock<HashMap<ServiceType, Vec<SensorDevice>>>,
    selection: RwLock<SelectionMap>,
    subscribers: Mutex<HashMap<CentralId, BTreeSet<ServiceType>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl GattServerEngine {
    /// Create a stopped engine. The notification loop runs on `runtime`.
    pub fn new(transport: Arc<dyn GattTransport>, settings: ServerSettings, runtime: Handle) -> Self {
        let codecs = ServiceType::ALL
            .iter()
            .map(|service| (*service, ServiceCodec::new(*service)))
            .collect();
        Self {
            inner: Arc::new(EngineInner {
                transport,
                settings,
                runtime,
                state: Mutex::new(ServerState::Stopped),
                pending: Mutex::new(VecDeque::new()),
                installed: Mutex::new(BTreeSet::new()),
                codecs,
                data: RwLock::new(HashMap::new()),
                selection: RwLock::new(SelectionMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.inner.state)
    }

    /// Start serving.
    ///
    /// Fails with [`GattError::Unsupported`] when the platform has no
    /// peripheral radio. A radio that is merely off is switched on and the
    /// start completes once it reports `On`.
    pub fn start(&self) -> Result<(), GattError> {
        let inner = &self.inner;
        let radio = inner.transport.radio_state();
        if radio == RadioState::Unsupported {
            tracing::error!("BLE peripheral mode is not supported");
            return Err(GattError::Unsupported);
        }

        {
            let mut state = lock(&inner.state);
            if *state != ServerState::Stopped {
                tracing::debug!("GATT server already {}", *state);
                return Ok(());
            }
            *state = ServerState::WaitingForRadio;
        }

        let listener: Arc<dyn GattEventListener> = Arc::new(EngineListener {
            inner: Arc::downgrade(inner),
        });
        inner.transport.set_listener(Some(listener));

        let result = if radio == RadioState::Off {
            tracing::info!("Bluetooth is disabled, enabling");
            inner.transport.enable_radio()
        } else {
            inner.bring_up()
        };

        if let Err(e) = &result {
            tracing::error!("Failed to start GATT server: {}", e);
            inner.transport.set_listener(None);
            // No notification pass has run yet
            drop(inner.teardown(ServerState::Stopped));
        }
        result
    }

    /// Stop serving and wait for the notification loop to finish.
    ///
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.transport.set_listener(None);

        // Abort only lands at the loop's next await, so a pass already in
        // progress runs to completion before the handle resolves.
        if let Some(timer) = inner.teardown(ServerState::Stopped) {
            // Cancellation is the expected outcome
            let _ = timer.await;
        }

        write(&inner.data).clear();
        write(&inner.selection).clear();
    }

    /// Replace or append a device snapshot in `service`'s encode list.
    pub fn update_data(&self, service: ServiceType, device: SensorDevice) {
        let mut data = write(&self.inner.data);
        let devices = data.entry(service).or_default();
        match devices.iter_mut().find(|d| d.device_id == device.device_id) {
            Some(existing) => *existing = device,
            None => devices.push(device),
        }
    }

    /// Replace the selection snapshot the notification loop encodes from.
    pub fn set_selection(&self, selection: SelectionMap) {
        *write(&self.inner.selection) = selection;
    }

    /// Services confirmed by the transport.
    pub fn installed_services(&self) -> Vec<ServiceType> {
        lock(&self.inner.installed).iter().copied().collect()
    }

    /// Services `central` is subscribed to.
    pub fn subscriptions(&self, central: &str) -> Vec<ServiceType> {
        lock(&self.inner.subscribers)
            .get(central)
            .map(|services| services.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Current feature characteristic value of `service`.
    pub fn supported_features(&self, service: ServiceType) -> Option<Vec<u8>> {
        self.inner
            .codecs
            .get(&service)
            .and_then(|codec| codec.supported_features())
    }

    /// Run one notification pass. Returns the number of notifications sent.
    pub fn notify_subscribers(&self) -> usize {
        self.inner.notify_subscribers()
    }
}

impl EngineInner {
    fn bring_up(self: &Arc<Self>) -> Result<(), GattError> {
        *lock(&self.state) = ServerState::Starting;

        self.transport.open_server()?;
        let advertisement = Advertisement::for_services(self.settings.device_name.clone(), &SERVICE_TABLE);
        self.transport.start_advertising(&advertisement)?;
        tracing::info!("Advertising as '{}'", self.settings.device_name);

        {
            let mut pending = lock(&self.pending);
            *pending = ServiceType::ALL.into_iter().collect();
        }
        lock(&self.installed).clear();

        self.spawn_timer();
        self.create_next_service();
        Ok(())
    }

    /// Close the transport side and drop everything tied to it.
    ///
    /// Returns the aborted notification task so the caller can wait for it.
    #[must_use]
    fn teardown(&self, next: ServerState) -> Option<JoinHandle<()>> {
        let previous = std::mem::replace(&mut *lock(&self.state), next);
        if matches!(previous, ServerState::Starting | ServerState::Running) {
            self.transport.stop_advertising();
            self.transport.close_server();
            tracing::info!("GATT server closed");
        }
        lock(&self.pending).clear();
        lock(&self.installed).clear();
        lock(&self.subscribers).clear();

        let timer = lock(&self.timer).take();
        if let Some(timer) = &timer {
            timer.abort();
        }
        timer
    }

    fn spawn_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.settings.notify_interval;
        let task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.notify_subscribers();
            }
        });

        let previous = lock(&self.timer).replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Issue the next service add. The transport confirms each one with
    /// `ServiceAdded` before the next is sent.
    fn create_next_service(&self) {
        loop {
            let next = lock(&self.pending).pop_front();
            let Some(service) = next else {
                let mut state = lock(&self.state);
                if *state == ServerState::Starting {
                    *state = ServerState::Running;
                    tracing::info!("GATT server running");
                }
                return;
            };

            let definition = GattServiceDefinition::from_descriptor(service.descriptor());
            match self.transport.add_service(&definition) {
                Ok(()) => {
                    tracing::debug!("Adding {} service", service);
                    return;
                }
                Err(e) => tracing::error!("Failed to add {} service: {}", service, e),
            }
        }
    }

    fn handle_event(self: &Arc<Self>, event: GattEvent) {
        match event {
            GattEvent::RadioStateChanged(RadioState::On) => {
                let waiting = *lock(&self.state) == ServerState::WaitingForRadio;
                if waiting {
                    tracing::info!("Bluetooth enabled, starting services");
                    if let Err(e) = self.bring_up() {
                        tracing::error!("Failed to restart GATT server: {}", e);
                        drop(self.teardown(ServerState::WaitingForRadio));
                    }
                }
            }
            GattEvent::RadioStateChanged(radio) => {
                let state = *lock(&self.state);
                if matches!(state, ServerState::Starting | ServerState::Running) {
                    tracing::warn!("Bluetooth radio {:?}, closing GATT server", radio);
                    // Transport callbacks are synchronous; the aborted loop
                    // finishes its current pass on its own
                    drop(self.teardown(ServerState::WaitingForRadio));
                }
            }
            GattEvent::ServiceAdded { service, status } => {
                match (ServiceType::from_service_uuid(&service), status) {
                    (Some(service_type), GattStatus::Success) => {
                        tracing::info!("{} service added", service_type);
                        lock(&self.installed).insert(service_type);
                    }
                    (_, status) => tracing::warn!("Service {} added with status {:?}", service, status),
                }
                self.create_next_service();
            }
            GattEvent::ConnectionStateChanged { central, connected } => {
                if connected {
                    tracing::info!("Central connected: {}", central);
                } else if lock(&self.subscribers).remove(&central).is_some() {
                    tracing::info!("Central disconnected: {}", central);
                }
            }
            GattEvent::CharacteristicReadRequest {
                central,
                request_id,
                characteristic,
                ..
            } => self.characteristic_read(&central, request_id, characteristic),
            GattEvent::DescriptorReadRequest {
                central,
                request_id,
                offset,
                characteristic,
                descriptor,
            } => self.descriptor_read(&central, request_id, offset, characteristic, descriptor),
            GattEvent::DescriptorWriteRequest {
                central,
                request_id,
                characteristic,
                descriptor,
                response_needed,
                value,
                ..
            } => {
                let status = self.descriptor_write(&central, characteristic, descriptor, &value);
                if response_needed {
                    self.respond(&central, request_id, status, 0, &[]);
                }
            }
            GattEvent::NotificationSent { central, status } => {
                tracing::trace!("Notification to {} sent: {:?}", central, status);
            }
            GattEvent::MtuChanged { central, mtu } => {
                tracing::debug!("MTU changed for {}: {}", central, mtu);
            }
        }
    }

    fn characteristic_read(&self, central: &CentralId, request_id: u32, characteristic: Uuid) {
        let service = ServiceType::from_feature_uuid(&characteristic)
            .or_else(|| ServiceType::from_measurement_uuid(&characteristic));
        match service {
            Some(service) => {
                let features = self
                    .codecs
                    .get(&service)
                    .and_then(|codec| codec.supported_features())
                    .unwrap_or_default();
                self.respond(central, request_id, GattStatus::Success, 0, &features);
            }
            None => {
                tracing::warn!("Read of unknown characteristic {}", characteristic);
                self.respond(central, request_id, GattStatus::Failure, 0, &[]);
            }
        }
    }

    fn descriptor_read(
        &self,
        central: &CentralId,
        request_id: u32,
        offset: u16,
        characteristic: Uuid,
        descriptor: Uuid,
    ) {
        let service = ServiceType::from_measurement_uuid(&characteristic);
        match service {
            Some(service) if descriptor == CLIENT_CONFIG_UUID => {
                let subscribed = lock(&self.subscribers)
                    .get(central)
                    .is_some_and(|services| services.contains(&service));
                let value = if subscribed {
                    ENABLE_NOTIFICATION_VALUE
                } else {
                    DISABLE_NOTIFICATION_VALUE
                };
                tracing::debug!("Config descriptor read for {}", service);
                self.respond(central, request_id, GattStatus::Success, offset, &value);
            }
            _ => {
                tracing::warn!("Unknown descriptor read request: {}", descriptor);
                self.respond(central, request_id, GattStatus::Failure, offset, &[]);
            }
        }
    }

    fn descriptor_write(
        &self,
        central: &CentralId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> GattStatus {
        let service = match ServiceType::from_measurement_uuid(&characteristic) {
            Some(service) if descriptor == CLIENT_CONFIG_UUID => service,
            _ => {
                tracing::warn!("Unknown descriptor write request: {}", descriptor);
                return GattStatus::Failure;
            }
        };

        let mut subscribers = lock(&self.subscribers);
        if value == ENABLE_NOTIFICATION_VALUE {
            tracing::debug!("Subscribe {} to {} notifications", central, service);
            subscribers.entry(central.clone()).or_default().insert(service);
        } else if value == DISABLE_NOTIFICATION_VALUE {
            tracing::debug!("Unsubscribe {} from {} notifications", central, service);
            if let Some(services) = subscribers.get_mut(central) {
                services.remove(&service);
                if services.is_empty() {
                    subscribers.remove(central);
                }
            }
        } else {
            tracing::debug!("Ignoring client config value {:?} from {}", value, central);
        }
        GattStatus::Success
    }

    fn respond(
        &self,
        central: &CentralId,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: &[u8],
    ) {
        if let Err(e) = self
            .transport
            .send_response(central, request_id, status, offset, value)
        {
            tracing::warn!("{}", e);
        }
    }

    fn notify_subscribers(&self) -> usize {
        let subscribers: Vec<(CentralId, BTreeSet<ServiceType>)> = lock(&self.subscribers)
            .iter()
            .map(|(central, services)| (central.clone(), services.clone()))
            .collect();
        if subscribers.is_empty() {
            tracing::trace!("No subscribed centrals");
            return 0;
        }

        let installed = lock(&self.installed).clone();
        let selection = read(&self.selection).clone();

        let mut payloads = Vec::new();
        for service in installed {
            let selected: Vec<SensorDevice> = {
                let data = read(&self.data);
                let ids = selection.get(&service);
                data.get(&service)
                    .map(|devices| {
                        devices
                            .iter()
                            .filter(|d| ids.is_some_and(|ids| ids.contains(&d.device_id)))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            };
            if selected.is_empty() {
                tracing::trace!("No selected device for {}", service);
                continue;
            }

            let Some(codec) = self.codecs.get(&service) else {
                continue;
            };
            match codec.encode(&selected) {
                Ok(payload) => payloads.push((service, payload)),
                Err(e) => tracing::error!("Failed to encode {} measurement: {}", service, e),
            }
        }

        let mut sent = 0;
        for (central, services) in &subscribers {
            for (service, payload) in &payloads {
                if !services.contains(service) {
                    continue;
                }
                let characteristic = service.descriptor().measurement;
                match self.transport.notify(central, characteristic, payload) {
                    Ok(()) => sent += 1,
                    Err(e) => tracing::warn!("{}", e),
                }
            }
        }
        tracing::debug!("Sent {} notifications to {} centrals", sent, subscribers.len());
        sent
    }
}

struct EngineListener {
    inner: Weak<EngineInner>,
}

impl GattEventListener for EngineListener {
    fn on_gatt_event(&self, event: GattEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_event(event);
        }
    }
}
