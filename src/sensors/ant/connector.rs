//! Per-kind ANT+ sensor connector.
//!
//! A [`SensorConnector`] searches for one device of a single [`SensorKind`],
//! subscribes to its data events once access is granted and turns them into
//! [`SensorDevice`] snapshots for its [`DeviceListener`].
//!
//! Every search session gets a generation number. Stopping bumps it, so
//! vendor callbacks that arrive after a stop fall through as no-ops.

use super::profiles::{self, sdm, Applied, CachedDevice};
use super::stride::{StrideSample, StrideWorker, DEFAULT_HISTORY_LIMIT, DEFAULT_WINDOW_MS};
use super::{
    AccessListener, AccessRequest, AntDataEvent, AntError, AntPlugin, DataEventSink, DeviceState,
    ReleaseHandle, RequestAccessResult, SensorHandle,
};
use crate::sensors::ant::profiles::bike::DEFAULT_WHEEL_CIRCUMFERENCE_M;
use crate::sensors::types::{DeviceId, SensorDevice, SensorKind, SensorReadings};
use crate::sync::lock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Receives normalized sensor updates from a connector.
pub trait DeviceListener: Send + Sync {
    /// Outcome of an access request. Informational only.
    fn on_device_state_changed(&self, result: RequestAccessResult, state: DeviceState);

    /// A device snapshot changed.
    fn on_data_updated(&self, device: SensorDevice);

    /// A bike connector found that its sensor also reports the other half
    /// of a combined speed and cadence device.
    fn on_combined_sensor(&self, kind: SensorKind, device_id: DeviceId);
}

/// Tunables shared by every connector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectorSettings {
    /// Wheel circumference used to derive bike speed (meters)
    pub wheel_circumference_m: f64,
    /// Stride cadence averaging window (milliseconds)
    pub stride_window_ms: i64,
    /// Stride history cap
    pub stride_history_limit: usize,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            wheel_circumference_m: DEFAULT_WHEEL_CIRCUMFERENCE_M,
            stride_window_ms: DEFAULT_WINDOW_MS,
            stride_history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Discovery and subscription adapter for one sensor kind.
pub struct SensorConnector {
    kind: SensorKind,
    /// Serves one half of a sensor already known to be combined
    combined: bool,
    settings: ConnectorSettings,
    plugin: Arc<dyn AntPlugin>,
    listener: Arc<dyn DeviceListener>,
    generation: AtomicU64,
    retired: AtomicBool,
    release: Mutex<Option<Box<dyn ReleaseHandle>>>,
    stride: Mutex<Option<StrideWorker>>,
    /// Local device cache keyed by ANT+ device number
    devices: Mutex<HashMap<DeviceId, CachedDevice>>,
    combined_reported: Mutex<HashSet<DeviceId>>,
}

impl SensorConnector {
    pub fn new(
        kind: SensorKind,
        combined: bool,
        plugin: Arc<dyn AntPlugin>,
        listener: Arc<dyn DeviceListener>,
        settings: ConnectorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            combined,
            settings,
            plugin,
            listener,
            generation: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            release: Mutex::new(None),
            stride: Mutex::new(None),
            devices: Mutex::new(HashMap::new()),
            combined_reported: Mutex::new(HashSet::new()),
        })
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn is_combined_sensor(&self) -> bool {
        self.combined
    }

    /// Whether an access request is currently held.
    pub fn is_searching(&self) -> bool {
        lock(&self.release).is_some()
    }

    /// Number of devices in the local cache.
    pub fn device_count(&self) -> usize {
        lock(&self.devices).len()
    }

    /// Start a new search session, tearing down any existing one first.
    ///
    /// A retired connector stays stopped.
    pub fn start_search(self: &Arc<Self>) -> Result<(), AntError> {
        self.stop_search();
        if self.retired.load(Ordering::Acquire) {
            tracing::debug!("{} connector retired, not searching", self.kind);
            return Ok(());
        }

        let generation = self.generation.load(Ordering::Acquire);
        if self.kind == SensorKind::Stride {
            let weak = Arc::downgrade(self);
            let worker = StrideWorker::spawn(
                self.settings.stride_window_ms,
                self.settings.stride_history_limit,
                move |sample, rate| {
                    if let Some(connector) = weak.upgrade() {
                        connector.stride_rate(generation, sample, rate);
                    }
                },
            )?;
            *lock(&self.stride) = Some(worker);
        }

        tracing::info!(
            "Searching for {} sensors{}",
            self.kind,
            if self.combined { " (combined)" } else { "" }
        );

        let callbacks = Arc::new(AccessCallbacks {
            connector: Arc::downgrade(self),
            generation,
        });
        let handle = match self
            .plugin
            .request_access(AccessRequest::search_any(self.kind), callbacks)
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to request {} access: {}", self.kind, e);
                let worker = lock(&self.stride).take();
                if let Some(worker) = worker {
                    worker.shutdown();
                }
                return Err(e);
            }
        };

        // A stop may have raced the request; give the access straight back.
        let stale = {
            let mut release = lock(&self.release);
            if self.is_current(generation) {
                release.replace(handle)
            } else {
                Some(handle)
            }
        };
        if let Some(mut stale) = stale {
            stale.close();
        }
        Ok(())
    }

    /// Release vendor access and discard the device cache.
    ///
    /// Safe to call when no search is running.
    pub fn stop_search(&self) {
        {
            let mut devices = lock(&self.devices);
            self.generation.fetch_add(1, Ordering::AcqRel);
            devices.clear();
        }
        lock(&self.combined_reported).clear();

        let handle = lock(&self.release).take();
        if let Some(mut handle) = handle {
            handle.close();
            tracing::debug!("Released {} access", self.kind);
        }

        let worker = lock(&self.stride).take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }

    /// Stop permanently. Later [`start_search`](Self::start_search) calls
    /// are ignored.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.stop_search();
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.retired.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }

    fn access_result(
        self: &Arc<Self>,
        generation: u64,
        result: RequestAccessResult,
        state: DeviceState,
        sensor: Option<Arc<dyn SensorHandle>>,
    ) {
        match (result, sensor) {
            (RequestAccessResult::Success, Some(sensor)) => {
                tracing::info!(
                    "{} ({}): {}",
                    sensor.device_name(),
                    sensor.device_number(),
                    state
                );
                self.subscribe(generation, sensor);
            }
            (RequestAccessResult::Success, None) => {
                tracing::warn!("{} access granted without a sensor handle", self.kind);
            }
            (RequestAccessResult::UserCancelled, _) => {
                tracing::debug!("{} search closed: {:?}", self.kind, result);
            }
            (other, _) => {
                tracing::warn!(
                    "{} device state changed: {}, result: {:?}",
                    self.kind,
                    state,
                    other
                );
            }
        }
        self.listener.on_device_state_changed(result, state);
    }

    fn subscribe(self: &Arc<Self>, generation: u64, sensor: Arc<dyn SensorHandle>) {
        let device_number = sensor.device_number();
        let device_name = sensor.device_name();

        let weak: Weak<Self> = Arc::downgrade(self);
        let sink: DataEventSink = Arc::new(move |event| {
            if let Some(connector) = weak.upgrade() {
                connector.data_event(generation, device_number, &device_name, event);
            }
        });
        sensor.subscribe(sink);

        let bike = self.kind.counterpart().is_some();
        if bike && sensor.is_combined_sensor() && !self.combined {
            let first = lock(&self.combined_reported).insert(device_number);
            if first {
                tracing::info!(
                    "{} sensor {} also reports {}",
                    self.kind,
                    device_number,
                    self.kind.counterpart().map(|k| k.to_string()).unwrap_or_default()
                );
                self.listener.on_combined_sensor(self.kind, device_number);
            }
        }
    }

    fn data_event(&self, generation: u64, device_number: DeviceId, device_name: &str, event: AntDataEvent) {
        let (applied, snapshot) = {
            let mut devices = lock(&self.devices);
            if !self.is_current(generation) {
                return;
            }
            let cached = devices
                .entry(device_number)
                .or_insert_with(|| CachedDevice::new(device_number, device_name, self.kind));
            let applied = profiles::apply_event(cached, &event, self.settings.wheel_circumference_m);
            let snapshot = (applied == Applied::Updated).then(|| cached.device.clone());
            (applied, snapshot)
        };

        match applied {
            Applied::Updated => {
                if let Some(device) = snapshot {
                    self.listener.on_data_updated(device);
                }
            }
            Applied::StrideCount {
                est_timestamp,
                cumulative_strides,
            } => {
                let sample = StrideSample {
                    device_number,
                    est_timestamp,
                    cumulative_strides,
                };
                let queued = lock(&self.stride)
                    .as_ref()
                    .map(|worker| worker.submit(sample))
                    .unwrap_or(false);
                if !queued {
                    tracing::trace!("Dropped stride sample for {}", device_number);
                }
            }
            Applied::Ignored => {
                tracing::trace!("{} connector ignored {:?}", self.kind, event);
            }
        }
    }

    fn stride_rate(&self, generation: u64, sample: StrideSample, rate: u64) {
        let snapshot = {
            let mut devices = lock(&self.devices);
            if !self.is_current(generation) {
                return;
            }
            let Some(cached) = devices.get_mut(&sample.device_number) else {
                return;
            };
            if let SensorReadings::Stride(data) = &mut cached.device.readings {
                sdm::apply_cadence(data, sample.est_timestamp, sample.cumulative_strides, rate);
            }
            cached.device.clone()
        };
        tracing::trace!("Strides per minute: {}", rate);
        self.listener.on_data_updated(snapshot);
    }
}

impl Drop for SensorConnector {
    fn drop(&mut self) {
        let handle = self
            .release
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut handle) = handle {
            handle.close();
        }
    }
}

struct AccessCallbacks {
    connector: Weak<SensorConnector>,
    generation: u64,
}

impl AccessListener for AccessCallbacks {
    fn on_access_result(
        &self,
        result: RequestAccessResult,
        state: DeviceState,
        sensor: Option<Arc<dyn SensorHandle>>,
    ) {
        let Some(connector) = self.connector.upgrade() else {
            return;
        };
        if !connector.is_current(self.generation) {
            tracing::trace!("Dropping {} access result from a stopped search", connector.kind);
            return;
        }
        connector.access_result(self.generation, result, state, sensor);
    }

    fn on_device_state_changed(&self, state: DeviceState) {
        if let Some(connector) = self.connector.upgrade() {
            tracing::debug!("{} device state changed: {}", connector.kind, state);
        }
    }
}
