//! ANT+ to BLE bridge orchestrator.
//!
//! Owns the device registry, the selection map and the connector list, and
//! wires the connectors to the GATT server engine. Registry, selection and
//! connector list sit behind one lock; connector start and stop calls and
//! event delivery happen after it is released.

use crate::ble::server::{GattServerEngine, ServerSettings};
use crate::ble::transport::{GattError, GattTransport};
use crate::bridge::selection::{self, Registry, SelectionMap};
use crate::config::BridgeConfig;
use crate::sensors::ant::{
    AntPlugin, ConnectorSettings, DeviceListener, DeviceState, RequestAccessResult, SensorConnector,
};
use crate::sensors::types::{DeviceId, SensorDevice, SensorKind};
use crate::sync::lock;
use crossbeam::channel::{Receiver, Sender};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::runtime::Handle;

/// Errors that can occur while running the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to start GATT server: {0}")]
    Gatt(#[from] GattError),
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Full device list (sorted by id) and current selection
    DevicesUpdated {
        devices: Vec<SensorDevice>,
        selection: SelectionMap,
    },
    Searching(bool),
}

/// Connector list entry, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorSummary {
    pub kind: SensorKind,
    pub combined: bool,
    pub searching: bool,
}

/// Bridges ANT+ sensors into the BLE GATT services.
#[derive(Clone)]
pub struct AntBleBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    plugin: Arc<dyn AntPlugin>,
    engine: GattServerEngine,
    connector_settings: ConnectorSettings,
    state: Mutex<BridgeState>,
    events: Mutex<Option<Sender<BridgeEvent>>>,
    /// Serializes startup and stop
    lifecycle: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct BridgeState {
    registry: Registry,
    selection: SelectionMap,
    connectors: Vec<Arc<SensorConnector>>,
    searching: bool,
}

impl AntBleBridge {
    pub fn new(
        plugin: Arc<dyn AntPlugin>,
        transport: Arc<dyn GattTransport>,
        config: &BridgeConfig,
        runtime: Handle,
    ) -> Self {
        let engine = GattServerEngine::new(transport, ServerSettings::from(config), runtime);
        Self {
            inner: Arc::new(BridgeInner {
                plugin,
                engine,
                connector_settings: ConnectorSettings::from(config),
                state: Mutex::new(BridgeState::default()),
                events: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Get a receiver for bridge events. Replaces any earlier receiver.
    pub fn event_receiver(&self) -> Receiver<BridgeEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        *lock(&self.inner.events) = Some(tx);
        rx
    }

    /// Start a fresh session: stop any running one, start the GATT server
    /// and one connector per sensor kind.
    pub async fn startup(&self) -> Result<(), BridgeError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.shutdown().await;

        tracing::info!("Starting ANT+ bridge");
        self.inner.engine.start()?;

        let connectors: Vec<Arc<SensorConnector>> = SensorKind::ALL
            .iter()
            .map(|kind| self.inner.new_connector(*kind, false))
            .collect();
        {
            let mut state = lock(&self.inner.state);
            state.connectors = connectors.clone();
            state.searching = true;
        }
        self.inner.emit(BridgeEvent::Searching(true));

        for connector in &connectors {
            if let Err(e) = connector.start_search() {
                tracing::error!("Failed to start {} search: {}", connector.kind(), e);
            }
        }
        Ok(())
    }

    /// Stop every connector and the GATT server, then clear the registry
    /// and selection. Safe to call repeatedly.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.shutdown().await;
    }

    /// User selection of `device` for its service.
    ///
    /// Ignored while stopped and for devices the bridge has not discovered.
    pub fn device_selected(&self, device: &SensorDevice) {
        let event = {
            let mut state = lock(&self.inner.state);
            if !state.searching {
                tracing::debug!("Ignoring selection of {} while stopped", device.device_id);
                return;
            }
            if !state.registry.contains_key(&device.device_id) {
                tracing::warn!("Ignoring selection of unknown device {}", device.device_id);
                return;
            }
            let BridgeState {
                registry,
                selection,
                ..
            } = &mut *state;
            selection::user_select(selection, registry, device);
            self.inner.engine.set_selection(selection.clone());
            BridgeInner::devices_event(&state)
        };
        tracing::info!(
            "Selected {} ({}) for {}",
            device.device_name,
            device.device_id,
            device.target_service()
        );
        self.inner.emit(event);
    }

    /// Known devices, sorted by id.
    pub fn devices(&self) -> Vec<SensorDevice> {
        BridgeInner::sorted_devices(&lock(&self.inner.state).registry)
    }

    pub fn selection(&self) -> SelectionMap {
        lock(&self.inner.state).selection.clone()
    }

    pub fn is_searching(&self) -> bool {
        lock(&self.inner.state).searching
    }

    pub fn connectors(&self) -> Vec<ConnectorSummary> {
        lock(&self.inner.state)
            .connectors
            .iter()
            .map(|c| ConnectorSummary {
                kind: c.kind(),
                combined: c.is_combined_sensor(),
                searching: c.is_searching(),
            })
            .collect()
    }

    pub fn engine(&self) -> &GattServerEngine {
        &self.inner.engine
    }
}

impl BridgeInner {
    fn new_connector(self: &Arc<Self>, kind: SensorKind, combined: bool) -> Arc<SensorConnector> {
        let listener = Arc::new(KindListener {
            bridge: Arc::downgrade(self),
            kind,
        });
        SensorConnector::new(
            kind,
            combined,
            self.plugin.clone(),
            listener,
            self.connector_settings,
        )
    }

    async fn shutdown(&self) {
        let (connectors, was_searching) = {
            let mut state = lock(&self.state);
            let was_searching = std::mem::replace(&mut state.searching, false);
            (std::mem::take(&mut state.connectors), was_searching)
        };

        for connector in &connectors {
            connector.retire();
        }
        self.engine.stop().await;

        let event = {
            let mut state = lock(&self.state);
            state.registry.clear();
            state.selection.clear();
            Self::devices_event(&state)
        };

        if was_searching {
            tracing::info!("ANT+ bridge stopped");
            self.emit(event);
            self.emit(BridgeEvent::Searching(false));
        }
    }

    fn data_updated(self: &Arc<Self>, device: SensorDevice) {
        let service = device.target_service();
        let (follow_up, event) = {
            let mut state = lock(&self.state);
            if !state.searching {
                tracing::trace!("Ignoring update from {} while stopped", device.device_id);
                return;
            }

            let is_new = state
                .registry
                .insert(device.device_id, device.clone())
                .is_none();
            self.engine.update_data(service, device.clone());

            // Keep searching for further devices of the same kind
            let follow_up = if is_new {
                tracing::info!(
                    "Found {}: {} ({})",
                    device.type_name(),
                    device.device_name,
                    device.device_id
                );
                let connector = self.new_connector(device.kind(), false);
                state.connectors.push(connector.clone());
                Some(connector)
            } else {
                None
            };

            let BridgeState {
                registry,
                selection,
                ..
            } = &mut *state;
            if selection::auto_select(selection, registry, &device) {
                tracing::info!("Auto-selected {} for {}", device.device_id, service);
            }
            self.engine.set_selection(selection.clone());

            (follow_up, Self::devices_event(&state))
        };

        if let Some(connector) = follow_up {
            if let Err(e) = connector.start_search() {
                tracing::warn!("Failed to search for another {}: {}", connector.kind(), e);
            }
        }
        self.emit(event);
    }

    fn combined_sensor(self: &Arc<Self>, kind: SensorKind, device_id: DeviceId) {
        let Some(counterpart) = kind.counterpart() else {
            return;
        };

        let (old, new) = {
            let mut state = lock(&self.state);
            if !state.searching {
                return;
            }
            let already_combined = state
                .connectors
                .iter()
                .any(|c| c.kind() == counterpart && c.is_combined_sensor());
            if already_combined {
                tracing::debug!("{} connector already serves a combined sensor", counterpart);
                return;
            }
            let Some(position) = state.connectors.iter().position(|c| c.kind() == counterpart) else {
                return;
            };

            let old = state.connectors.remove(position);
            let new = self.new_connector(counterpart, true);
            state.connectors.push(new.clone());
            (old, new)
        };

        tracing::info!(
            "Combined sensor {} detected, replacing {} connector",
            device_id,
            counterpart
        );
        old.retire();
        if let Err(e) = new.start_search() {
            tracing::error!("Failed to start combined {} search: {}", counterpart, e);
        }
    }

    fn devices_event(state: &BridgeState) -> BridgeEvent {
        BridgeEvent::DevicesUpdated {
            devices: Self::sorted_devices(&state.registry),
            selection: state.selection.clone(),
        }
    }

    fn sorted_devices(registry: &Registry) -> Vec<SensorDevice> {
        let mut devices: Vec<SensorDevice> = registry.values().cloned().collect();
        devices.sort_by_key(|d| d.device_id);
        devices
    }

    fn emit(&self, event: BridgeEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }
}

/// Routes one connector's callbacks into the bridge.
struct KindListener {
    bridge: Weak<BridgeInner>,
    kind: SensorKind,
}

impl DeviceListener for KindListener {
    fn on_device_state_changed(&self, result: RequestAccessResult, state: DeviceState) {
        tracing::trace!("{} access: {:?} ({})", self.kind, result, state);
    }

    fn on_data_updated(&self, device: SensorDevice) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.data_updated(device);
        }
    }

    fn on_combined_sensor(&self, kind: SensorKind, device_id: DeviceId) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.combined_sensor(kind, device_id);
        }
    }
}
