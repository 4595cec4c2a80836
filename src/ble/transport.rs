//! BLE peripheral transport abstraction.
//!
//! The radio, advertising and GATT dispatch plumbing live behind
//! [`GattTransport`]. Inbound requests and stack confirmations arrive as
//! [`GattEvent`]s on the registered [`GattEventListener`], possibly on the
//! thread that issued the call that caused them.

use crate::ble::services::{ServiceDescriptor, CLIENT_CONFIG_UUID};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a connected BLE central (its address).
pub type CentralId = String;

/// Errors that can occur on the BLE transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattError {
    #[error("BLE peripheral mode is not supported")]
    Unsupported,

    #[error("GATT server is not open")]
    ServerNotOpen,

    #[error("Radio error: {0}")]
    Radio(String),

    #[error("Failed to add service {0}")]
    AddService(Uuid),

    #[error("Notification to {central} failed: {reason}")]
    Notify { central: CentralId, reason: String },

    #[error("Failed to send response: {0}")]
    Response(String),
}

/// Bluetooth radio state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// No radio, or no peripheral role
    Unsupported,
    Off,
    On,
}

/// Result code carried by GATT responses and confirmations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure,
}

/// Advertising cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

/// Advertisement payload and settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: String,
    pub include_tx_power: bool,
    pub service_uuids: Vec<Uuid>,
    pub mode: AdvertiseMode,
    pub connectable: bool,
    /// `None` advertises until stopped
    pub timeout_ms: Option<u32>,
}

impl Advertisement {
    /// Connectable, low latency, non-expiring advertisement.
    pub fn for_services(local_name: impl Into<String>, services: &[ServiceDescriptor]) -> Self {
        Self {
            local_name: local_name.into(),
            include_tx_power: true,
            service_uuids: services.iter().map(|s| s.service).collect(),
            mode: AdvertiseMode::LowLatency,
            connectable: true,
            timeout_ms: None,
        }
    }
}

/// Characteristic property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicProperty {
    Read,
    Notify,
}

/// Characteristic to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDefinition {
    pub uuid: Uuid,
    pub properties: Vec<CharacteristicProperty>,
    pub descriptors: Vec<Uuid>,
}

/// Primary service to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServiceDefinition {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDefinition>,
}

impl GattServiceDefinition {
    /// Notify-only measurement with a client config descriptor, plus a
    /// read-only feature characteristic where the service has one.
    pub fn from_descriptor(descriptor: &ServiceDescriptor) -> Self {
        let mut characteristics = vec![CharacteristicDefinition {
            uuid: descriptor.measurement,
            properties: vec![CharacteristicProperty::Notify],
            descriptors: vec![CLIENT_CONFIG_UUID],
        }];
        if let Some(feature) = descriptor.feature {
            characteristics.push(CharacteristicDefinition {
                uuid: feature,
                properties: vec![CharacteristicProperty::Read],
                descriptors: Vec::new(),
            });
        }
        Self {
            uuid: descriptor.service,
            characteristics,
        }
    }
}

/// Events delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    RadioStateChanged(RadioState),
    ServiceAdded {
        service: Uuid,
        status: GattStatus,
    },
    ConnectionStateChanged {
        central: CentralId,
        connected: bool,
    },
    CharacteristicReadRequest {
        central: CentralId,
        request_id: u32,
        offset: u16,
        characteristic: Uuid,
    },
    DescriptorReadRequest {
        central: CentralId,
        request_id: u32,
        offset: u16,
        characteristic: Uuid,
        descriptor: Uuid,
    },
    DescriptorWriteRequest {
        central: CentralId,
        request_id: u32,
        characteristic: Uuid,
        descriptor: Uuid,
        response_needed: bool,
        offset: u16,
        value: Vec<u8>,
    },
    NotificationSent {
        central: CentralId,
        status: GattStatus,
    },
    MtuChanged {
        central: CentralId,
        mtu: u16,
    },
}

/// Receives transport events.
pub trait GattEventListener: Send + Sync {
    fn on_gatt_event(&self, event: GattEvent);
}

/// BLE peripheral stack.
pub trait GattTransport: Send + Sync {
    fn radio_state(&self) -> RadioState;

    /// Ask the platform to turn the radio on. Completion is reported with
    /// [`GattEvent::RadioStateChanged`].
    fn enable_radio(&self) -> Result<(), GattError>;

    fn set_listener(&self, listener: Option<Arc<dyn GattEventListener>>);

    fn open_server(&self) -> Result<(), GattError>;

    fn close_server(&self);

    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), GattError>;

    fn stop_advertising(&self);

    /// Register a service. Completion is reported with
    /// [`GattEvent::ServiceAdded`]; only one add may be outstanding.
    fn add_service(&self, service: &GattServiceDefinition) -> Result<(), GattError>;

    fn notify(&self, central: &CentralId, characteristic: Uuid, value: &[u8]) -> Result<(), GattError>;

    fn send_response(
        &self,
        central: &CentralId,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: &[u8],
    ) -> Result<(), GattError>;
}
