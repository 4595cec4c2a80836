//! Recording BLE transport.
//!
//! Keeps every call the engine makes and lets a test or the demo play the
//! part of the radio and of connected centrals. Confirmations and requests
//! are delivered synchronously on the calling thread.

use crate::ble::services::{
    ServiceType, CLIENT_CONFIG_UUID, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::ble::transport::{
    Advertisement, CentralId, GattError, GattEvent, GattEventListener, GattServiceDefinition,
    GattStatus, GattTransport, RadioState,
};
use crate::sync::lock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Notifications kept before the oldest are dropped
const MAX_RECORDED: usize = 1024;

/// A notification the engine sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub central: CentralId,
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

/// A response the engine sent to a read or write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub central: CentralId,
    pub request_id: u32,
    pub status: GattStatus,
    pub offset: u16,
    pub value: Vec<u8>,
}

struct LoopbackState {
    radio: RadioState,
    /// Turn the radio on when the engine asks
    auto_enable: bool,
    /// Confirm service adds immediately
    auto_confirm: bool,
    server_open: bool,
    advertisement: Option<Advertisement>,
    services: Vec<GattServiceDefinition>,
    unconfirmed: VecDeque<Uuid>,
    notifications: VecDeque<Notification>,
    responses: Vec<Response>,
    next_request_id: u32,
}

/// In-process [`GattTransport`] that records what it is asked to do.
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
    listener: Mutex<Option<Arc<dyn GattEventListener>>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    /// Transport with the radio on.
    pub fn new() -> Self {
        Self::with_radio(RadioState::On)
    }

    pub fn with_radio(radio: RadioState) -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                radio,
                auto_enable: true,
                auto_confirm: true,
                server_open: false,
                advertisement: None,
                services: Vec::new(),
                unconfirmed: VecDeque::new(),
                notifications: VecDeque::new(),
                responses: Vec::new(),
                next_request_id: 0,
            }),
            listener: Mutex::new(None),
        }
    }

    /// Leave the radio off when the engine asks to enable it.
    pub fn set_auto_enable(&self, enabled: bool) {
        lock(&self.state).auto_enable = enabled;
    }

    /// Hold service adds until [`confirm_next_service`](Self::confirm_next_service).
    pub fn set_auto_confirm(&self, enabled: bool) {
        lock(&self.state).auto_confirm = enabled;
    }

    /// Change the radio state and report it.
    pub fn set_radio(&self, radio: RadioState) {
        lock(&self.state).radio = radio;
        self.fire(GattEvent::RadioStateChanged(radio));
    }

    /// Confirm the oldest outstanding service add. Returns false if none.
    pub fn confirm_next_service(&self) -> bool {
        let service = lock(&self.state).unconfirmed.pop_front();
        match service {
            Some(service) => {
                self.fire(GattEvent::ServiceAdded {
                    service,
                    status: GattStatus::Success,
                });
                true
            }
            None => false,
        }
    }

    /// Deliver an event to the registered listener.
    pub fn fire(&self, event: GattEvent) {
        let listener = lock(&self.listener).clone();
        match listener {
            Some(listener) => listener.on_gatt_event(event),
            None => tracing::trace!("No GATT listener for {:?}", event),
        }
    }

    pub fn connect(&self, central: &str) {
        self.fire(GattEvent::ConnectionStateChanged {
            central: central.to_string(),
            connected: true,
        });
    }

    pub fn disconnect(&self, central: &str) {
        self.fire(GattEvent::ConnectionStateChanged {
            central: central.to_string(),
            connected: false,
        });
    }

    /// Write the client config descriptor of `service`'s measurement.
    pub fn write_client_config(&self, central: &str, service: ServiceType, enable: bool) -> Option<Response> {
        let value = if enable {
            ENABLE_NOTIFICATION_VALUE
        } else {
            DISABLE_NOTIFICATION_VALUE
        };
        let request_id = self.next_request_id();
        self.fire(GattEvent::DescriptorWriteRequest {
            central: central.to_string(),
            request_id,
            characteristic: service.descriptor().measurement,
            descriptor: CLIENT_CONFIG_UUID,
            response_needed: true,
            offset: 0,
            value: value.to_vec(),
        });
        self.response(request_id)
    }

    /// Read the client config descriptor of `service`'s measurement.
    pub fn read_client_config(&self, central: &str, service: ServiceType) -> Option<Response> {
        let request_id = self.next_request_id();
        self.fire(GattEvent::DescriptorReadRequest {
            central: central.to_string(),
            request_id,
            offset: 0,
            characteristic: service.descriptor().measurement,
            descriptor: CLIENT_CONFIG_UUID,
        });
        self.response(request_id)
    }

    pub fn read_characteristic(&self, central: &str, characteristic: Uuid) -> Option<Response> {
        let request_id = self.next_request_id();
        self.fire(GattEvent::CharacteristicReadRequest {
            central: central.to_string(),
            request_id,
            offset: 0,
            characteristic,
        });
        self.response(request_id)
    }

    /// Drain recorded notifications.
    pub fn take_notifications(&self) -> Vec<Notification> {
        lock(&self.state).notifications.drain(..).collect()
    }

    pub fn is_server_open(&self) -> bool {
        lock(&self.state).server_open
    }

    pub fn advertisement(&self) -> Option<Advertisement> {
        lock(&self.state).advertisement.clone()
    }

    /// Service UUIDs in the order they were added.
    pub fn added_services(&self) -> Vec<Uuid> {
        lock(&self.state).services.iter().map(|s| s.uuid).collect()
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.listener).is_some()
    }

    fn next_request_id(&self) -> u32 {
        let mut state = lock(&self.state);
        state.next_request_id += 1;
        state.next_request_id
    }

    /// Latest response sent for `request_id`.
    pub fn response(&self, request_id: u32) -> Option<Response> {
        lock(&self.state)
            .responses
            .iter()
            .rev()
            .find(|r| r.request_id == request_id)
            .cloned()
    }
}

impl GattTransport for LoopbackTransport {
    fn radio_state(&self) -> RadioState {
        lock(&self.state).radio
    }

    fn enable_radio(&self) -> Result<(), GattError> {
        let enabled = {
            let mut state = lock(&self.state);
            match state.radio {
                RadioState::Unsupported => return Err(GattError::Unsupported),
                RadioState::On => false,
                RadioState::Off if state.auto_enable => {
                    state.radio = RadioState::On;
                    true
                }
                RadioState::Off => false,
            }
        };
        if enabled {
            self.fire(GattEvent::RadioStateChanged(RadioState::On));
        }
        Ok(())
    }

    fn set_listener(&self, listener: Option<Arc<dyn GattEventListener>>) {
        *lock(&self.listener) = listener;
    }

    fn open_server(&self) -> Result<(), GattError> {
        let mut state = lock(&self.state);
        if state.radio != RadioState::On {
            return Err(GattError::Radio("radio is off".to_string()));
        }
        state.server_open = true;
        state.services.clear();
        state.unconfirmed.clear();
        Ok(())
    }

    fn close_server(&self) {
        let mut state = lock(&self.state);
        state.server_open = false;
        state.unconfirmed.clear();
    }

    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), GattError> {
        lock(&self.state).advertisement = Some(advertisement.clone());
        Ok(())
    }

    fn stop_advertising(&self) {
        lock(&self.state).advertisement = None;
    }

    fn add_service(&self, service: &GattServiceDefinition) -> Result<(), GattError> {
        let confirm = {
            let mut state = lock(&self.state);
            if !state.server_open {
                return Err(GattError::ServerNotOpen);
            }
            if !state.unconfirmed.is_empty() {
                return Err(GattError::AddService(service.uuid));
            }
            state.services.push(service.clone());
            if state.auto_confirm {
                true
            } else {
                state.unconfirmed.push_back(service.uuid);
                false
            }
        };
        if confirm {
            self.fire(GattEvent::ServiceAdded {
                service: service.uuid,
                status: GattStatus::Success,
            });
        }
        Ok(())
    }

    fn notify(&self, central: &CentralId, characteristic: Uuid, value: &[u8]) -> Result<(), GattError> {
        let mut state = lock(&self.state);
        if !state.server_open {
            return Err(GattError::ServerNotOpen);
        }
        if state.notifications.len() == MAX_RECORDED {
            state.notifications.pop_front();
        }
        state.notifications.push_back(Notification {
            central: central.clone(),
            characteristic,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn send_response(
        &self,
        central: &CentralId,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: &[u8],
    ) -> Result<(), GattError> {
        lock(&self.state).responses.push(Response {
            central: central.clone(),
            request_id,
            status,
            offset,
            value: value.to_vec(),
        });
        Ok(())
    }
}
