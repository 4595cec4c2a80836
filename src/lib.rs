//! ANT+ to BLE Bridge
//!
//! Relays ANT+ fitness sensors (bike speed, bike cadence, stride, heart
//! rate) as standard BLE GATT services (Cycling Speed and Cadence, Running
//! Speed and Cadence, Heart Rate) so any BLE central can consume them.

pub mod ble;
pub mod bridge;
pub mod config;
pub mod sensors;
pub mod sim;

mod sync;

// Re-export commonly used types
pub use ble::server::GattServerEngine;
pub use bridge::orchestrator::{AntBleBridge, BridgeEvent};
pub use config::BridgeConfig;
pub use sensors::types::{SensorDevice, SensorKind};
