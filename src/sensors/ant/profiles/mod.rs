//! ANT+ Device Profiles
//!
//! Applies plugin data events to the cached device of each profile.

pub mod bike;
pub mod hr;
pub mod sdm;

use super::AntDataEvent;
use crate::sensors::types::{DeviceId, SensorDevice, SensorKind, SensorReadings};

/// Device snapshot plus the per-device state a profile needs between events.
#[derive(Debug, Clone)]
pub struct CachedDevice {
    pub device: SensorDevice,
    pub(crate) last_wheel: Option<bike::WheelSample>,
}

impl CachedDevice {
    pub fn new(device_id: DeviceId, device_name: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            device: SensorDevice::new(device_id, device_name, kind),
            last_wheel: None,
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Device fields changed; publish the snapshot
    Updated,
    /// Stride count to hand to the cadence worker
    StrideCount { est_timestamp: i64, cumulative_strides: u64 },
    /// Event does not belong to this profile
    Ignored,
}

/// Apply a data event to a cached device.
pub fn apply_event(cached: &mut CachedDevice, event: &AntDataEvent, circumference_m: f64) -> Applied {
    let CachedDevice { device, last_wheel } = cached;
    match &mut device.readings {
        SensorReadings::BikeSpeed(data) => bike::apply_speed(data, last_wheel, event, circumference_m),
        SensorReadings::BikeCadence(data) => bike::apply_cadence(data, event),
        SensorReadings::Stride(data) => sdm::apply(data, event),
        SensorReadings::HeartRate(data) => hr::apply(data, event),
    }
}

/// Convert a sensor time in seconds to 1/1024 s units.
pub fn seconds_to_1024ths(seconds: f64) -> u64 {
    (seconds * 1024.0) as u64
}
