//! Sensor model for the ANT+ devices the bridge understands.
//!
//! A [`SensorDevice`] carries the fields common to every sensor plus a
//! tagged [`SensorReadings`] payload holding the live values for its kind.

use crate::ble::services::ServiceType;
use serde::{Deserialize, Serialize};

/// ANT+ device number. Stable and unique across every sensor kind.
pub type DeviceId = u32;

/// Kind of ANT+ sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Bike speed (wheel revolutions)
    BikeSpeed,
    /// Bike cadence (crank revolutions)
    BikeCadence,
    /// Stride-based speed and distance monitor
    Stride,
    /// Heart rate monitor
    HeartRate,
}

impl SensorKind {
    /// Every kind the bridge searches for, in startup order.
    pub const ALL: [SensorKind; 4] = [
        SensorKind::BikeSpeed,
        SensorKind::BikeCadence,
        SensorKind::Stride,
        SensorKind::HeartRate,
    ];

    /// BLE service this kind of sensor feeds.
    pub fn target_service(&self) -> ServiceType {
        match self {
            SensorKind::BikeSpeed | SensorKind::BikeCadence => ServiceType::Csc,
            SensorKind::Stride => ServiceType::Rsc,
            SensorKind::HeartRate => ServiceType::HeartRate,
        }
    }

    /// The other half of a combined speed/cadence sensor.
    pub fn counterpart(&self) -> Option<SensorKind> {
        match self {
            SensorKind::BikeSpeed => Some(SensorKind::BikeCadence),
            SensorKind::BikeCadence => Some(SensorKind::BikeSpeed),
            SensorKind::Stride | SensorKind::HeartRate => None,
        }
    }

    /// Human readable label shown next to the device.
    pub fn type_name(&self) -> &'static str {
        match self {
            SensorKind::BikeSpeed => "ANT+ Bike Speed",
            SensorKind::BikeCadence => "ANT+ Bike Cadence",
            SensorKind::Stride => "ANT+ Stride SDM",
            SensorKind::HeartRate => "ANT+ Heart Rate",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Bike speed readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BikeSpeedData {
    /// Cumulative wheel revolutions (rolls over)
    pub cumulative_wheel_revolutions: u64,
    /// Last wheel event time in 1/1024 s units
    pub last_wheel_event_time: u32,
    /// Estimated timestamp of the last speed event (ms)
    pub last_speed_timestamp: i64,
    /// Calculated speed in km/h
    pub speed_kmh: f32,
}

/// Bike cadence readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BikeCadenceData {
    /// Cumulative crank revolutions (rolls over)
    pub cumulative_crank_revolutions: u64,
    /// Last crank event time in 1/1024 s units
    pub crank_event_time: u64,
    /// Estimated timestamp of the last cadence event (ms)
    pub cadence_timestamp: i64,
    /// Calculated cadence in RPM
    pub cadence_rpm: u32,
}

/// Stride sensor readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrideData {
    /// Cumulative distance in meters
    pub distance_m: u64,
    pub distance_timestamp: i64,
    /// Instantaneous speed in m/s
    pub speed_mps: f32,
    pub speed_timestamp: i64,
    /// Cumulative stride count
    pub cumulative_strides: u64,
    pub stride_timestamp: i64,
    /// Windowed strides per minute
    pub strides_per_minute: u64,
}

/// Heart rate readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartRateData {
    /// Computed heart rate in BPM
    pub heart_rate: u32,
    pub timestamp: i64,
}

/// Live readings, tagged by sensor kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorReadings {
    BikeSpeed(BikeSpeedData),
    BikeCadence(BikeCadenceData),
    Stride(StrideData),
    HeartRate(HeartRateData),
}

impl SensorReadings {
    /// Zeroed readings for a freshly discovered sensor of `kind`.
    pub fn empty(kind: SensorKind) -> Self {
        match kind {
            SensorKind::BikeSpeed => SensorReadings::BikeSpeed(BikeSpeedData::default()),
            SensorKind::BikeCadence => SensorReadings::BikeCadence(BikeCadenceData::default()),
            SensorKind::Stride => SensorReadings::Stride(StrideData::default()),
            SensorKind::HeartRate => SensorReadings::HeartRate(HeartRateData::default()),
        }
    }

    pub fn kind(&self) -> SensorKind {
        match self {
            SensorReadings::BikeSpeed(_) => SensorKind::BikeSpeed,
            SensorReadings::BikeCadence(_) => SensorKind::BikeCadence,
            SensorReadings::Stride(_) => SensorKind::Stride,
            SensorReadings::HeartRate(_) => SensorKind::HeartRate,
        }
    }
}

/// Snapshot of a discovered ANT+ sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDevice {
    /// ANT+ device number
    pub device_id: DeviceId,
    /// Name reported by the ANT+ plugin
    pub device_name: String,
    /// Live readings
    pub readings: SensorReadings,
}

impl SensorDevice {
    /// Create a device with zeroed readings.
    pub fn new(device_id: DeviceId, device_name: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            readings: SensorReadings::empty(kind),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.readings.kind()
    }

    /// Human readable sensor type.
    pub fn type_name(&self) -> &'static str {
        self.kind().type_name()
    }

    /// BLE service this device feeds. Fixed for the device's lifetime.
    pub fn target_service(&self) -> ServiceType {
        self.kind().target_service()
    }

    /// Short summary of the latest readings.
    pub fn data_string(&self) -> String {
        match &self.readings {
            SensorReadings::BikeSpeed(d) => format!(
                "Speed: {:.1} km/h, Revolutions: {}",
                d.speed_kmh, d.cumulative_wheel_revolutions
            ),
            SensorReadings::BikeCadence(d) => format!(
                "Cadence: {} rpm, Crank Revolutions: {}",
                d.cadence_rpm, d.cumulative_crank_revolutions
            ),
            SensorReadings::Stride(d) => format!(
                "Speed: {:.2} m/s, Stride/Min: {}",
                d.speed_mps, d.strides_per_minute
            ),
            SensorReadings::HeartRate(d) => format!("Heart Rate: {}", d.heart_rate),
        }
    }
}
