//! BLE SIG service table for the services the bridge exposes.
//!
//! UUIDs are the standard 16-bit assignments on the Bluetooth base UUID.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement Characteristic UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// CSC Feature Characteristic UUID (0x2A5C)
pub const CSC_FEATURE_UUID: Uuid = Uuid::from_u128(0x0000_2a5c_0000_1000_8000_0080_5f9b_34fb);

/// Running Speed and Cadence Service UUID (0x1814)
pub const RSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1814_0000_1000_8000_0080_5f9b_34fb);

/// RSC Measurement Characteristic UUID (0x2A53)
pub const RSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a53_0000_1000_8000_0080_5f9b_34fb);

/// RSC Feature Characteristic UUID (0x2A54)
pub const RSC_FEATURE_UUID: Uuid = Uuid::from_u128(0x0000_2a54_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement Characteristic UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Client Characteristic Configuration Descriptor UUID (0x2902)
pub const CLIENT_CONFIG_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);

/// Client config value enabling notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Client config value disabling notifications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// BLE service exposed by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Cycling Speed and Cadence
    Csc,
    /// Running Speed and Cadence
    Rsc,
    /// Heart Rate
    HeartRate,
}

/// UUIDs making up one exposed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_type: ServiceType,
    pub service: Uuid,
    pub measurement: Uuid,
    pub feature: Option<Uuid>,
}

/// Every exposed service, in creation order.
pub static SERVICE_TABLE: [ServiceDescriptor; 3] = [
    ServiceDescriptor {
        service_type: ServiceType::Csc,
        service: CSC_SERVICE_UUID,
        measurement: CSC_MEASUREMENT_UUID,
        feature: Some(CSC_FEATURE_UUID),
    },
    ServiceDescriptor {
        service_type: ServiceType::Rsc,
        service: RSC_SERVICE_UUID,
        measurement: RSC_MEASUREMENT_UUID,
        feature: Some(RSC_FEATURE_UUID),
    },
    ServiceDescriptor {
        service_type: ServiceType::HeartRate,
        service: HEART_RATE_SERVICE_UUID,
        measurement: HEART_RATE_MEASUREMENT_UUID,
        feature: None,
    },
];

impl ServiceType {
    /// All service types, in creation order.
    pub const ALL: [ServiceType; 3] = [ServiceType::Csc, ServiceType::Rsc, ServiceType::HeartRate];

    pub fn descriptor(&self) -> &'static ServiceDescriptor {
        match self {
            ServiceType::Csc => &SERVICE_TABLE[0],
            ServiceType::Rsc => &SERVICE_TABLE[1],
            ServiceType::HeartRate => &SERVICE_TABLE[2],
        }
    }

    pub fn from_service_uuid(uuid: &Uuid) -> Option<Self> {
        SERVICE_TABLE
            .iter()
            .find(|d| d.service == *uuid)
            .map(|d| d.service_type)
    }

    pub fn from_measurement_uuid(uuid: &Uuid) -> Option<Self> {
        SERVICE_TABLE
            .iter()
            .find(|d| d.measurement == *uuid)
            .map(|d| d.service_type)
    }

    pub fn from_feature_uuid(uuid: &Uuid) -> Option<Self> {
        SERVICE_TABLE
            .iter()
            .find(|d| d.feature == Some(*uuid))
            .map(|d| d.service_type)
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::Csc => write!(f, "Cycling Speed/Cadence"),
            ServiceType::Rsc => write!(f, "Running Speed/Cadence"),
            ServiceType::HeartRate => write!(f, "Heart Rate"),
        }
    }
}
