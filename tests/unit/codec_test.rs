//! Unit tests for the BLE measurement codecs.
//!
//! Payloads are checked byte for byte against the BLE SIG layouts.

use antbridge::ble::codec::{speed_to_fixed_point, CodecError, ServiceCodec};
use antbridge::ble::services::ServiceType;
use antbridge::sensors::{
    BikeCadenceData, BikeSpeedData, HeartRateData, SensorDevice, SensorKind, SensorReadings,
    StrideData,
};

fn speed_device(id: u32, revs: u64, event_time: u32) -> SensorDevice {
    SensorDevice {
        device_id: id,
        device_name: format!("Speed {}", id),
        readings: SensorReadings::BikeSpeed(BikeSpeedData {
            cumulative_wheel_revolutions: revs,
            last_wheel_event_time: event_time,
            ..Default::default()
        }),
    }
}

fn cadence_device(id: u32, revs: u64, event_time: u64) -> SensorDevice {
    SensorDevice {
        device_id: id,
        device_name: format!("Cadence {}", id),
        readings: SensorReadings::BikeCadence(BikeCadenceData {
            cumulative_crank_revolutions: revs,
            crank_event_time: event_time,
            ..Default::default()
        }),
    }
}

// =============================================================================
// CSC Tests
// =============================================================================

#[test]
fn test_csc_device_order_does_not_matter() {
    let codec = ServiceCodec::new(ServiceType::Csc);
    let forward = codec
        .encode(&[speed_device(1, 1000, 500), cadence_device(2, 40, 256)])
        .unwrap();
    let reverse = codec
        .encode(&[cadence_device(2, 40, 256), speed_device(1, 1000, 500)])
        .unwrap();
    assert_eq!(forward, reverse);
    assert_eq!(forward.len(), 11);
}

#[test]
fn test_csc_wheel_only() {
    let codec = ServiceCodec::new(ServiceType::Csc);
    let data = codec.encode(&[speed_device(1, 0x0102_0304, 0x0506)]).unwrap();
    assert_eq!(data, vec![0x01, 0x04, 0x03, 0x02, 0x01, 0x06, 0x05]);
    assert_eq!(codec.supported_features(), Some(vec![0x01, 0x00]));
}

#[test]
fn test_csc_feature_follows_latest_encode() {
    let codec = ServiceCodec::new(ServiceType::Csc);
    assert_eq!(codec.supported_features(), Some(vec![0x03, 0x00]));

    codec.encode(&[cadence_device(2, 1, 1)]).unwrap();
    assert_eq!(codec.supported_features(), Some(vec![0x02, 0x00]));

    codec
        .encode(&[speed_device(1, 1, 1), cadence_device(2, 1, 1)])
        .unwrap();
    assert_eq!(codec.supported_features(), Some(vec![0x03, 0x00]));
}

#[test]
fn test_csc_two_speed_devices_use_first() {
    let codec = ServiceCodec::new(ServiceType::Csc);
    let data = codec
        .encode(&[speed_device(1, 7, 8), speed_device(2, 9, 10)])
        .unwrap();
    assert_eq!(data, vec![0x01, 0x07, 0x00, 0x00, 0x00, 0x08, 0x00]);
}

#[test]
fn test_csc_rejects_stride() {
    let codec = ServiceCodec::new(ServiceType::Csc);
    let stride = SensorDevice::new(3, "Foot Pod", SensorKind::Stride);
    assert_eq!(
        codec.encode(&[stride]),
        Err(CodecError::UnsupportedDevice {
            service: ServiceType::Csc,
            kind: SensorKind::Stride,
        })
    );
}

// =============================================================================
// RSC Tests
// =============================================================================

#[test]
fn test_rsc_payload_layout() {
    let codec = ServiceCodec::new(ServiceType::Rsc);
    let device = SensorDevice {
        device_id: 3,
        device_name: "Foot Pod".to_string(),
        readings: SensorReadings::Stride(StrideData {
            speed_mps: 4.5,
            strides_per_minute: 172,
            ..Default::default()
        }),
    };
    assert_eq!(codec.encode(&[device]).unwrap(), vec![0x00, 0x80, 0x04, 0xAC]);
}

#[test]
fn test_rsc_requires_exactly_one_device() {
    let codec = ServiceCodec::new(ServiceType::Rsc);
    let a = SensorDevice::new(3, "A", SensorKind::Stride);
    let b = SensorDevice::new(4, "B", SensorKind::Stride);
    assert!(matches!(
        codec.encode(&[a, b]),
        Err(CodecError::InvalidDeviceCount { found: 2, .. })
    ));
}

#[test]
fn test_speed_fixed_point_fractions() {
    assert_eq!(speed_to_fixed_point(0.0), [0x00, 0x00]);
    assert_eq!(speed_to_fixed_point(1.5), [0x80, 0x01]);
    assert_eq!(speed_to_fixed_point(2.125), [0x20, 0x02]);
    // Bits below 1/256 are dropped.
    assert_eq!(speed_to_fixed_point(1.001), [0x00, 0x01]);
}

// =============================================================================
// Heart Rate Tests
// =============================================================================

#[test]
fn test_hr_value_truncates_to_byte() {
    let codec = ServiceCodec::new(ServiceType::HeartRate);
    let device = SensorDevice {
        device_id: 9,
        device_name: "HRM".to_string(),
        readings: SensorReadings::HeartRate(HeartRateData {
            heart_rate: 300,
            timestamp: 0,
        }),
    };
    assert_eq!(codec.encode(&[device]).unwrap(), vec![0x00, 44]);
}

#[test]
fn test_hr_rejects_empty_selection() {
    let codec = ServiceCodec::new(ServiceType::HeartRate);
    assert!(matches!(
        codec.encode(&[]),
        Err(CodecError::InvalidDeviceCount { found: 0, .. })
    ));
}
