//! Measurement and feature encoding for the exposed BLE services.
//!
//! Payloads follow the BLE SIG characteristic layouts bit for bit:
//! - CSC Measurement (0x2A5B): flags, u32 wheel revs, u16 wheel time,
//!   u16 crank revs, u16 crank time (times in 1/1024 s)
//! - RSC Measurement (0x2A53): flags, u16 speed (1/256 m/s), u8 cadence
//! - Heart Rate Measurement (0x2A37): flags, u8 heart rate
//!
//! All multi-byte fields are little-endian.

use crate::ble::services::ServiceType;
use crate::sensors::types::{SensorDevice, SensorKind, SensorReadings};
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// CSC feature bit: wheel revolution data supported
pub const CSC_FEATURE_WHEEL_REV: u8 = 0x01;

/// CSC feature bit: crank revolution data supported
pub const CSC_FEATURE_CRANK_REV: u8 = 0x02;

/// RSC feature value: no optional features
pub const RSC_NO_FEATURES: u8 = 0x00;

/// Errors raised when a codec is handed devices it cannot encode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("{service} accepts {expected} device(s), found {found}")]
    InvalidDeviceCount {
        service: ServiceType,
        expected: &'static str,
        found: usize,
    },

    #[error("{service} cannot encode data from {kind}")]
    UnsupportedDevice {
        service: ServiceType,
        kind: SensorKind,
    },
}

/// Encoder for one BLE service type.
///
/// The only state is the CSC feature byte, which is recomputed on every
/// encode from the kinds present in that call and served on feature reads.
#[derive(Debug)]
pub struct ServiceCodec {
    service: ServiceType,
    current_feature: AtomicU8,
}

impl ServiceCodec {
    pub fn new(service: ServiceType) -> Self {
        let initial = match service {
            ServiceType::Csc => CSC_FEATURE_WHEEL_REV | CSC_FEATURE_CRANK_REV,
            ServiceType::Rsc | ServiceType::HeartRate => 0,
        };
        Self {
            service,
            current_feature: AtomicU8::new(initial),
        }
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    /// Value of the feature characteristic, if the service has one.
    pub fn supported_features(&self) -> Option<Vec<u8>> {
        match self.service {
            // CSC Feature is a uint16; the high byte is always zero.
            ServiceType::Csc => Some(vec![self.current_feature.load(Ordering::Acquire), 0]),
            ServiceType::Rsc => Some(vec![RSC_NO_FEATURES]),
            ServiceType::HeartRate => None,
        }
    }

    /// Encode a measurement notification from the selected devices.
    pub fn encode(&self, devices: &[SensorDevice]) -> Result<Vec<u8>, CodecError> {
        match self.service {
            ServiceType::Csc => self.encode_csc(devices),
            ServiceType::Rsc => self.encode_rsc(devices),
            ServiceType::HeartRate => self.encode_hr(devices),
        }
    }

    fn encode_csc(&self, devices: &[SensorDevice]) -> Result<Vec<u8>, CodecError> {
        if devices.is_empty() || devices.len() > 2 {
            return Err(CodecError::InvalidDeviceCount {
                service: self.service,
                expected: "1 or 2",
                found: devices.len(),
            });
        }

        let mut wheel = None;
        let mut crank = None;
        for device in devices {
            match &device.readings {
                SensorReadings::BikeSpeed(d) => {
                    wheel.get_or_insert(d);
                }
                SensorReadings::BikeCadence(d) => {
                    crank.get_or_insert(d);
                }
                SensorReadings::Stride(_) | SensorReadings::HeartRate(_) => {
                    return Err(CodecError::UnsupportedDevice {
                        service: self.service,
                        kind: device.kind(),
                    });
                }
            }
        }

        let mut feature = 0;
        if wheel.is_some() {
            feature |= CSC_FEATURE_WHEEL_REV;
        }
        if crank.is_some() {
            feature |= CSC_FEATURE_CRANK_REV;
        }
        self.current_feature.store(feature, Ordering::Release);

        let mut data = Vec::with_capacity(11);
        data.push(feature & 0x03);

        if let Some(wheel) = wheel {
            data.extend_from_slice(&(wheel.cumulative_wheel_revolutions as u32).to_le_bytes());
            data.extend_from_slice(&(wheel.last_wheel_event_time as u16).to_le_bytes());
        }
        if let Some(crank) = crank {
            data.extend_from_slice(&(crank.cumulative_crank_revolutions as u16).to_le_bytes());
            data.extend_from_slice(&(crank.crank_event_time as u16).to_le_bytes());
        }

        Ok(data)
    }

    fn encode_rsc(&self, devices: &[SensorDevice]) -> Result<Vec<u8>, CodecError> {
        let device = self.single(devices)?;
        let SensorReadings::Stride(stride) = &device.readings else {
            return Err(CodecError::UnsupportedDevice {
                service: self.service,
                kind: device.kind(),
            });
        };

        let mut data = Vec::with_capacity(4);
        // Stride length, total distance and walking/running status are not reported.
        data.push(0);
        data.extend_from_slice(&speed_to_fixed_point(stride.speed_mps));
        data.push(stride.strides_per_minute as u8);
        Ok(data)
    }

    fn encode_hr(&self, devices: &[SensorDevice]) -> Result<Vec<u8>, CodecError> {
        let device = self.single(devices)?;
        let SensorReadings::HeartRate(hr) = &device.readings else {
            return Err(CodecError::UnsupportedDevice {
                service: self.service,
                kind: device.kind(),
            });
        };

        // Flags 0: 8-bit value, no contact status, energy or RR intervals.
        Ok(vec![0, hr.heart_rate as u8])
    }

    fn single<'a>(&self, devices: &'a [SensorDevice]) -> Result<&'a SensorDevice, CodecError> {
        match devices {
            [device] => Ok(device),
            _ => Err(CodecError::InvalidDeviceCount {
                service: self.service,
                expected: "exactly 1",
                found: devices.len(),
            }),
        }
    }
}

/// Encode m/s as a little-endian uint16 with 1/256 resolution.
///
/// The low byte is the binary fraction, built one bit at a time from the
/// most significant bit down; the high byte is the integer part.
pub fn speed_to_fixed_point(speed_mps: f32) -> [u8; 2] {
    let speed = f64::from(speed_mps.max(0.0));
    let whole = speed.trunc();
    let mut fraction = speed - whole;
    let mut bits = 0u8;
    for i in (0..8).rev() {
        fraction *= 2.0;
        if fraction >= 1.0 {
            bits |= 1 << i;
            fraction -= 1.0;
        }
    }
    [bits, whole as u64 as u8]
}
