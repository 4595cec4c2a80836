//! Sensor model and the ANT+ connector layer.

pub mod ant;
pub mod types;

pub use types::{
    BikeCadenceData, BikeSpeedData, DeviceId, HeartRateData, SensorDevice, SensorKind,
    SensorReadings, StrideData,
};
