//! ANT+ Plugin Support
//!
//! The vendor ANT+ stack is consumed through [`AntPlugin`]: access to a
//! sensor profile is requested with a wildcard or specific device number,
//! the outcome arrives on an [`AccessListener`], and a successful result
//! carries a [`SensorHandle`] whose data events can be subscribed to.
//! Access is given back by closing the returned [`ReleaseHandle`].

pub mod connector;
pub mod profiles;
pub mod stride;

use crate::sensors::types::{DeviceId, SensorKind};
use std::sync::Arc;
use thiserror::Error;

pub use connector::{ConnectorSettings, DeviceListener, SensorConnector};
pub use stride::StrideCadence;

/// Device number used to search for any device of a profile.
pub const WILDCARD_DEVICE_NUMBER: DeviceId = 0;

/// Errors that can occur during ANT+ operations
#[derive(Debug, Error)]
pub enum AntError {
    #[error("ANT+ plugin unavailable: {0}")]
    PluginUnavailable(String),

    #[error("Failed to start stride worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Outcome of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAccessResult {
    Success,
    UserCancelled,
    ChannelNotAvailable,
    DeviceAlreadyInUse,
    SearchTimeout,
    OtherFailure,
}

/// State of the ANT+ device behind an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Searching,
    Tracking,
    ProcessingRequest,
    Dead,
    Closed,
    Unrecognized,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Searching => write!(f, "Searching"),
            DeviceState::Tracking => write!(f, "Tracking"),
            DeviceState::ProcessingRequest => write!(f, "Processing Request"),
            DeviceState::Dead => write!(f, "Dead"),
            DeviceState::Closed => write!(f, "Closed"),
            DeviceState::Unrecognized => write!(f, "Unrecognized"),
        }
    }
}

/// Data events published by an ANT+ sensor profile.
///
/// Timestamps are the plugin's estimated event times in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum AntDataEvent {
    /// Bike speed/distance raw page
    RawSpeed {
        est_timestamp: i64,
        /// Sensor time of the last wheel event, seconds
        timestamp_of_last_event: f64,
        cumulative_revolutions: u64,
    },
    /// Bike cadence raw page
    RawCadence {
        est_timestamp: i64,
        /// Sensor time of the last crank event, seconds
        timestamp_of_last_event: f64,
        cumulative_revolutions: u64,
    },
    /// Cadence computed by the plugin
    CalculatedCadence { est_timestamp: i64, cadence_rpm: u32 },
    /// Stride SDM cumulative stride count
    StrideCount {
        est_timestamp: i64,
        cumulative_strides: u64,
    },
    /// Stride SDM cumulative distance
    Distance { est_timestamp: i64, distance_m: f64 },
    /// Stride SDM instantaneous speed
    InstantaneousSpeed { est_timestamp: i64, speed_mps: f64 },
    /// Heart rate page
    HeartRate {
        est_timestamp: i64,
        computed_heart_rate: u32,
        beat_count: u64,
        beat_event_time: f64,
    },
}

impl AntDataEvent {
    /// Sensor profile that publishes this event.
    pub fn source_kind(&self) -> SensorKind {
        match self {
            AntDataEvent::RawSpeed { .. } => SensorKind::BikeSpeed,
            AntDataEvent::RawCadence { .. } | AntDataEvent::CalculatedCadence { .. } => {
                SensorKind::BikeCadence
            }
            AntDataEvent::StrideCount { .. }
            | AntDataEvent::Distance { .. }
            | AntDataEvent::InstantaneousSpeed { .. } => SensorKind::Stride,
            AntDataEvent::HeartRate { .. } => SensorKind::HeartRate,
        }
    }
}

/// Sink receiving data events for one subscribed sensor.
pub type DataEventSink = Arc<dyn Fn(AntDataEvent) + Send + Sync>;

/// Handle to a sensor the plugin granted access to.
pub trait SensorHandle: Send + Sync {
    /// ANT+ device number
    fn device_number(&self) -> DeviceId;

    /// Name reported by the plugin
    fn device_name(&self) -> String;

    /// Whether one physical device reports both speed and cadence
    fn is_combined_sensor(&self) -> bool;

    /// Subscribe to every data event this sensor publishes
    fn subscribe(&self, sink: DataEventSink);
}

/// Receives the outcome of access requests.
pub trait AccessListener: Send + Sync {
    /// Called once per request with the result; `sensor` is set on success.
    fn on_access_result(
        &self,
        result: RequestAccessResult,
        state: DeviceState,
        sensor: Option<Arc<dyn SensorHandle>>,
    );

    /// Called whenever the tracked device changes state.
    fn on_device_state_changed(&self, state: DeviceState);
}

/// Gives access back to the plugin when closed.
pub trait ReleaseHandle: Send {
    fn close(&mut self);
}

/// Access request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest {
    pub kind: SensorKind,
    /// Specific device number, or [`WILDCARD_DEVICE_NUMBER`]
    pub device_number: DeviceId,
}

impl AccessRequest {
    /// Search for any device of the given kind
    pub fn search_any(kind: SensorKind) -> Self {
        Self {
            kind,
            device_number: WILDCARD_DEVICE_NUMBER,
        }
    }
}

/// Vendor ANT+ plugin.
pub trait AntPlugin: Send + Sync {
    /// Request access to a sensor profile. Results arrive on `listener`,
    /// possibly before this call returns.
    fn request_access(
        &self,
        request: AccessRequest,
        listener: Arc<dyn AccessListener>,
    ) -> Result<Box<dyn ReleaseHandle>, AntError>;
}
