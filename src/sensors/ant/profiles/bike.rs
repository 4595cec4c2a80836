//! ANT+ Bike Speed and Bike Cadence Profiles
//!
//! Device Types: 123 (speed), 122 (cadence), 121 (combined)

use super::{seconds_to_1024ths, Applied};
use crate::sensors::ant::AntDataEvent;
use crate::sensors::types::{BikeCadenceData, BikeSpeedData};

/// Default wheel circumference in meters (700x23c)
pub const DEFAULT_WHEEL_CIRCUMFERENCE_M: f64 = 2.095;

/// m/s to km/h
pub const MS_TO_KMH: f64 = 3.6;

/// Previous raw wheel event, used to derive speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelSample {
    pub cumulative_revolutions: u64,
    /// Sensor event time in seconds
    pub event_time: f64,
}

/// Speed in km/h between two wheel events, if time has advanced.
pub fn wheel_speed_kmh(previous: WheelSample, current: WheelSample, circumference_m: f64) -> Option<f32> {
    let elapsed = current.event_time - previous.event_time;
    if elapsed <= 0.0 {
        return None;
    }
    let revolutions = current
        .cumulative_revolutions
        .wrapping_sub(previous.cumulative_revolutions) as f64;
    Some((revolutions * circumference_m / elapsed * MS_TO_KMH) as f32)
}

pub(super) fn apply_speed(
    data: &mut BikeSpeedData,
    last_wheel: &mut Option<WheelSample>,
    event: &AntDataEvent,
    circumference_m: f64,
) -> Applied {
    let AntDataEvent::RawSpeed {
        est_timestamp,
        timestamp_of_last_event,
        cumulative_revolutions,
    } = *event
    else {
        return Applied::Ignored;
    };

    let current = WheelSample {
        cumulative_revolutions,
        event_time: timestamp_of_last_event,
    };
    if let Some(speed) = last_wheel.and_then(|prev| wheel_speed_kmh(prev, current, circumference_m)) {
        data.speed_kmh = speed;
    }
    *last_wheel = Some(current);

    tracing::trace!(
        "Wheel revolutions: {}, last event time: {}",
        cumulative_revolutions,
        timestamp_of_last_event
    );

    data.cumulative_wheel_revolutions = cumulative_revolutions;
    data.last_wheel_event_time = seconds_to_1024ths(timestamp_of_last_event) as u32;
    data.last_speed_timestamp = est_timestamp;
    Applied::Updated
}

pub(super) fn apply_cadence(data: &mut BikeCadenceData, event: &AntDataEvent) -> Applied {
    match *event {
        AntDataEvent::CalculatedCadence { cadence_rpm, .. } => {
            data.cadence_rpm = cadence_rpm;
            Applied::Updated
        }
        AntDataEvent::RawCadence {
            est_timestamp,
            timestamp_of_last_event,
            cumulative_revolutions,
        } => {
            data.cumulative_crank_revolutions = cumulative_revolutions;
            data.crank_event_time = seconds_to_1024ths(timestamp_of_last_event);
            data.cadence_timestamp = est_timestamp;
            Applied::Updated
        }
        _ => Applied::Ignored,
    }
}
