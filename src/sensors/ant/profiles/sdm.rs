//! ANT+ Stride-Based Speed and Distance Monitor Profile
//!
//! Device Type: 124. Stride counts are not applied here; they are routed to
//! the connector's cadence worker, which owns the smoothing history.

use super::Applied;
use crate::sensors::ant::AntDataEvent;
use crate::sensors::types::StrideData;

pub(super) fn apply(data: &mut StrideData, event: &AntDataEvent) -> Applied {
    match *event {
        AntDataEvent::Distance {
            est_timestamp,
            distance_m,
        } => {
            data.distance_m = distance_m.max(0.0) as u64;
            data.distance_timestamp = est_timestamp;
            Applied::Updated
        }
        AntDataEvent::InstantaneousSpeed {
            est_timestamp,
            speed_mps,
        } => {
            data.speed_mps = speed_mps as f32;
            data.speed_timestamp = est_timestamp;
            Applied::Updated
        }
        AntDataEvent::StrideCount {
            est_timestamp,
            cumulative_strides,
        } => Applied::StrideCount {
            est_timestamp,
            cumulative_strides,
        },
        _ => Applied::Ignored,
    }
}

/// Record a smoothed cadence on the device.
pub fn apply_cadence(data: &mut StrideData, est_timestamp: i64, cumulative_strides: u64, rate: u64) {
    data.cumulative_strides = cumulative_strides;
    data.stride_timestamp = est_timestamp;
    data.strides_per_minute = rate;
}
