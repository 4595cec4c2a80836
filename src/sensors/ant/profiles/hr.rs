//! ANT+ Heart Rate Profile
//!
//! Device Type: 120

use super::Applied;
use crate::sensors::ant::AntDataEvent;
use crate::sensors::types::HeartRateData;

pub(super) fn apply(data: &mut HeartRateData, event: &AntDataEvent) -> Applied {
    let AntDataEvent::HeartRate {
        est_timestamp,
        computed_heart_rate,
        ..
    } = *event
    else {
        return Applied::Ignored;
    };

    data.heart_rate = computed_heart_rate;
    data.timestamp = est_timestamp;
    Applied::Updated
}
