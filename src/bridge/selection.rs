//! Device selection policy.
//!
//! A [`SelectionMap`] says which devices feed each BLE service. RSC and HR
//! carry at most one device; CSC carries at most one speed and one cadence
//! device.

use crate::ble::services::ServiceType;
use crate::sensors::types::{DeviceId, SensorDevice, SensorKind};
use std::collections::{BTreeMap, HashMap};

/// Selected device ids per service, in selection order.
pub type SelectionMap = BTreeMap<ServiceType, Vec<DeviceId>>;

/// Latest snapshot of every known device.
pub type Registry = HashMap<DeviceId, SensorDevice>;

/// Apply the automatic first-seen policy for a device that just reported.
///
/// Returns true when the selection changed.
pub fn auto_select(selection: &mut SelectionMap, registry: &Registry, device: &SensorDevice) -> bool {
    let service = device.target_service();
    let selected = selection.entry(service).or_default();

    if selected.is_empty() {
        selected.push(device.device_id);
        return true;
    }

    if service != ServiceType::Csc || selected.contains(&device.device_id) {
        return false;
    }

    let kind = device.kind();
    let kind_taken = selected
        .iter()
        .any(|id| kind_of(registry, *id) == Some(kind));
    if kind_taken {
        return false;
    }

    selected.push(device.device_id);
    true
}

/// Apply a user selection: the device replaces whichever selected device
/// of the same kind its service holds.
pub fn user_select(selection: &mut SelectionMap, registry: &Registry, device: &SensorDevice) {
    let kind = device.kind();
    let selected = selection.entry(device.target_service()).or_default();
    selected.retain(|id| *id != device.device_id && kind_of(registry, *id) != Some(kind));
    selected.push(device.device_id);
}

fn kind_of(registry: &Registry, id: DeviceId) -> Option<SensorKind> {
    registry.get(&id).map(|d| d.kind())
}
