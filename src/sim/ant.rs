//! Simulated ANT+ plugin.
//!
//! Sensors are added as if they came into range. A wildcard request claims
//! the first unclaimed sensor of its profile; requests that find none stay
//! pending until a matching sensor is added. Closing the release handle
//! frees the claim. Listeners and sinks are never called with the plugin
//! lock held.

use crate::sensors::ant::{
    AccessListener, AccessRequest, AntDataEvent, AntError, AntPlugin, DataEventSink, DeviceState,
    ReleaseHandle, RequestAccessResult, SensorHandle, WILDCARD_DEVICE_NUMBER,
};
use crate::sensors::types::{DeviceId, SensorKind};
use crate::sync::lock;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

/// Wheel circumference the simulated wheels roll with (meters)
const SIM_WHEEL_CIRCUMFERENCE_M: f64 = 2.095;

struct SimSensor {
    name: String,
    kinds: Vec<SensorKind>,
    combined: bool,
}

struct Claim {
    device_number: DeviceId,
    kind: SensorKind,
    sinks: Vec<DataEventSink>,
}

struct Pending {
    request: AccessRequest,
    listener: Arc<dyn AccessListener>,
}

#[derive(Default)]
struct SimState {
    available: bool,
    sensors: BTreeMap<DeviceId, SimSensor>,
    claims: HashMap<u64, Claim>,
    pending: BTreeMap<u64, Pending>,
    failures: HashMap<SensorKind, RequestAccessResult>,
    next_request: u64,
}

impl SimState {
    fn is_claimed(&self, device_number: DeviceId, kind: SensorKind) -> bool {
        self.claims
            .values()
            .any(|c| c.device_number == device_number && c.kind == kind)
    }

    fn find_unclaimed(&self, request: &AccessRequest) -> Option<DeviceId> {
        self.sensors
            .iter()
            .filter(|(number, _)| {
                request.device_number == WILDCARD_DEVICE_NUMBER || **number == request.device_number
            })
            .find(|(number, sensor)| {
                sensor.kinds.contains(&request.kind) && !self.is_claimed(**number, request.kind)
            })
            .map(|(number, _)| *number)
    }

    /// Claim `device_number` for request `id` and build its handle.
    fn grant(
        &mut self,
        state: &Arc<Mutex<SimState>>,
        id: u64,
        kind: SensorKind,
        device_number: DeviceId,
    ) -> Option<Arc<dyn SensorHandle>> {
        let sensor = self.sensors.get(&device_number)?;
        let handle = Arc::new(SimHandle {
            state: Arc::downgrade(state),
            request_id: id,
            device_number,
            name: sensor.name.clone(),
            combined: sensor.combined,
        });
        self.claims.insert(
            id,
            Claim {
                device_number,
                kind,
                sinks: Vec::new(),
            },
        );
        Some(handle)
    }
}

/// In-process stand-in for the vendor ANT+ plugin.
pub struct SimulatedAntPlugin {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedAntPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAntPlugin {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                available: true,
                ..Default::default()
            })),
        }
    }

    /// Bring a single-profile sensor into range.
    pub fn add_sensor(&self, kind: SensorKind, device_number: DeviceId, name: &str) {
        self.insert_sensor(
            device_number,
            SimSensor {
                name: name.to_string(),
                kinds: vec![kind],
                combined: false,
            },
        );
    }

    /// Bring a combined speed and cadence sensor into range.
    pub fn add_combined_sensor(&self, device_number: DeviceId, name: &str) {
        self.insert_sensor(
            device_number,
            SimSensor {
                name: name.to_string(),
                kinds: vec![SensorKind::BikeSpeed, SensorKind::BikeCadence],
                combined: true,
            },
        );
    }

    /// Make the plugin reject every request, as if it were not installed.
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    /// Answer the next request for `kind` with `result` instead of a search.
    pub fn fail_next_request(&self, kind: SensorKind, result: RequestAccessResult) {
        lock(&self.state).failures.insert(kind, result);
    }

    /// Deliver `event` to every subscriber of `device_number` whose profile
    /// publishes it. Returns the number of sinks called.
    pub fn emit(&self, device_number: DeviceId, event: AntDataEvent) -> usize {
        let kind = event.source_kind();
        let sinks: Vec<DataEventSink> = lock(&self.state)
            .claims
            .values()
            .filter(|c| c.device_number == device_number && c.kind == kind)
            .flat_map(|c| c.sinks.iter().cloned())
            .collect();
        for sink in &sinks {
            sink(event.clone());
        }
        sinks.len()
    }

    pub fn is_claimed(&self, device_number: DeviceId, kind: SensorKind) -> bool {
        lock(&self.state).is_claimed(device_number, kind)
    }

    /// Requests still searching.
    pub fn pending_requests(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Produce one round of synthetic data for every claimed sensor, as a
    /// rider at a steady effort would.
    pub fn tick(&self, now_ms: i64) {
        let claimed: Vec<(DeviceId, SensorKind)> = {
            let state = lock(&self.state);
            let mut claimed: Vec<_> = state
                .claims
                .values()
                .map(|c| (c.device_number, c.kind))
                .collect();
            claimed.sort();
            claimed.dedup();
            claimed
        };

        let seconds = now_ms.max(0) as f64 / 1000.0;
        for (device_number, kind) in claimed {
            for event in synthetic_events(kind, device_number, now_ms, seconds) {
                self.emit(device_number, event);
            }
        }
    }

    fn insert_sensor(&self, device_number: DeviceId, sensor: SimSensor) {
        tracing::debug!("Simulated sensor {} in range", device_number);
        let kinds = sensor.kinds.clone();
        let mut grants = Vec::new();
        {
            let mut state = lock(&self.state);
            state.sensors.insert(device_number, sensor);

            for kind in kinds {
                let waiting = state
                    .pending
                    .iter()
                    .find(|(_, p)| {
                        p.request.kind == kind
                            && (p.request.device_number == WILDCARD_DEVICE_NUMBER
                                || p.request.device_number == device_number)
                    })
                    .map(|(id, _)| *id);
                let Some(id) = waiting else {
                    continue;
                };
                let Some(pending) = state.pending.remove(&id) else {
                    continue;
                };
                if let Some(handle) = state.grant(&self.state, id, kind, device_number) {
                    grants.push((pending.listener, handle));
                }
            }
        }

        for (listener, handle) in grants {
            listener.on_access_result(RequestAccessResult::Success, DeviceState::Tracking, Some(handle));
        }
    }
}

impl AntPlugin for SimulatedAntPlugin {
    fn request_access(
        &self,
        request: AccessRequest,
        listener: Arc<dyn AccessListener>,
    ) -> Result<Box<dyn ReleaseHandle>, AntError> {
        enum Outcome {
            Granted(Arc<dyn SensorHandle>),
            Failed(RequestAccessResult),
            Searching,
        }

        let (id, outcome) = {
            let mut state = lock(&self.state);
            if !state.available {
                return Err(AntError::PluginUnavailable("simulated plugin disabled".to_string()));
            }
            state.next_request += 1;
            let id = state.next_request;

            let outcome = if let Some(result) = state.failures.remove(&request.kind) {
                Outcome::Failed(result)
            } else if let Some(number) = state.find_unclaimed(&request) {
                match state.grant(&self.state, id, request.kind, number) {
                    Some(handle) => Outcome::Granted(handle),
                    None => Outcome::Searching,
                }
            } else {
                Outcome::Searching
            };

            if matches!(outcome, Outcome::Searching) {
                state.pending.insert(
                    id,
                    Pending {
                        request,
                        listener: listener.clone(),
                    },
                );
            }
            (id, outcome)
        };

        match outcome {
            Outcome::Granted(handle) => {
                listener.on_access_result(RequestAccessResult::Success, DeviceState::Tracking, Some(handle));
            }
            Outcome::Failed(result) => {
                listener.on_access_result(result, DeviceState::Dead, None);
            }
            Outcome::Searching => listener.on_device_state_changed(DeviceState::Searching),
        }

        Ok(Box::new(SimRelease {
            state: Arc::downgrade(&self.state),
            request_id: id,
        }))
    }
}

struct SimHandle {
    state: Weak<Mutex<SimState>>,
    request_id: u64,
    device_number: DeviceId,
    name: String,
    combined: bool,
}

impl SensorHandle for SimHandle {
    fn device_number(&self) -> DeviceId {
        self.device_number
    }

    fn device_name(&self) -> String {
        self.name.clone()
    }

    fn is_combined_sensor(&self) -> bool {
        self.combined
    }

    fn subscribe(&self, sink: DataEventSink) {
        if let Some(state) = self.state.upgrade() {
            if let Some(claim) = lock(&state).claims.get_mut(&self.request_id) {
                claim.sinks.push(sink);
            }
        }
    }
}

struct SimRelease {
    state: Weak<Mutex<SimState>>,
    request_id: u64,
}

impl ReleaseHandle for SimRelease {
    fn close(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = lock(&state);
            state.claims.remove(&self.request_id);
            state.pending.remove(&self.request_id);
        }
    }
}

fn synthetic_events(kind: SensorKind, device_number: DeviceId, now_ms: i64, seconds: f64) -> Vec<AntDataEvent> {
    // Vary effort slightly per device so several sensors are distinguishable
    let offset = (device_number % 10) as f64;
    match kind {
        SensorKind::BikeSpeed => {
            let speed_mps = 8.0 + offset * 0.1;
            let revolutions = (seconds * speed_mps / SIM_WHEEL_CIRCUMFERENCE_M).floor();
            vec![AntDataEvent::RawSpeed {
                est_timestamp: now_ms,
                timestamp_of_last_event: revolutions * SIM_WHEEL_CIRCUMFERENCE_M / speed_mps,
                cumulative_revolutions: revolutions as u64,
            }]
        }
        SensorKind::BikeCadence => {
            let rpm = 85.0 + offset;
            let revolutions = (seconds * rpm / 60.0).floor();
            vec![
                AntDataEvent::CalculatedCadence {
                    est_timestamp: now_ms,
                    cadence_rpm: rpm as u32,
                },
                AntDataEvent::RawCadence {
                    est_timestamp: now_ms,
                    timestamp_of_last_event: revolutions * 60.0 / rpm,
                    cumulative_revolutions: revolutions as u64,
                },
            ]
        }
        SensorKind::Stride => {
            let speed_mps = 3.0 + offset * 0.05;
            vec![
                AntDataEvent::InstantaneousSpeed {
                    est_timestamp: now_ms,
                    speed_mps,
                },
                AntDataEvent::Distance {
                    est_timestamp: now_ms,
                    distance_m: seconds * speed_mps,
                },
                AntDataEvent::StrideCount {
                    est_timestamp: now_ms,
                    cumulative_strides: (seconds * (85.0 + offset) / 60.0) as u64,
                },
            ]
        }
        SensorKind::HeartRate => {
            let bpm = 120 + (seconds as u32 / 10) % 20 + offset as u32;
            vec![AntDataEvent::HeartRate {
                est_timestamp: now_ms,
                computed_heart_rate: bpm,
                beat_count: (seconds * bpm as f64 / 60.0) as u64,
                beat_event_time: seconds,
            }]
        }
    }
}
