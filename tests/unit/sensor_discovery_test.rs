//! Unit tests for ANT+ sensor discovery through the simulated plugin.

use antbridge::sensors::ant::{
    AntDataEvent, AntError, ConnectorSettings, DeviceListener, DeviceState, RequestAccessResult,
    SensorConnector,
};
use antbridge::sensors::{DeviceId, SensorDevice, SensorKind, SensorReadings};
use antbridge::sim::SimulatedAntPlugin;
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

struct ChannelListener {
    updates: Sender<SensorDevice>,
    combined: Sender<(SensorKind, DeviceId)>,
}

impl DeviceListener for ChannelListener {
    fn on_device_state_changed(&self, _result: RequestAccessResult, _state: DeviceState) {}

    fn on_data_updated(&self, device: SensorDevice) {
        let _ = self.updates.send(device);
    }

    fn on_combined_sensor(&self, kind: SensorKind, device_id: DeviceId) {
        let _ = self.combined.send((kind, device_id));
    }
}

struct Harness {
    plugin: Arc<SimulatedAntPlugin>,
    updates: Receiver<SensorDevice>,
    combined: Receiver<(SensorKind, DeviceId)>,
    listener: Arc<ChannelListener>,
}

impl Harness {
    fn new() -> Self {
        let (updates_tx, updates) = channel::unbounded();
        let (combined_tx, combined) = channel::unbounded();
        Self {
            plugin: Arc::new(SimulatedAntPlugin::new()),
            updates,
            combined,
            listener: Arc::new(ChannelListener {
                updates: updates_tx,
                combined: combined_tx,
            }),
        }
    }

    fn connector(&self, kind: SensorKind) -> Arc<SensorConnector> {
        SensorConnector::new(
            kind,
            false,
            self.plugin.clone(),
            self.listener.clone(),
            ConnectorSettings::default(),
        )
    }
}

fn heart_rate(bpm: u32) -> AntDataEvent {
    AntDataEvent::HeartRate {
        est_timestamp: 0,
        computed_heart_rate: bpm,
        beat_count: 0,
        beat_event_time: 0.0,
    }
}

#[test]
fn test_search_waits_for_sensor() {
    let harness = Harness::new();
    let connector = harness.connector(SensorKind::HeartRate);

    connector.start_search().unwrap();
    assert!(connector.is_searching());
    assert_eq!(harness.plugin.pending_requests(), 1);

    harness.plugin.add_sensor(SensorKind::HeartRate, 4242, "HRM");
    assert_eq!(harness.plugin.pending_requests(), 0);
    assert!(harness.plugin.is_claimed(4242, SensorKind::HeartRate));

    assert_eq!(harness.plugin.emit(4242, heart_rate(64)), 1);
    let device = harness.updates.try_recv().unwrap();
    assert_eq!(device.device_id, 4242);
    assert_eq!(device.device_name, "HRM");
}

#[test]
fn test_two_connectors_claim_different_devices() {
    let harness = Harness::new();
    harness.plugin.add_sensor(SensorKind::HeartRate, 1, "First");
    harness.plugin.add_sensor(SensorKind::HeartRate, 2, "Second");

    let first = harness.connector(SensorKind::HeartRate);
    let second = harness.connector(SensorKind::HeartRate);
    first.start_search().unwrap();
    second.start_search().unwrap();

    assert!(harness.plugin.is_claimed(1, SensorKind::HeartRate));
    assert!(harness.plugin.is_claimed(2, SensorKind::HeartRate));

    harness.plugin.emit(2, heart_rate(90));
    let device = harness.updates.try_recv().unwrap();
    assert_eq!(device.device_id, 2);
    assert_eq!(second.device_count(), 1);
    assert_eq!(first.device_count(), 0);
}

#[test]
fn test_stop_releases_claim_and_late_events_are_dropped() {
    let harness = Harness::new();
    harness.plugin.add_sensor(SensorKind::BikeCadence, 7, "Crank");
    let connector = harness.connector(SensorKind::BikeCadence);
    connector.start_search().unwrap();

    connector.stop_search();
    connector.stop_search();
    assert!(!connector.is_searching());
    assert!(!harness.plugin.is_claimed(7, SensorKind::BikeCadence));
    assert_eq!(
        harness.plugin.emit(
            7,
            AntDataEvent::CalculatedCadence {
                est_timestamp: 0,
                cadence_rpm: 80,
            }
        ),
        0
    );
    assert!(harness.updates.try_recv().is_err());
}

#[test]
fn test_unavailable_plugin() {
    let harness = Harness::new();
    harness.plugin.set_available(false);
    let connector = harness.connector(SensorKind::Stride);

    assert!(matches!(
        connector.start_search(),
        Err(AntError::PluginUnavailable(_))
    ));
    assert!(!connector.is_searching());
}

#[test]
fn test_combined_sensor_reported_by_both_halves() {
    let harness = Harness::new();
    harness.plugin.add_combined_sensor(12345, "Speed/Cadence");

    let speed = harness.connector(SensorKind::BikeSpeed);
    let cadence = harness.connector(SensorKind::BikeCadence);
    speed.start_search().unwrap();
    cadence.start_search().unwrap();

    let mut reports: Vec<_> = harness.combined.try_iter().collect();
    reports.sort();
    assert_eq!(
        reports,
        vec![
            (SensorKind::BikeSpeed, 12345),
            (SensorKind::BikeCadence, 12345)
        ]
    );
}

#[test]
fn test_stride_cadence_from_sim_ticks() {
    let harness = Harness::new();
    harness.plugin.add_sensor(SensorKind::Stride, 500, "Foot Pod");
    let connector = harness.connector(SensorKind::Stride);
    connector.start_search().unwrap();

    for second in 0..=10 {
        harness.plugin.tick(second * 1000);
    }

    // Device 500 runs at 85 strides per minute.
    let deadline = Duration::from_secs(5);
    let mut rate = 0;
    while let Ok(device) = harness.updates.recv_timeout(deadline) {
        if let SensorReadings::Stride(data) = &device.readings {
            if data.stride_timestamp == 10_000 {
                rate = data.strides_per_minute;
                break;
            }
        }
    }
    assert_eq!(rate, 84);

    connector.stop_search();
}
