//! Integration tests for the GATT server engine over the loopback transport.
//!
//! Timer-driven tests run with paused time so the notification period is
//! deterministic.

use antbridge::ble::services::{
    ServiceType, CLIENT_CONFIG_UUID, CSC_FEATURE_UUID, CSC_MEASUREMENT_UUID, CSC_SERVICE_UUID,
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID, RSC_MEASUREMENT_UUID, RSC_SERVICE_UUID,
};
use antbridge::ble::transport::{
    AdvertiseMode, Advertisement, CentralId, GattError, GattEvent, GattEventListener,
    GattServiceDefinition, GattStatus, GattTransport, RadioState,
};
use antbridge::ble::{GattServerEngine, ServerSettings, ServerState};
use antbridge::bridge::SelectionMap;
use antbridge::sensors::{
    BikeCadenceData, BikeSpeedData, HeartRateData, SensorDevice, SensorReadings, StrideData,
};
use antbridge::sim::LoopbackTransport;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use uuid::Uuid;

const CENTRAL: &str = "AA:BB:CC:DD:EE:01";

fn engine(transport: &Arc<LoopbackTransport>) -> GattServerEngine {
    GattServerEngine::new(transport.clone(), ServerSettings::default(), Handle::current())
}

fn feed_all_services(engine: &GattServerEngine) {
    engine.update_data(
        ServiceType::Csc,
        SensorDevice {
            device_id: 1,
            device_name: "Wheel".to_string(),
            readings: SensorReadings::BikeSpeed(BikeSpeedData {
                cumulative_wheel_revolutions: 1000,
                last_wheel_event_time: 500,
                ..Default::default()
            }),
        },
    );
    engine.update_data(
        ServiceType::Csc,
        SensorDevice {
            device_id: 2,
            device_name: "Crank".to_string(),
            readings: SensorReadings::BikeCadence(BikeCadenceData {
                cumulative_crank_revolutions: 40,
                crank_event_time: 256,
                ..Default::default()
            }),
        },
    );
    engine.update_data(
        ServiceType::Rsc,
        SensorDevice {
            device_id: 3,
            device_name: "Foot Pod".to_string(),
            readings: SensorReadings::Stride(StrideData {
                speed_mps: 2.5,
                strides_per_minute: 150,
                ..Default::default()
            }),
        },
    );
    engine.update_data(
        ServiceType::HeartRate,
        SensorDevice {
            device_id: 4,
            device_name: "Chest Strap".to_string(),
            readings: SensorReadings::HeartRate(HeartRateData {
                heart_rate: 72,
                timestamp: 0,
            }),
        },
    );

    let mut selection = SelectionMap::new();
    selection.insert(ServiceType::Csc, vec![1, 2]);
    selection.insert(ServiceType::Rsc, vec![3]);
    selection.insert(ServiceType::HeartRate, vec![4]);
    engine.set_selection(selection);
}

fn subscribe_all(transport: &LoopbackTransport) {
    transport.connect(CENTRAL);
    for service in ServiceType::ALL {
        let response = transport.write_client_config(CENTRAL, service, true).unwrap();
        assert_eq!(response.status, GattStatus::Success);
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_start_installs_services_in_order() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);

    engine.start().unwrap();

    assert_eq!(engine.state(), ServerState::Running);
    assert!(transport.is_server_open());
    assert_eq!(
        transport.added_services(),
        vec![CSC_SERVICE_UUID, RSC_SERVICE_UUID, HEART_RATE_SERVICE_UUID]
    );
    assert_eq!(engine.installed_services(), ServiceType::ALL.to_vec());

    let advertisement = transport.advertisement().unwrap();
    assert_eq!(advertisement.local_name, "ANT+ Bridge");
    assert_eq!(advertisement.mode, AdvertiseMode::LowLatency);
    assert!(advertisement.include_tx_power);
    assert!(advertisement.connectable);
    assert_eq!(advertisement.timeout_ms, None);
    assert_eq!(advertisement.service_uuids.len(), 3);

    engine.stop().await;
}

#[tokio::test]
async fn test_next_service_waits_for_confirmation() {
    let transport = Arc::new(LoopbackTransport::new());
    transport.set_auto_confirm(false);
    let engine = engine(&transport);

    engine.start().unwrap();
    assert_eq!(engine.state(), ServerState::Starting);
    assert_eq!(transport.added_services(), vec![CSC_SERVICE_UUID]);

    assert!(transport.confirm_next_service());
    assert_eq!(transport.added_services(), vec![CSC_SERVICE_UUID, RSC_SERVICE_UUID]);
    assert_eq!(engine.installed_services(), vec![ServiceType::Csc]);

    assert!(transport.confirm_next_service());
    assert_eq!(engine.state(), ServerState::Starting);
    assert!(transport.confirm_next_service());
    assert_eq!(engine.state(), ServerState::Running);
    assert!(!transport.confirm_next_service());

    engine.stop().await;
}

#[tokio::test]
async fn test_unsupported_radio_fails_start() {
    let transport = Arc::new(LoopbackTransport::with_radio(RadioState::Unsupported));
    let engine = engine(&transport);

    assert_eq!(engine.start(), Err(GattError::Unsupported));
    assert_eq!(engine.state(), ServerState::Stopped);
    assert!(!transport.is_server_open());
}

#[tokio::test]
async fn test_radio_off_is_enabled_on_start() {
    let transport = Arc::new(LoopbackTransport::with_radio(RadioState::Off));
    let engine = engine(&transport);

    engine.start().unwrap();
    assert_eq!(transport.radio_state(), RadioState::On);
    assert_eq!(engine.state(), ServerState::Running);

    engine.stop().await;
}

#[tokio::test]
async fn test_start_waits_for_radio() {
    let transport = Arc::new(LoopbackTransport::with_radio(RadioState::Off));
    transport.set_auto_enable(false);
    let engine = engine(&transport);

    engine.start().unwrap();
    assert_eq!(engine.state(), ServerState::WaitingForRadio);
    assert!(!transport.is_server_open());

    transport.set_radio(RadioState::On);
    assert_eq!(engine.state(), ServerState::Running);
    assert!(transport.is_server_open());

    engine.stop().await;
}

#[tokio::test]
async fn test_radio_loss_tears_down_and_restarts() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();
    subscribe_all(&transport);
    assert_eq!(engine.subscriber_count(), 1);

    transport.set_radio(RadioState::Off);
    assert_eq!(engine.state(), ServerState::WaitingForRadio);
    assert!(!transport.is_server_open());
    assert!(transport.advertisement().is_none());
    assert_eq!(engine.subscriber_count(), 0);
    assert!(engine.installed_services().is_empty());

    transport.set_radio(RadioState::On);
    assert_eq!(engine.state(), ServerState::Running);
    assert_eq!(transport.added_services().len(), 3);

    engine.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();

    engine.stop().await;
    engine.stop().await;

    assert_eq!(engine.state(), ServerState::Stopped);
    assert!(!transport.is_server_open());
    assert!(!transport.has_listener());
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[tokio::test]
async fn test_subscribe_per_service() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();
    subscribe_all(&transport);

    assert_eq!(engine.subscriptions(CENTRAL), ServiceType::ALL.to_vec());

    transport.write_client_config(CENTRAL, ServiceType::Rsc, false);
    assert_eq!(
        engine.subscriptions(CENTRAL),
        vec![ServiceType::Csc, ServiceType::HeartRate]
    );

    let rsc = transport.read_client_config(CENTRAL, ServiceType::Rsc).unwrap();
    assert_eq!(rsc.value, vec![0x00, 0x00]);
    let csc = transport.read_client_config(CENTRAL, ServiceType::Csc).unwrap();
    assert_eq!(csc.value, vec![0x01, 0x00]);

    transport.write_client_config(CENTRAL, ServiceType::Csc, false);
    transport.write_client_config(CENTRAL, ServiceType::HeartRate, false);
    assert_eq!(engine.subscriber_count(), 0);

    engine.stop().await;
}

#[tokio::test]
async fn test_unknown_config_value_is_acknowledged() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();

    transport.fire(GattEvent::DescriptorWriteRequest {
        central: CENTRAL.to_string(),
        request_id: 900,
        characteristic: HEART_RATE_MEASUREMENT_UUID,
        descriptor: CLIENT_CONFIG_UUID,
        response_needed: true,
        offset: 0,
        value: vec![0x02, 0x00],
    });

    assert_eq!(engine.subscriber_count(), 0);
    let response = transport.response(900).unwrap();
    assert_eq!(response.status, GattStatus::Success);
    let read = transport.read_client_config(CENTRAL, ServiceType::HeartRate).unwrap();
    assert_eq!(read.value, vec![0x00, 0x00]);

    engine.stop().await;
}

#[tokio::test]
async fn test_disconnect_drops_subscriptions() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();
    subscribe_all(&transport);

    transport.disconnect(CENTRAL);
    assert_eq!(engine.subscriber_count(), 0);
    assert!(engine.subscriptions(CENTRAL).is_empty());

    engine.stop().await;
}

// =============================================================================
// Characteristic Read Tests
// =============================================================================

#[tokio::test]
async fn test_feature_reads() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();

    let csc = transport.read_characteristic(CENTRAL, CSC_FEATURE_UUID).unwrap();
    assert_eq!(csc.status, GattStatus::Success);
    assert_eq!(csc.value, vec![0x03, 0x00]);

    let rsc = transport.read_characteristic(CENTRAL, RSC_MEASUREMENT_UUID).unwrap();
    assert_eq!(rsc.value, vec![0x00]);

    let hr = transport
        .read_characteristic(CENTRAL, HEART_RATE_MEASUREMENT_UUID)
        .unwrap();
    assert_eq!(hr.status, GattStatus::Success);
    assert!(hr.value.is_empty());

    let unknown = transport
        .read_characteristic(CENTRAL, CLIENT_CONFIG_UUID)
        .unwrap();
    assert_eq!(unknown.status, GattStatus::Failure);

    engine.stop().await;
}

// =============================================================================
// Notification Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_periodic_notifications() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();
    feed_all_services(&engine);
    subscribe_all(&transport);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(transport.take_notifications().is_empty());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let sent = transport.take_notifications();
    assert_eq!(sent.len(), 3);

    assert_eq!(sent[0].characteristic, CSC_MEASUREMENT_UUID);
    assert_eq!(
        sent[0].value,
        vec![0x03, 0xE8, 0x03, 0x00, 0x00, 0xF4, 0x01, 0x28, 0x00, 0x00, 0x01]
    );
    assert_eq!(sent[1].characteristic, RSC_MEASUREMENT_UUID);
    assert_eq!(sent[1].value, vec![0x00, 0x80, 0x02, 0x96]);
    assert_eq!(sent[2].characteristic, HEART_RATE_MEASUREMENT_UUID);
    assert_eq!(sent[2].value, vec![0x00, 0x48]);
    assert!(sent.iter().all(|n| n.central == CENTRAL));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(transport.take_notifications().len(), 3);

    engine.stop().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(transport.take_notifications().is_empty());
}

#[tokio::test]
async fn test_only_selected_devices_are_encoded() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();
    feed_all_services(&engine);
    subscribe_all(&transport);

    let mut selection = SelectionMap::new();
    selection.insert(ServiceType::Csc, vec![2]);
    engine.set_selection(selection);

    assert_eq!(engine.notify_subscribers(), 1);
    let sent = transport.take_notifications();
    assert_eq!(sent[0].value, vec![0x02, 0x28, 0x00, 0x00, 0x01]);
    assert_eq!(engine.supported_features(ServiceType::Csc), Some(vec![0x02, 0x00]));

    engine.stop().await;
}

#[tokio::test]
async fn test_encode_error_skips_service() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();
    feed_all_services(&engine);
    engine.update_data(
        ServiceType::HeartRate,
        SensorDevice {
            device_id: 5,
            device_name: "Second Strap".to_string(),
            readings: SensorReadings::HeartRate(HeartRateData {
                heart_rate: 90,
                timestamp: 0,
            }),
        },
    );
    let mut selection = SelectionMap::new();
    selection.insert(ServiceType::Rsc, vec![3]);
    selection.insert(ServiceType::HeartRate, vec![4, 5]);
    engine.set_selection(selection);
    subscribe_all(&transport);

    assert_eq!(engine.notify_subscribers(), 1);
    let sent = transport.take_notifications();
    assert_eq!(sent[0].characteristic, RSC_MEASUREMENT_UUID);

    engine.stop().await;
}

#[tokio::test]
async fn test_unsubscribed_services_are_not_sent() {
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(&transport);
    engine.start().unwrap();
    feed_all_services(&engine);

    transport.connect(CENTRAL);
    transport.write_client_config(CENTRAL, ServiceType::HeartRate, true);
    transport.write_client_config("AA:BB:CC:DD:EE:02", ServiceType::Csc, true);

    assert_eq!(engine.notify_subscribers(), 2);
    let sent = transport.take_notifications();
    let hr: Vec<_> = sent.iter().filter(|n| n.central == CENTRAL).collect();
    assert_eq!(hr.len(), 1);
    assert_eq!(hr[0].characteristic, HEART_RATE_MEASUREMENT_UUID);

    engine.stop().await;
}

// =============================================================================
// Stop Barrier
// =============================================================================

/// Loopback transport whose notify blocks for a while, like a congested
/// radio queue.
struct SlowNotifyTransport {
    inner: Arc<LoopbackTransport>,
    delay: Duration,
    in_flight: AtomicBool,
    completed: AtomicUsize,
}

impl GattTransport for SlowNotifyTransport {
    fn radio_state(&self) -> RadioState {
        self.inner.radio_state()
    }

    fn enable_radio(&self) -> Result<(), GattError> {
        self.inner.enable_radio()
    }

    fn set_listener(&self, listener: Option<Arc<dyn GattEventListener>>) {
        self.inner.set_listener(listener)
    }

    fn open_server(&self) -> Result<(), GattError> {
        self.inner.open_server()
    }

    fn close_server(&self) {
        self.inner.close_server()
    }

    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), GattError> {
        self.inner.start_advertising(advertisement)
    }

    fn stop_advertising(&self) {
        self.inner.stop_advertising()
    }

    fn add_service(&self, service: &GattServiceDefinition) -> Result<(), GattError> {
        self.inner.add_service(service)
    }

    fn notify(&self, central: &CentralId, characteristic: Uuid, value: &[u8]) -> Result<(), GattError> {
        self.in_flight.store(true, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let result = self.inner.notify(central, characteristic, value);
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn send_response(
        &self,
        central: &CentralId,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: &[u8],
    ) -> Result<(), GattError> {
        self.inner
            .send_response(central, request_id, status, offset, value)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_waits_for_notification_pass() {
    let loopback = Arc::new(LoopbackTransport::new());
    let transport = Arc::new(SlowNotifyTransport {
        inner: loopback.clone(),
        delay: Duration::from_millis(300),
        in_flight: AtomicBool::new(false),
        completed: AtomicUsize::new(0),
    });
    let settings = ServerSettings {
        notify_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let engine = GattServerEngine::new(transport.clone(), settings, Handle::current());
    engine.start().unwrap();
    feed_all_services(&engine);
    loopback.connect(CENTRAL);
    loopback.write_client_config(CENTRAL, ServiceType::HeartRate, true);

    let mut waited = Duration::ZERO;
    while !transport.in_flight.load(Ordering::SeqCst) {
        assert!(waited < Duration::from_secs(5), "notification loop never ran");
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += Duration::from_millis(5);
    }

    engine.stop().await;
    assert!(!transport.in_flight.load(Ordering::SeqCst));
    assert!(!loopback.is_server_open());

    let completed = transport.completed.load(Ordering::SeqCst);
    assert!(completed >= 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.completed.load(Ordering::SeqCst), completed);
    assert!(!transport.in_flight.load(Ordering::SeqCst));
}
