//! ANT+ to BLE Bridge
//!
//! Demo entry point. Runs the bridge against the simulated ANT+ plugin and
//! the recording BLE transport, with one central subscribed to every
//! service. Bridge events and sent notifications are printed to stdout as
//! JSON lines; logs go to stderr.

use anyhow::Context;
use antbridge::ble::services::ServiceType;
use antbridge::sim::{LoopbackTransport, SimulatedAntPlugin};
use antbridge::{AntBleBridge, SensorKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Period of simulated sensor broadcasts
const SENSOR_PERIOD: Duration = Duration::from_millis(500);

const DEMO_CENTRAL: &str = "00:11:22:33:44:55";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = antbridge::config::load_config().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting antbridge v{}", env!("CARGO_PKG_VERSION"));

    let plugin = Arc::new(SimulatedAntPlugin::new());
    let transport = Arc::new(LoopbackTransport::new());
    let bridge = AntBleBridge::new(
        plugin.clone(),
        transport.clone(),
        &config,
        tokio::runtime::Handle::current(),
    );
    let events = bridge.event_receiver();

    bridge.startup().await.context("Failed to start bridge")?;

    plugin.add_combined_sensor(12345, "Bike Speed/Cadence");
    plugin.add_sensor(SensorKind::Stride, 23456, "Foot Pod");
    plugin.add_sensor(SensorKind::HeartRate, 34567, "Chest Strap");

    transport.connect(DEMO_CENTRAL);
    for service in ServiceType::ALL {
        transport.write_client_config(DEMO_CENTRAL, service, true);
    }

    let started = chrono::Utc::now();
    let mut ticker = tokio::time::interval(SENSOR_PERIOD);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {
                let now_ms = (chrono::Utc::now() - started).num_milliseconds();
                plugin.tick(now_ms);

                for event in events.try_iter() {
                    print_line(&event);
                }
                for notification in transport.take_notifications() {
                    print_line(&serde_json::json!({
                        "event": "notification",
                        "data": notification,
                    }));
                }
            }
        }
    }

    tracing::info!("Shutting down");
    bridge.stop().await;
    for event in events.try_iter() {
        print_line(&event);
    }

    Ok(())
}

fn print_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::error!("Failed to serialize output: {}", e),
    }
}
