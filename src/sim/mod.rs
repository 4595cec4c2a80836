//! In-process stand-ins for the vendor ANT+ plugin and the BLE stack.
//!
//! Used by the test suites and by the demo binary.

pub mod ant;
pub mod gatt;

pub use ant::SimulatedAntPlugin;
pub use gatt::{LoopbackTransport, Notification, Response};
