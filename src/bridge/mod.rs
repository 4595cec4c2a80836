//! Bridge orchestration: device registry, selection and connector wiring.

pub mod orchestrator;
pub mod selection;

pub use orchestrator::{AntBleBridge, BridgeError, BridgeEvent, ConnectorSummary};
pub use selection::{Registry, SelectionMap};
