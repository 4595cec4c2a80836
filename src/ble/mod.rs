//! BLE peripheral side: service table, measurement codecs, the transport
//! abstraction and the GATT server engine.

pub mod codec;
pub mod server;
pub mod services;
pub mod transport;

pub use codec::{CodecError, ServiceCodec};
pub use server::{GattServerEngine, ServerSettings, ServerState};
pub use services::{ServiceDescriptor, ServiceType, SERVICE_TABLE};
pub use transport::{GattError, GattEvent, GattEventListener, GattTransport, RadioState};
