//! Grott inverter bridge.
//!
//! Bridges the JSON telemetry that a Grott gateway publishes over MQTT into a
//! device/capability model.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | rumqttc broker connector |
//!
//! ## Architecture
//!
//! - **FieldMapper**: fixed table of telemetry field → capability translations
//! - **CapabilitySink**: capability storage supplied by the host platform
//! - **BrokerConnector**: opens broker sessions (rumqttc in production)
//! - **GrottDevice**: owns one session, caches the last packet, resets the daily counter
//! - **GrottDriver**: pairing flow that validates broker details and offers a device

pub mod capability;
pub mod connector;
pub mod device;
pub mod driver;
pub mod error;
pub mod mapping;
pub mod packet;
pub mod settings;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use capability::{CapabilitySink, CapabilityValue, MemoryCapabilitySink};
pub use connector::{BrokerConnector, BrokerSession, ConnectionStatus, MessageHandler};
pub use device::{ConnectionManager, GrottDevice, TelemetryProcessor};
pub use driver::{
    DeviceData, DeviceDescriptor, GrottDriver, PairingForm, PairingResult, PairingSession,
    DEVICE_NAME,
};
pub use error::{DriverError, DriverResult};
pub use mapping::{grott_mappings, FieldError, FieldMapper, MappingEntry, MappingReport};
pub use packet::{TelemetryPacket, ENERGY_TODAY_FIELD};
pub use settings::{ConnectionSettings, Protocol, DEFAULT_PORT, DEFAULT_TOPIC};

#[cfg(feature = "mqtt")]
pub use mqtt::RumqttConnector;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
