//! Telemetry packets published by the Grott gateway.
//!
//! ```text
//! {
//!   "device": "NTCRBLR00Y",
//!   "time": "2024-06-01T12:00:00",
//!   "values": { "pvpowerout": 12345, "pvenergytoday": 543, ... }
//! }
//! ```
//!
//! Only `values` is interpreted. Every other top-level field is retained so
//! a packet can be republished exactly as it was received.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DriverResult;

/// Source field holding the daily energy counter.
pub const ENERGY_TODAY_FIELD: &str = "pvenergytoday";

const VALUES_FIELD: &str = "values";

/// A decoded telemetry packet.
///
/// The top-level object is kept whole, in the order the gateway sent it.
/// `values`, when present, is always an object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct TelemetryPacket {
    fields: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for TelemetryPacket {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        match fields.get(VALUES_FIELD) {
            None | Some(Value::Object(_)) => Ok(Self { fields }),
            Some(other) => Err(format!("values must be an object, got {}", other)),
        }
    }
}

impl From<TelemetryPacket> for Map<String, Value> {
    fn from(packet: TelemetryPacket) -> Self {
        packet.fields
    }
}

impl TelemetryPacket {
    /// Decode a packet from a raw MQTT payload.
    pub fn from_slice(payload: &[u8]) -> DriverResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encode the packet for publishing.
    pub fn to_vec(&self) -> DriverResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Field name -> raw reading.
    pub fn values(&self) -> Option<&Map<String, Value>> {
        self.fields.get(VALUES_FIELD).and_then(Value::as_object)
    }

    /// Any top-level field, as sent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Gateway device identifier.
    pub fn device(&self) -> Option<&str> {
        self.field("device").and_then(Value::as_str)
    }

    /// Gateway timestamp, as sent.
    pub fn time(&self) -> Option<&str> {
        self.field("time").and_then(Value::as_str)
    }

    /// Look up a single reading.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values().and_then(|values| values.get(field))
    }

    /// Zero the daily energy counter, creating `values` if the packet has none.
    ///
    /// The counter keeps its position when it already exists.
    pub fn reset_energy_today(&mut self) {
        let values = self
            .fields
            .entry(VALUES_FIELD)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(values) = values.as_object_mut() {
            values.insert(ENERGY_TODAY_FIELD.to_string(), Value::from(0));
        }
    }
}
