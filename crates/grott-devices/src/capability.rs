//! Capability model and the sink the host platform implements.
//!
//! A capability is a named, typed device property such as `measure_power` or
//! `measure_voltage.grid1`. The driver never owns capability storage: it writes
//! through a [`CapabilitySink`] provided by whatever platform embeds it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::DriverResult;

/// Value stored in a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Anything that is not a scalar (arrays, objects, null)
    Json(Value),
}

impl CapabilityValue {
    /// Get the numeric value, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the text value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Value> for CapabilityValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(Self::Number)
                .unwrap_or_else(|| Self::Json(value.clone())),
            Value::String(s) => Self::Text(s.clone()),
            Value::Bool(b) => Self::Boolean(*b),
            other => Self::Json(other.clone()),
        }
    }
}

impl From<f64> for CapabilityValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for CapabilityValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl std::fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

/// Capability storage implemented by the host platform.
///
/// The driver only ever adds capabilities; removal is left to the host.
#[async_trait]
pub trait CapabilitySink: Send + Sync {
    /// Check whether the device already exposes `capability`.
    async fn has_capability(&self, capability: &str) -> bool;

    /// Register `capability` on the device.
    async fn add_capability(&self, capability: &str) -> DriverResult<()>;

    /// Read the current value of `capability`.
    async fn capability_value(&self, capability: &str) -> Option<CapabilityValue>;

    /// Store a new value for `capability`.
    async fn set_capability_value(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> DriverResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Registration order
    capabilities: Vec<String>,
    values: HashMap<String, CapabilityValue>,
    writes: Vec<(String, CapabilityValue)>,
}

/// In-process capability store.
///
/// [`MemoryCapabilitySink::new`] keeps current values only. A sink built with
/// [`MemoryCapabilitySink::recording`] also keeps every write in order, for
/// asserting on write history in tests.
#[derive(Debug, Default)]
pub struct MemoryCapabilitySink {
    state: RwLock<MemoryState>,
    record_writes: bool,
}

impl MemoryCapabilitySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that also records its write history.
    pub fn recording() -> Self {
        Self {
            state: RwLock::default(),
            record_writes: true,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.record_writes
    }

    /// Registered capabilities in registration order.
    pub async fn capabilities(&self) -> Vec<String> {
        self.state.read().await.capabilities.clone()
    }

    /// All writes received so far, oldest first. Empty unless recording.
    pub async fn writes(&self) -> Vec<(String, CapabilityValue)> {
        self.state.read().await.writes.clone()
    }

    /// Writes received for a single capability, oldest first.
    pub async fn writes_for(&self, capability: &str) -> Vec<CapabilityValue> {
        self.state
            .read()
            .await
            .writes
            .iter()
            .filter(|(name, _)| name == capability)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Snapshot of the current values.
    pub async fn snapshot(&self) -> HashMap<String, CapabilityValue> {
        self.state.read().await.values.clone()
    }

    /// Forget recorded writes, keeping capabilities and values.
    pub async fn clear_writes(&self) {
        self.state.write().await.writes.clear();
    }
}

#[async_trait]
impl CapabilitySink for MemoryCapabilitySink {
    async fn has_capability(&self, capability: &str) -> bool {
        self.state
            .read()
            .await
            .capabilities
            .iter()
            .any(|c| c == capability)
    }

    async fn add_capability(&self, capability: &str) -> DriverResult<()> {
        let mut state = self.state.write().await;
        if !state.capabilities.iter().any(|c| c == capability) {
            state.capabilities.push(capability.to_string());
        }
        Ok(())
    }

    async fn capability_value(&self, capability: &str) -> Option<CapabilityValue> {
        self.state.read().await.values.get(capability).cloned()
    }

    async fn set_capability_value(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> DriverResult<()> {
        let mut state = self.state.write().await;
        if self.record_writes {
            state.writes.push((capability.to_string(), value.clone()));
        }
        state.values.insert(capability.to_string(), value);
        Ok(())
    }
}
