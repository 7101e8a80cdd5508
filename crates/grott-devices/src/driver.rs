//! Pairing flow for new Grott devices.
//!
//! The host drives an interactive session: the user fills in broker details,
//! [`GrottDriver::test_pairing`] checks them against the broker and, on
//! success, moves the session on to the device list built by
//! [`GrottDriver::list_devices`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::capability::CapabilitySink;
use crate::connector::BrokerConnector;
use crate::device::GrottDevice;
use crate::error::DriverResult;
use crate::settings::{ConnectionSettings, Protocol};

/// Name given to paired devices.
pub const DEVICE_NAME: &str = "Grott MQTT";

const MISSING_FIELDS_MESSAGE: &str = "Missing host, port or topic values";

/// Host-side pairing session.
#[async_trait]
pub trait PairingSession: Send + Sync {
    /// Advance the pairing UI to its next step.
    async fn next_view(&self) -> DriverResult<()>;
}

/// Values submitted by the pairing form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairingForm {
    #[serde(default)]
    pub host: Option<String>,
    /// Number or numeric string
    #[serde(default)]
    pub port: Option<Value>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default, alias = "validateCertificate")]
    pub validate_certificate: Option<bool>,
}

impl PairingForm {
    fn has_required_fields(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        let port_filled = match &self.port {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Number(_)) => true,
            _ => false,
        };
        filled(&self.host) && port_filled && filled(&self.topic)
    }

    /// Convert the form into connection settings.
    pub fn to_settings(&self) -> Result<ConnectionSettings, String> {
        let host = self.host.clone().unwrap_or_default();
        let port = match &self.port {
            Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
            _ => None,
        }
        .filter(|p| *p != 0)
        .ok_or_else(|| format!("Invalid port: {}", self.port.clone().unwrap_or(Value::Null)))?;

        let mut settings = ConnectionSettings::new(host)
            .with_port(port)
            .with_topic(self.topic.clone().unwrap_or_default());

        settings.username = self.username.clone().filter(|s| !s.is_empty());
        settings.password = self.password.clone().filter(|s| !s.is_empty());

        if let Some(protocol) = self.protocol.as_deref().filter(|p| !p.is_empty()) {
            settings.protocol = protocol.parse::<Protocol>().map_err(|e| e.to_string())?;
        }
        if let Some(validate) = self.validate_certificate {
            settings.validate_certificate = validate;
        }

        Ok(settings)
    }
}

/// Answer returned to the pairing form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PairingResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceData {
    pub id: String,
}

/// Device offered to the host at the end of pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub data: DeviceData,
    pub settings: ConnectionSettings,
}

/// Unique id of a device: `user:pass@host:port/topic`.
pub fn device_id(settings: &ConnectionSettings) -> String {
    format!(
        "{}:{}@{}:{}/{}",
        settings.username.as_deref().unwrap_or_default(),
        settings.password.as_deref().unwrap_or_default(),
        settings.host,
        settings.port,
        settings.topic
    )
}

/// Driver for Grott gateways: pairing and device creation.
pub struct GrottDriver {
    connector: Arc<dyn BrokerConnector>,
    /// Settings of the last successful connection test
    paired: RwLock<Option<ConnectionSettings>>,
}

impl GrottDriver {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        info!("GrottDriver has been initialized");
        Self {
            connector,
            paired: RwLock::new(None),
        }
    }

    /// Test the submitted broker details.
    ///
    /// Never fails: every problem is reported through the result.
    pub async fn test_pairing(
        &self,
        form: &PairingForm,
        session: &dyn PairingSession,
    ) -> PairingResult {
        if !form.has_required_fields() {
            return PairingResult::failed(MISSING_FIELDS_MESSAGE);
        }

        let settings = match form.to_settings() {
            Ok(settings) => settings,
            Err(message) => return PairingResult::failed(message),
        };

        info!("Connecting to broker at {}", settings.broker_addr());
        if let Err(e) = self.connector.probe(&settings).await {
            warn!("Failed to connect with error: {}", e);
            return PairingResult::failed(e.to_string());
        }

        *self.paired.write().await = Some(settings);

        if let Err(e) = session.next_view().await {
            warn!("Pairing session did not advance: {}", e);
            return PairingResult::failed(e.to_string());
        }

        PairingResult::ok()
    }

    /// Devices available for pairing: the one whose settings were tested.
    pub async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        match self.paired.read().await.as_ref() {
            Some(settings) => vec![DeviceDescriptor {
                name: DEVICE_NAME.to_string(),
                data: DeviceData {
                    id: device_id(settings),
                },
                settings: settings.clone(),
            }],
            None => Vec::new(),
        }
    }

    /// Instantiate a device from a pairing descriptor.
    pub fn create_device(
        &self,
        descriptor: &DeviceDescriptor,
        sink: Arc<dyn CapabilitySink>,
    ) -> GrottDevice {
        GrottDevice::new(
            descriptor.name.clone(),
            descriptor.settings.clone(),
            sink,
            self.connector.clone(),
        )
    }
}
