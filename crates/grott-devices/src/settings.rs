//! Broker connection settings.
//!
//! Settings arrive from the host (device settings or the pairing form), so
//! deserialization is lenient: the port may be a number or a numeric string,
//! and empty credentials count as absent.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DriverError, DriverResult};

/// Default broker port.
pub const DEFAULT_PORT: u16 = 1883;
/// Default topic published by the Grott gateway.
pub const DEFAULT_TOPIC: &str = "energy/growatt";

/// Transport used to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain TCP
    #[default]
    Mqtt,
    /// TLS over TCP
    Mqtts,
    /// WebSocket
    Ws,
    /// WebSocket over TLS
    Wss,
}

impl Protocol {
    /// Whether the transport is encrypted.
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Mqtts | Self::Wss)
    }

    /// URL scheme for this transport.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Mqtt => "mqtt",
            Self::Mqtts => "mqtts",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Ok(Self::Mqtt),
            "mqtts" | "ssl" | "tls" => Ok(Self::Mqtts),
            "ws" => Ok(Self::Ws),
            "wss" => Ok(Self::Wss),
            other => Err(DriverError::Configuration(format!(
                "Unsupported protocol: {}",
                other
            ))),
        }
    }
}

/// Connection settings for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Broker host name or address
    pub host: String,

    /// Broker port
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,

    /// Topic carrying the gateway's JSON packets
    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default, deserialize_with = "deserialize_optional_string", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, deserialize_with = "deserialize_optional_string", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default)]
    pub protocol: Protocol,

    /// Verify the broker's TLS certificate (secure protocols only)
    #[serde(default = "default_validate_certificate", alias = "validateCertificate")]
    pub validate_certificate: bool,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_validate_certificate() -> bool {
    true
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u64),
    Text(String),
}

fn deserialize_port<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    let port = match PortValue::deserialize(d)? {
        PortValue::Number(n) => n,
        PortValue::Text(s) if s.trim().is_empty() => return Ok(DEFAULT_PORT),
        PortValue::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {}", s)))?,
    };
    u16::try_from(port).map_err(|_| serde::de::Error::custom(format!("port out of range: {}", port)))
}

fn deserialize_optional_string<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.filter(|s| !s.is_empty()))
}

impl ConnectionSettings {
    /// Create settings for `host` with all defaults.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            topic: default_topic(),
            username: None,
            password: None,
            protocol: Protocol::default(),
            validate_certificate: true,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_validate_certificate(mut self, validate: bool) -> Self {
        self.validate_certificate = validate;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// `host:port`
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full broker URL, e.g. `mqtts://broker.local:8883`.
    pub fn broker_url(&self) -> String {
        format!("{}://{}", self.protocol, self.broker_addr())
    }

    /// Check that the settings can be used to connect.
    pub fn validate(&self) -> DriverResult<()> {
        if self.host.trim().is_empty() {
            return Err(DriverError::Configuration("host is required".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(DriverError::Configuration("topic is required".to_string()));
        }
        if self.port == 0 {
            return Err(DriverError::Configuration("port must not be 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings: ConnectionSettings = serde_json::from_value(json!({"host": "broker"})).unwrap();

        assert_eq!(settings.port, 1883);
        assert_eq!(settings.topic, "energy/growatt");
        assert_eq!(settings.protocol, Protocol::Mqtt);
        assert!(settings.validate_certificate);
        assert!(settings.username.is_none());
        assert_eq!(settings, ConnectionSettings::new("broker"));
    }

    #[test]
    fn test_form_values() {
        let settings: ConnectionSettings = serde_json::from_value(json!({
            "host": "broker",
            "port": "8883",
            "topic": "grott/data",
            "username": "",
            "password": "secret",
            "protocol": "mqtts",
            "validateCertificate": false
        }))
        .unwrap();

        assert_eq!(settings.port, 8883);
        assert_eq!(settings.topic, "grott/data");
        assert!(settings.username.is_none());
        assert_eq!(settings.password.as_deref(), Some("secret"));
        assert_eq!(settings.protocol, Protocol::Mqtts);
        assert!(!settings.validate_certificate);
        assert_eq!(settings.broker_url(), "mqtts://broker:8883");
    }

    #[test]
    fn test_invalid_port() {
        assert!(serde_json::from_value::<ConnectionSettings>(json!({"host": "b", "port": "abc"})).is_err());
        assert!(serde_json::from_value::<ConnectionSettings>(json!({"host": "b", "port": 70000})).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionSettings::new("broker").validate().is_ok());
        assert!(ConnectionSettings::new("").validate().is_err());
        assert!(ConnectionSettings::new("broker").with_topic(" ").validate().is_err());
        assert!(ConnectionSettings::new("broker").with_port(0).validate().is_err());
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("MQTT".parse::<Protocol>().unwrap(), Protocol::Mqtt);
        assert_eq!("ssl".parse::<Protocol>().unwrap(), Protocol::Mqtts);
        assert_eq!("wss".parse::<Protocol>().unwrap(), Protocol::Wss);
        assert!("http".parse::<Protocol>().is_err());
        assert!(Protocol::Wss.is_secure());
        assert!(!Protocol::Ws.is_secure());
    }
}
