//! Settings loading: TOML file first, command-line flags on top.
//!
//! ```toml
//! name = "Roof inverter"
//!
//! [mqtt]
//! host = "broker.local"
//! port = 1883
//! topic = "energy/growatt"
//! protocol = "mqtt"
//! ```

use anyhow::{Context, Result};
use clap::Args;
use grott_devices::{ConnectionSettings, DEVICE_NAME};
use serde::Deserialize;
use std::path::Path;

/// Environment variable switching log output to JSON.
pub const LOG_JSON_ENV: &str = "GROTT_LOG_JSON";

/// Broker flags; each one overrides the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct BrokerArgs {
    /// Broker host.
    #[arg(long)]
    pub host: Option<String>,
    /// Broker port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Topic the gateway publishes to.
    #[arg(long)]
    pub topic: Option<String>,
    /// Broker username.
    #[arg(long)]
    pub username: Option<String>,
    /// Broker password.
    #[arg(long)]
    pub password: Option<String>,
    /// Transport: mqtt, mqtts, ws or wss.
    #[arg(long)]
    pub protocol: Option<String>,
    /// Skip TLS certificate validation.
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    name: Option<String>,
    #[serde(default)]
    mqtt: toml::Table,
}

/// Fully resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub name: String,
    pub settings: ConnectionSettings,
}

impl CliConfig {
    /// Load `path` (if it exists) and apply `args`.
    ///
    /// A missing file is only an error when it was given explicitly.
    pub fn load(path: &Path, explicit: bool, args: &BrokerArgs) -> Result<Self> {
        let file = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str::<FileConfig>(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        } else if explicit {
            anyhow::bail!("config file {} not found", path.display());
        } else {
            FileConfig::default()
        };

        Self::from_parts(file.name, file.mqtt, args)
    }

    fn from_parts(name: Option<String>, mut mqtt: toml::Table, args: &BrokerArgs) -> Result<Self> {
        let overrides = [
            ("host", args.host.clone().map(toml::Value::String)),
            ("port", args.port.map(|p| toml::Value::Integer(i64::from(p)))),
            ("topic", args.topic.clone().map(toml::Value::String)),
            ("username", args.username.clone().map(toml::Value::String)),
            ("password", args.password.clone().map(toml::Value::String)),
            ("protocol", args.protocol.clone().map(toml::Value::String)),
            ("validate_certificate", args.insecure.then_some(toml::Value::Boolean(false))),
        ];
        if args.insecure {
            mqtt.remove("validateCertificate");
        }
        for (key, value) in overrides {
            if let Some(value) = value {
                mqtt.insert(key.to_string(), value);
            }
        }

        if !mqtt.contains_key("host") {
            anyhow::bail!("broker host missing: pass --host or set [mqtt] host in the config file");
        }
        if let Some(toml::Value::String(protocol)) = mqtt.get("protocol") {
            let normalized = protocol
                .parse::<grott_devices::Protocol>()
                .map_err(|e| anyhow::anyhow!("{}", e))?
                .to_string();
            mqtt.insert("protocol".to_string(), toml::Value::String(normalized));
        }

        let settings: ConnectionSettings = toml::Value::Table(mqtt)
            .try_into()
            .context("invalid [mqtt] settings")?;
        settings
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        Ok(Self {
            name: name.unwrap_or_else(|| DEVICE_NAME.to_string()),
            settings,
        })
    }
}
