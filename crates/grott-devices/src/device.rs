//! Grott device: one broker connection feeding one capability sink.
//!
//! ```text
//! broker ──publish──→ TelemetryProcessor ──parse──→ FieldMapper ──→ CapabilitySink
//!    ↑                      │ last packet
//!    └──── republish ───────┘ (reset_energy_today)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::capability::CapabilitySink;
use crate::connector::{BrokerConnector, BrokerSession, ConnectionStatus, MessageHandler};
use crate::error::{DriverError, DriverResult};
use crate::mapping::{FieldMapper, MappingReport};
use crate::packet::TelemetryPacket;
use crate::settings::ConnectionSettings;

/// Decodes inbound packets and applies them to the capability sink.
pub struct TelemetryProcessor {
    mapper: FieldMapper,
    sink: Arc<dyn CapabilitySink>,
    /// Most recent packet, kept for the reset action
    last_packet: RwLock<Option<TelemetryPacket>>,
    status: RwLock<ConnectionStatus>,
    last_seen: RwLock<Option<DateTime<Utc>>>,
}

impl TelemetryProcessor {
    pub fn new(mapper: FieldMapper, sink: Arc<dyn CapabilitySink>) -> Self {
        Self {
            mapper,
            sink,
            last_packet: RwLock::new(None),
            status: RwLock::new(ConnectionStatus::Disconnected),
            last_seen: RwLock::new(None),
        }
    }

    pub fn mapper(&self) -> &FieldMapper {
        &self.mapper
    }

    pub fn sink(&self) -> &Arc<dyn CapabilitySink> {
        &self.sink
    }

    /// Decode one payload, remember it and map it onto capabilities.
    pub async fn process_payload(&self, payload: &[u8]) -> DriverResult<MappingReport> {
        let packet = TelemetryPacket::from_slice(payload)?;

        *self.last_packet.write().await = Some(packet.clone());
        *self.last_seen.write().await = Some(Utc::now());

        self.mapper.parse_data(&packet, self.sink.as_ref()).await
    }

    pub async fn last_packet(&self) -> Option<TelemetryPacket> {
        self.last_packet.read().await.clone()
    }

    pub async fn clear_last_packet(&self) {
        *self.last_packet.write().await = None;
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    pub async fn last_seen(&self) -> Option<DateTime<Utc>> {
        *self.last_seen.read().await
    }
}

#[async_trait]
impl MessageHandler for TelemetryProcessor {
    async fn handle_message(&self, topic: &str, payload: &[u8]) {
        match self.process_payload(payload).await {
            Ok(report) => {
                debug!(
                    "Packet from {} mapped: {} written, {} absent, {} invalid",
                    topic,
                    report.written.len(),
                    report.skipped.len(),
                    report.errors.len()
                );
            }
            Err(DriverError::Parse(e)) => {
                warn!("Dropping malformed packet from {}: {}", topic, e);
            }
            Err(e) => {
                error!("Failed to process packet from {}: {}", topic, e);
            }
        }
    }

    async fn status_changed(&self, status: ConnectionStatus) {
        *self.status.write().await = status;
    }
}

/// Owns the single broker session of a device.
///
/// Replacing the session happens under one lock: the old session is closed
/// before the new one is opened, so two sessions are never open at once.
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    session: Mutex<Option<Box<dyn BrokerSession>>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            session: Mutex::new(None),
        }
    }

    /// Close any open session and open a new one for `settings`.
    pub async fn connect(
        &self,
        settings: &ConnectionSettings,
        handler: Arc<dyn MessageHandler>,
    ) -> DriverResult<()> {
        settings.validate()?;

        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            old.close().await;
        }

        *session = Some(self.connector.open(settings, handler).await?);
        Ok(())
    }

    /// Close the open session, if any.
    pub async fn disconnect(&self) {
        if let Some(old) = self.session.lock().await.take() {
            old.close().await;
        }
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> DriverResult<()> {
        let session = self.session.lock().await;
        match session.as_ref() {
            Some(session) if session.is_open() => session.publish(topic, payload).await,
            _ => Err(DriverError::NotConnected),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| session.is_open())
    }
}

/// A paired Grott gateway.
pub struct GrottDevice {
    name: RwLock<String>,
    settings: RwLock<ConnectionSettings>,
    processor: Arc<TelemetryProcessor>,
    connection: ConnectionManager,
}

impl GrottDevice {
    /// Create a device using the built-in mapping table.
    pub fn new(
        name: impl Into<String>,
        settings: ConnectionSettings,
        sink: Arc<dyn CapabilitySink>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self::with_mapper(name, settings, FieldMapper::default(), sink, connector)
    }

    pub fn with_mapper(
        name: impl Into<String>,
        settings: ConnectionSettings,
        mapper: FieldMapper,
        sink: Arc<dyn CapabilitySink>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self {
            name: RwLock::new(name.into()),
            settings: RwLock::new(settings),
            processor: Arc::new(TelemetryProcessor::new(mapper, sink)),
            connection: ConnectionManager::new(connector),
        }
    }

    /// Register capabilities and connect to the broker.
    pub async fn init(&self) -> DriverResult<()> {
        info!("{} has been initialized", self.name.read().await);
        self.processor
            .mapper()
            .configure_mappings(self.processor.sink().as_ref())
            .await?;
        self.connect().await
    }

    /// Store new settings and reconnect with them.
    pub async fn apply_settings(&self, settings: ConnectionSettings) -> DriverResult<()> {
        info!("{} settings were changed", self.name.read().await);
        *self.settings.write().await = settings;
        self.connect().await
    }

    pub async fn added(&self) {
        info!("{} has been added", self.name.read().await);
    }

    pub async fn renamed(&self, name: impl Into<String>) {
        let name = name.into();
        info!("{} was renamed to {}", self.name.read().await, name);
        *self.name.write().await = name;
    }

    /// Close the connection, keeping the cached packet.
    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
        info!("{} has been stopped", self.name.read().await);
    }

    /// Close the connection and drop the cached packet.
    pub async fn deleted(&self) {
        self.connection.disconnect().await;
        self.processor.clear_last_packet().await;
        info!("{} has been deleted", self.name.read().await);
    }

    /// Zero the daily energy counter of the last packet and republish it.
    ///
    /// Returns `Ok(false)` when no packet has been received yet.
    pub async fn reset_energy_today(&self) -> DriverResult<bool> {
        let payload = {
            let mut last_packet = self.processor.last_packet.write().await;
            let Some(packet) = last_packet.as_mut() else {
                debug!("No packet received yet, nothing to reset");
                return Ok(false);
            };
            packet.reset_energy_today();
            packet.to_vec()?
        };

        let topic = self.settings.read().await.topic.clone();
        self.connection.publish(&topic, payload).await?;
        info!("Republished packet to {} with energy today reset", topic);
        Ok(true)
    }

    async fn connect(&self) -> DriverResult<()> {
        let settings = self.settings.read().await.clone();
        self.connection
            .connect(&settings, self.processor.clone())
            .await
    }

    pub async fn name(&self) -> String {
        self.name.read().await.clone()
    }

    pub async fn settings(&self) -> ConnectionSettings {
        self.settings.read().await.clone()
    }

    pub fn processor(&self) -> &Arc<TelemetryProcessor> {
        &self.processor
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.processor.status().await
    }

    pub async fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.processor.last_seen().await
    }

    pub async fn last_packet(&self) -> Option<TelemetryPacket> {
        self.processor.last_packet().await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }
}
