//! Broker seam: how a device reaches an MQTT broker.
//!
//! The device logic never touches an MQTT client directly. It asks a
//! [`BrokerConnector`] for a [`BrokerSession`] and receives inbound payloads
//! through a [`MessageHandler`]. The production connector is
//! `RumqttConnector`; tests plug in their own.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::DriverResult;
use crate::settings::ConnectionSettings;

/// Connection status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConnectionStatus {
    /// No open connection
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Connected and subscribed
    Connected,
    /// Transport failure, connection closed
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Receiver of broker traffic for one session.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called for every message received on the subscribed topic.
    async fn handle_message(&self, topic: &str, payload: &[u8]);

    /// Called when the session changes state.
    async fn status_changed(&self, _status: ConnectionStatus) {}
}

/// An open broker connection.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Publish `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> DriverResult<()>;

    /// Close the connection and stop its event loop.
    async fn close(self: Box<Self>);

    /// Whether the session's event loop is still running.
    fn is_open(&self) -> bool;
}

/// Factory for broker sessions.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a session and subscribe to `settings.topic` once connected,
    /// and again after every reconnect.
    ///
    /// Returns as soon as the session is set up; handshake failures surface
    /// through [`MessageHandler::status_changed`].
    async fn open(
        &self,
        settings: &ConnectionSettings,
        handler: Arc<dyn MessageHandler>,
    ) -> DriverResult<Box<dyn BrokerSession>>;

    /// Connect, wait for the handshake and disconnect again.
    async fn probe(&self, settings: &ConnectionSettings) -> DriverResult<()>;
}
