//! MQTT broker connector built on rumqttc.
//!
//! Each session owns one `AsyncClient` and a spawned task polling its event
//! loop. The task subscribes on every `ConnAck`, forwards publishes to the
//! [`MessageHandler`] and stops on the first transport error: reconnecting is
//! left to whoever re-applies the settings.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connector::{BrokerConnector, BrokerSession, ConnectionStatus, MessageHandler};
use crate::error::{DriverError, DriverResult};
use crate::settings::{ConnectionSettings, Protocol};

/// Time allowed for a clean disconnect before the event loop is aborted.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Path used for WebSocket transports.
const WS_PATH: &str = "/mqtt";

/// Production [`BrokerConnector`].
#[derive(Debug, Clone, Default)]
pub struct RumqttConnector {
    client_prefix: String,
}

impl RumqttConnector {
    pub fn new() -> Self {
        Self {
            client_prefix: "grott".to_string(),
        }
    }

    /// Use `prefix` for generated client ids.
    pub fn with_client_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_prefix = prefix.into();
        self
    }

    fn client_id(&self) -> String {
        let prefix = if self.client_prefix.is_empty() {
            "grott"
        } else {
            &self.client_prefix
        };
        format!("{}-{}", prefix, Uuid::new_v4())
    }
}

/// Build rumqttc options for `settings`.
pub fn mqtt_options(settings: &ConnectionSettings, client_id: &str) -> DriverResult<MqttOptions> {
    settings.validate()?;

    let host = match settings.protocol {
        Protocol::Mqtt | Protocol::Mqtts => settings.host.clone(),
        Protocol::Ws | Protocol::Wss => format!("{}{}", settings.broker_url(), WS_PATH),
    };

    let mut options = MqttOptions::new(client_id, host, settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
    options.set_max_packet_size(1024 * 1024, 1024 * 1024);
    options.set_clean_session(true);

    if let Some(user) = &settings.username {
        options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
    }

    options.set_transport(build_transport(settings));
    Ok(options)
}

fn build_transport(settings: &ConnectionSettings) -> Transport {
    match (settings.protocol, settings.validate_certificate) {
        (Protocol::Mqtt, _) => Transport::tcp(),
        (Protocol::Ws, _) => Transport::Ws,
        (Protocol::Mqtts, true) => Transport::tls_with_default_config(),
        (Protocol::Wss, true) => Transport::wss_with_default_config(),
        (Protocol::Mqtts, false) => Transport::tls_with_config(insecure_tls()),
        (Protocol::Wss, false) => Transport::wss_with_config(insecure_tls()),
    }
}

fn insecure_tls() -> TlsConfiguration {
    warn!("TLS certificate validation is disabled");
    TlsConfiguration::Rustls(Arc::new(insecure::client_config()))
}

mod insecure {
    //! Certificate verifier that accepts any server certificate.

    use rumqttc::tokio_rustls::rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rumqttc::tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, Error, SignatureScheme};
    use std::sync::Arc;

    #[derive(Debug)]
    struct AcceptAnyCertificate;

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }

    pub(super) fn client_config() -> ClientConfig {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth()
    }
}

/// One open rumqttc connection.
pub struct RumqttSession {
    client: AsyncClient,
    task: JoinHandle<()>,
    closing: Arc<AtomicBool>,
    broker_addr: String,
}

#[async_trait]
impl BrokerSession for RumqttSession {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> DriverResult<()> {
        if self.task.is_finished() {
            return Err(DriverError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DriverError::Communication(e.to_string()))
    }

    async fn close(self: Box<Self>) {
        let RumqttSession {
            client,
            mut task,
            closing,
            broker_addr,
        } = *self;

        info!("Disconnecting from MQTT broker {}", broker_addr);
        closing.store(true, Ordering::SeqCst);

        if !task.is_finished() {
            if let Err(e) = client.try_disconnect() {
                debug!("Disconnect request for {} not queued: {}", broker_addr, e);
            }
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!("MQTT event loop for {} did not stop, aborting", broker_addr);
                task.abort();
            }
        }
    }

    fn is_open(&self) -> bool {
        !self.task.is_finished()
    }
}

#[async_trait]
impl BrokerConnector for RumqttConnector {
    async fn open(
        &self,
        settings: &ConnectionSettings,
        handler: Arc<dyn MessageHandler>,
    ) -> DriverResult<Box<dyn BrokerSession>> {
        let options = mqtt_options(settings, &self.client_id())?;
        let broker_addr = settings.broker_addr();
        info!("Connecting to broker {} ({})", broker_addr, settings.protocol);

        let (client, eventloop) = AsyncClient::new(options, 10);
        let closing = Arc::new(AtomicBool::new(false));

        handler.status_changed(ConnectionStatus::Connecting).await;

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            settings.topic.clone(),
            broker_addr.clone(),
            handler,
            closing.clone(),
        ));

        Ok(Box::new(RumqttSession {
            client,
            task,
            closing,
            broker_addr,
        }))
    }

    async fn probe(&self, settings: &ConnectionSettings) -> DriverResult<()> {
        let options = mqtt_options(settings, &self.client_id())?;
        let timeout = Duration::from_secs(settings.connect_timeout_secs.max(1));
        info!("Connecting to broker at {}", settings.broker_addr());

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(DriverError::Connection(format!(
                                "Broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(DriverError::Connection(e.to_string())),
                }
            }
        };

        let result = match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(timeout.as_millis() as u64)),
        };

        if result.is_ok() {
            info!("Connected successfully, closing connection");
            let _ = client.try_disconnect();
            // Flush the disconnect packet
            let _ = tokio::time::timeout(Duration::from_millis(500), eventloop.poll()).await;
        }

        result
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    broker_addr: String,
    handler: Arc<dyn MessageHandler>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to broker {}, subscribing to {}", broker_addr, topic);
                // The request channel is drained by this loop, so never await on it here.
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                    error!("Failed to subscribe to {}: {}", topic, e);
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                info!("Successfully subscribed to {}", topic);
                handler.status_changed(ConnectionStatus::Connected).await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received packet in {}: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );
                handler.handle_message(&publish.topic, &publish.payload).await;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("Disconnected from broker {}", broker_addr);
                handler.status_changed(ConnectionStatus::Disconnected).await;
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent to {}", broker_addr);
                handler.status_changed(ConnectionStatus::Disconnected).await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    handler.status_changed(ConnectionStatus::Disconnected).await;
                } else {
                    error!("MQTT broker {} error, closing connection: {}", broker_addr, e);
                    handler.status_changed(ConnectionStatus::Error).await;
                }
                break;
            }
        }
    }
    debug!("MQTT event loop for {} stopped", broker_addr);
}
