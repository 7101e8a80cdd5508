//! Mock broker connector shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use grott_devices::{
    BrokerConnector, BrokerSession, ConnectionSettings, ConnectionStatus, DriverError,
    DriverResult, MessageHandler,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    events: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    open_sessions: AtomicUsize,
    max_open_sessions: AtomicUsize,
    next_id: AtomicUsize,
    probed: Mutex<Vec<ConnectionSettings>>,
}

/// Connector that records session lifecycle instead of talking to a broker.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
    probe_error: Option<String>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every probe fail with `message`.
    pub fn failing_probe(message: &str) -> Self {
        Self {
            probe_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.state.events.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.published.lock().unwrap().clone()
    }

    pub fn probed(&self) -> Vec<ConnectionSettings> {
        self.state.probed.lock().unwrap().clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    pub fn max_open_sessions(&self) -> usize {
        self.state.max_open_sessions.load(Ordering::SeqCst)
    }

    /// Deliver `payload` as if it came from the broker.
    pub async fn deliver(&self, topic: &str, payload: &[u8]) {
        let handler = self.state.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler.handle_message(topic, payload).await;
        }
    }
}

pub struct MockSession {
    id: usize,
    state: Arc<MockState>,
    open: AtomicBool,
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> DriverResult<()> {
        self.state
            .published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.open.store(false, Ordering::SeqCst);
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("close:{}", self.id));
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn open(
        &self,
        settings: &ConnectionSettings,
        handler: Arc<dyn MessageHandler>,
    ) -> DriverResult<Box<dyn BrokerSession>> {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let open = self.state.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open_sessions.fetch_max(open, Ordering::SeqCst);
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("open:{}:{}", id, settings.broker_addr()));

        handler.status_changed(ConnectionStatus::Connected).await;
        *self.state.handler.lock().unwrap() = Some(handler);

        Ok(Box::new(MockSession {
            id,
            state: self.state.clone(),
            open: AtomicBool::new(true),
        }))
    }

    async fn probe(&self, settings: &ConnectionSettings) -> DriverResult<()> {
        self.state.probed.lock().unwrap().push(settings.clone());
        match &self.probe_error {
            Some(message) => Err(DriverError::Connection(message.clone())),
            None => Ok(()),
        }
    }
}
