//! Scriptable in-process client.
//!
//! Used by the test suite and by local development runs where no real
//! bridge binary is available. The driver half injects lifecycle events
//! into the session's event stream and records every outbound send.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::{ClientError, ClientEvent, ClientFactory, WaClient};

/// One recorded outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub body: String,
}

/// Driver half of a fake client: injects events, inspects sends.
#[derive(Clone)]
pub struct FakeDriver {
    events: mpsc::Sender<ClientEvent>,
    inner: Arc<FakeInner>,
}

struct FakeInner {
    alive: AtomicBool,
    fail_sends: AtomicBool,
    send_counter: AtomicU64,
    sent: Mutex<Vec<SentMessage>>,
}

impl FakeDriver {
    /// Push an event into the session's event stream.
    pub async fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event).await;
    }

    /// Simulate the underlying process dying without any event.
    pub fn kill_silently(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }

    /// Make subsequent sends fail.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::Release);
    }

    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.inner.sent.lock().await.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }
}

/// The client handle the session manager sees.
pub struct FakeClient {
    inner: Arc<FakeInner>,
}

#[async_trait]
impl WaClient for FakeClient {
    async fn send_message(&self, chat_id: &str, body: &str) -> Result<String, ClientError> {
        if !self.is_alive() {
            return Err(ClientError::Closed);
        }
        if self.inner.fail_sends.load(Ordering::Acquire) {
            return Err(ClientError::Send("scripted failure".to_string()));
        }
        self.inner.sent.lock().await.push(SentMessage {
            chat_id: chat_id.to_string(),
            body: body.to_string(),
        });
        let n = self.inner.send_counter.fetch_add(1, Ordering::Relaxed);
        Ok(format!("fake-msg-{n}"))
    }

    fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    async fn destroy(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }
}

/// Factory producing fake clients and handing their drivers to the test.
#[derive(Clone, Default)]
pub struct FakeClientFactory {
    drivers: Arc<Mutex<Vec<(String, FakeDriver)>>>,
    fail_spawn: Arc<AtomicBool>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next spawns fail, simulating a broken bridge binary.
    pub fn fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::Release);
    }

    /// Driver for the most recently spawned client of a device.
    pub async fn driver(&self, device_id: &str) -> Option<FakeDriver> {
        self.drivers
            .lock()
            .await
            .iter()
            .rev()
            .find(|(id, _)| id == device_id)
            .map(|(_, d)| d.clone())
    }

    /// Number of clients spawned so far.
    pub async fn spawn_count(&self) -> usize {
        self.drivers.lock().await.len()
    }
}

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn spawn(
        &self,
        device_id: &str,
        _data_dir: &Path,
    ) -> Result<(Arc<dyn WaClient>, mpsc::Receiver<ClientEvent>), ClientError> {
        if self.fail_spawn.load(Ordering::Acquire) {
            return Err(ClientError::Send("scripted spawn failure".to_string()));
        }

        let (evt_tx, evt_rx) = mpsc::channel(64);
        let inner = Arc::new(FakeInner {
            alive: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            send_counter: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        });
        let driver = FakeDriver {
            events: evt_tx,
            inner: inner.clone(),
        };
        self.drivers
            .lock()
            .await
            .push((device_id.to_string(), driver));

        Ok((Arc::new(FakeClient { inner }), evt_rx))
    }
}
