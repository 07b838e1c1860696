//! Device session manager.
//!
//! Owns the collection of long-lived, independently-failing client
//! sessions: one per registered device. Creation, teardown, dispatch, and
//! the per-device event pumps all live here; the pairing transitions
//! themselves are in [`super::machine`].
//!
//! Each device's events are consumed by a dedicated pump task, so
//! transitions for one device are strictly ordered while devices progress
//! independently. A stall in one device's teardown never blocks another.

use std::sync::Arc;

use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api::DeviceStatus;
use crate::client::{ClientEvent, ClientFactory};
use crate::config::ManagerConfig;
use crate::qr::QrRenderer;
use crate::store::{
    AutoReplyRuleSource, Caller, DeviceRecord, DeviceRecordStore, MessageLog, StatusUpdate,
    WebhookConfigSource,
};

use super::cleanup::{cleanup_session_dir, session_dir};
use super::error::{Result, SessionError};
use super::machine::{PairingMachine, PumpControl};
use super::router::EventRouter;
use super::store::{DeviceSession, SessionStore};
use super::terminate::ProcessTerminator;

/// Default addressing domain for bare phone numbers.
const DEFAULT_CHAT_DOMAIN: &str = "@c.us";

/// Outcome of a successful dispatch.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Provider-assigned message id.
    pub message_id: String,
    /// Device the message actually went through (relevant for
    /// account-level auto-selection).
    pub device_id: String,
}

/// Orchestrates device client sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: SessionStore,
    records: Arc<dyn DeviceRecordStore>,
    log: Arc<dyn MessageLog>,
    router: EventRouter,
    machine: PairingMachine,
    factory: Arc<dyn ClientFactory>,
    terminator: Arc<dyn ProcessTerminator>,
    config: ManagerConfig,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ManagerConfig,
        records: Arc<dyn DeviceRecordStore>,
        log: Arc<dyn MessageLog>,
        rules: Arc<dyn AutoReplyRuleSource>,
        webhooks: Arc<dyn WebhookConfigSource>,
        factory: Arc<dyn ClientFactory>,
        terminator: Arc<dyn ProcessTerminator>,
        qr: Arc<dyn QrRenderer>,
    ) -> Self {
        let store = SessionStore::new();
        let router = EventRouter::new(rules, webhooks, log.clone());
        let machine = PairingMachine::new(
            store.clone(),
            records.clone(),
            router.clone(),
            qr,
            Arc::new(config.clone()),
        );

        Self {
            inner: Arc::new(ManagerInner {
                store,
                records,
                log,
                router,
                machine,
                factory,
                terminator,
                config,
            }),
        }
    }

    /// The session registry (for status queries by handlers and tests).
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    // ------------------------------------------------------------------------
    // Connect / Disconnect
    // ------------------------------------------------------------------------

    /// Start (or join) a session for a device.
    ///
    /// Idempotent: a live session for the device returns its current status
    /// instead of an error, so duplicate connect requests are harmless.
    /// Initialization proceeds asynchronously; the returned status reflects
    /// the moment of the call.
    pub async fn connect(
        &self,
        device_id: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<DeviceStatus> {
        if !self.inner.records.exists(device_id).await? {
            return Err(SessionError::DeviceNotFound(device_id.to_string()));
        }

        if let Some(existing) = self.inner.store.get(device_id)
            && existing.has_live_client()
        {
            info!(
                device_id = %device_id,
                status = %existing.status,
                "Connect requested for device with live session"
            );
            return Ok(existing.status);
        }

        info!(device_id = %device_id, name = %name, phone = ?phone, "Initializing client session");

        let data_dir = session_dir(&self.inner.config.sessions_path, device_id);
        fs::create_dir_all(&data_dir)
            .await
            .map_err(crate::client::ClientError::Spawn)?;

        let (client, events) = match self.inner.factory.spawn(device_id, &data_dir).await {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Client initialization failed");
                // Park the failure so status queries see `error` rather
                // than a silent absence.
                let _ = self.inner.store.insert_new(
                    device_id,
                    DeviceSession {
                        status: DeviceStatus::Error,
                        client: None,
                        qr_payload: None,
                        qr_retries: 0,
                        connected_at: None,
                    },
                );
                return Err(e.into());
            }
        };

        if self
            .inner
            .store
            .insert_new(device_id, DeviceSession::initializing(client.clone()))
            .is_err()
        {
            // A concurrent connect won the race. Discard our client and
            // report the winner's state.
            debug!(device_id = %device_id, "Concurrent connect raced, discarding duplicate client");
            client.destroy().await;
            let status = self
                .inner
                .store
                .get(device_id)
                .map(|s| s.status)
                .unwrap_or(DeviceStatus::Initializing);
            return Ok(status);
        }

        self.spawn_pump(device_id.to_string(), events);
        Ok(DeviceStatus::Initializing)
    }

    /// Tear a device session down.
    ///
    /// Idempotent. The in-memory state flips to disconnected before any
    /// slow teardown work, so concurrent status queries (and an in-flight
    /// connect's pump) observe the removal immediately; resource
    /// destruction and artifact cleanup then proceed in the background.
    pub async fn disconnect(&self, device_id: &str) -> DeviceStatus {
        let removed = self.inner.store.remove(device_id);
        self.persist_disconnected(device_id).await;

        match removed {
            Some(session) => {
                info!(device_id = %device_id, "Disconnecting device");
                let manager = self.clone();
                let id = device_id.to_string();
                tokio::spawn(async move {
                    manager.destroy_resources(&id, session).await;
                });
            }
            None => {
                debug!(device_id = %device_id, "Disconnect for device without live session");
                // Leftover artifacts from a previous run may still exist.
                let manager = self.clone();
                let id = device_id.to_string();
                tokio::spawn(async move {
                    manager.cleanup_artifacts(&id).await;
                });
            }
        }

        DeviceStatus::Disconnected
    }

    /// Reconnect every device persisted as active and connected.
    ///
    /// Called on startup. Per-device failures are logged and skipped.
    pub async fn recover(&self) -> usize {
        let devices = match self.inner.records.active_connected().await {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "Failed to load devices for recovery");
                return 0;
            }
        };

        let mut recovered = 0;
        for device in devices {
            info!(device_id = %device.id, name = %device.name, "Reconnecting device");
            match self
                .connect(&device.id, &device.name, device.phone.as_deref())
                .await
            {
                Ok(_) => recovered += 1,
                Err(e) => {
                    error!(device_id = %device.id, error = %e, "Failed to reconnect device");
                }
            }
        }

        if recovered > 0 {
            info!(recovered = recovered, "Device recovery complete");
        }
        recovered
    }

    /// Destroy all client sessions without touching persisted status, so a
    /// restart reconnects them via [`Self::recover`].
    pub async fn shutdown(&self) {
        info!(sessions = self.inner.store.len(), "Shutting down session manager");
        let ids: Vec<String> = self
            .inner
            .store
            .iter_ids()
            .collect();
        for id in ids {
            if let Some(session) = self.inner.store.remove(&id)
                && let Some(client) = session.client
            {
                client.destroy().await;
                if let Some(pid) = client.pid() {
                    self.inner.terminator.terminate(pid);
                }
            }
        }
        info!("Session manager shutdown complete");
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Reconciled status for a device.
    pub async fn get_status(&self, device_id: &str) -> Result<DeviceStatus> {
        if !self.inner.records.exists(device_id).await? {
            return Err(SessionError::DeviceNotFound(device_id.to_string()));
        }
        Ok(self.inner.store.effective_status(device_id))
    }

    /// Latest raw QR challenge; present only while the device is scanning.
    pub async fn get_qr(&self, device_id: &str) -> Result<Option<String>> {
        if !self.inner.records.exists(device_id).await? {
            return Err(SessionError::DeviceNotFound(device_id.to_string()));
        }
        Ok(self.inner.store.get(device_id).and_then(|s| s.qr_payload))
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Send a text message through a specific device.
    pub async fn send(&self, device_id: &str, recipient: &str, body: &str) -> Result<SendReceipt> {
        let record = self
            .inner
            .records
            .get(device_id)
            .await?
            .ok_or_else(|| SessionError::DeviceNotFound(device_id.to_string()))?;
        self.send_via(&record, recipient, body).await
    }

    /// Send a text message as the given caller.
    ///
    /// A device-scoped credential pins the device; an account credential
    /// routes through the most recently seen connected device.
    pub async fn send_as(
        &self,
        caller: &Caller,
        recipient: &str,
        body: &str,
    ) -> Result<SendReceipt> {
        let record = match caller {
            Caller::Device { device_id, user_id } => {
                let record = self
                    .inner
                    .records
                    .get(device_id)
                    .await?
                    .ok_or_else(|| SessionError::DeviceNotFound(device_id.clone()))?;
                // A token for someone else's device gets the same answer as
                // a missing device.
                if &record.user_id != user_id {
                    return Err(SessionError::DeviceNotFound(device_id.clone()));
                }
                record
            }
            Caller::Account { user_id } => self
                .inner
                .records
                .most_recent_connected(user_id)
                .await?
                .ok_or_else(|| SessionError::NoConnectedDevice(user_id.clone()))?,
        };
        self.send_via(&record, recipient, body).await
    }

    async fn send_via(
        &self,
        record: &DeviceRecord,
        recipient: &str,
        body: &str,
    ) -> Result<SendReceipt> {
        if body.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let device_id = &record.id;
        let effective = self.inner.store.effective_status(device_id);
        let client = self.inner.store.client(device_id);

        let Some(client) = client.filter(|_| effective == DeviceStatus::Connected) else {
            // The persisted record may still claim connected; heal the
            // drift so dashboards and auto-selection see reality.
            let update = StatusUpdate {
                status: effective,
                is_active: false,
                qr_image: None,
                touch_last_seen: false,
            };
            if let Err(e) = self.inner.records.update_status(device_id, update).await {
                warn!(device_id = %device_id, error = %e, "Failed to reconcile device status");
            }
            return Err(SessionError::DeviceNotConnected(device_id.clone()));
        };

        let chat_id = normalize_chat_id(recipient);
        let message_id = client.send_message(&chat_id, body).await?;
        info!(device_id = %device_id, recipient = %recipient, "Message sent");

        // The send already succeeded; a logging failure must not undo it.
        if let Err(e) = self
            .inner
            .log
            .append(&record.user_id, device_id, recipient, body, "sent")
            .await
        {
            warn!(device_id = %device_id, error = %e, "Failed to log outbound message");
        }

        Ok(SendReceipt {
            message_id,
            device_id: device_id.clone(),
        })
    }

    // ------------------------------------------------------------------------
    // Event Pump
    // ------------------------------------------------------------------------

    /// Consume one device's event stream, applying transitions in order.
    ///
    /// The pump exits when the stream closes, when a transition requests
    /// teardown, or when it discovers the session was removed by a
    /// concurrent disconnect (in which case its results are discarded).
    fn spawn_pump(&self, device_id: String, mut events: mpsc::Receiver<ClientEvent>) {
        let manager = self.clone();
        tokio::spawn(async move {
            debug!(device_id = %device_id, "Event pump started");
            while let Some(event) = events.recv().await {
                let control = match event {
                    ClientEvent::Qr { challenge } => {
                        manager.inner.machine.on_qr(&device_id, &challenge).await
                    }
                    ClientEvent::Authenticated => {
                        manager.inner.machine.on_authenticated(&device_id).await
                    }
                    ClientEvent::Ready { phone } => {
                        manager
                            .inner
                            .machine
                            .on_ready(&device_id, phone.as_deref())
                            .await
                    }
                    ClientEvent::AuthFailure { reason } => {
                        manager
                            .inner
                            .machine
                            .on_auth_failure(&device_id, &reason)
                            .await
                    }
                    ClientEvent::Disconnected { reason } => {
                        manager
                            .inner
                            .machine
                            .on_disconnected(&device_id, &reason)
                            .await
                    }
                    ClientEvent::Message(message) => {
                        if let Some(client) = manager.inner.store.client(&device_id) {
                            manager.inner.router.inbound(&device_id, client, message);
                        }
                        PumpControl::Continue
                    }
                };

                match control {
                    PumpControl::Continue => {}
                    PumpControl::TearDown => {
                        manager.teardown(&device_id).await;
                        break;
                    }
                    PumpControl::Stop => {
                        debug!(device_id = %device_id, "Session removed, pump discarding stream");
                        break;
                    }
                }
            }
            debug!(device_id = %device_id, "Event pump stopped");
        });
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Machine-requested teardown (retry cap, zombie, real disconnect).
    /// Runs inside the pump task, so it can afford to await cleanup.
    async fn teardown(&self, device_id: &str) {
        let removed = self.inner.store.remove(device_id);
        self.persist_disconnected(device_id).await;
        if let Some(session) = removed {
            self.destroy_resources(device_id, session).await;
        }
    }

    /// Destroy the client resource, force-kill its process tree, and clean
    /// up on-disk artifacts. Best-effort throughout.
    async fn destroy_resources(&self, device_id: &str, session: DeviceSession) {
        if let Some(client) = session.client {
            client.destroy().await;
            if let Some(pid) = client.pid() {
                self.inner.terminator.terminate(pid);
            }
        }
        self.cleanup_artifacts(device_id).await;
    }

    async fn cleanup_artifacts(&self, device_id: &str) {
        let result = cleanup_session_dir(
            &self.inner.config.sessions_path,
            device_id,
            self.inner.config.cleanup_max_attempts,
            Duration::from_secs(self.inner.config.cleanup_backoff_seconds),
        )
        .await;
        if let Err(e) = result {
            // Disconnect already succeeded from the caller's perspective.
            warn!(device_id = %device_id, error = %e, "Session artifact cleanup incomplete");
        }
    }

    /// Persist the disconnected state. The record may legitimately be gone
    /// (zombie teardown), which is only worth a debug line.
    async fn persist_disconnected(&self, device_id: &str) {
        if let Err(e) = self
            .inner
            .records
            .update_status(device_id, StatusUpdate::disconnected())
            .await
        {
            debug!(device_id = %device_id, error = %e, "Skipped persisting disconnect");
        }
    }
}

/// Append the default addressing domain to bare phone numbers.
fn normalize_chat_id(recipient: &str) -> String {
    if recipient.contains('@') {
        recipient.to_string()
    } else {
        format!("{recipient}{DEFAULT_CHAT_DOMAIN}")
    }
}
