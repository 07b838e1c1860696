//! Pairing state machine.
//!
//! Drives one device session through QR issuance, scan, authentication, and
//! readiness, with bounded retries and stale-event guards. The original
//! callback-soup design reacted to client events ad hoc; here every event
//! maps to a named transition whose guards make illegal transitions (QR
//! after connect, disconnect flaps) explicit.
//!
//! Transitions persist through the device record collaborator and hand
//! lifecycle events to the router. Internal errors are absorbed and logged,
//! never propagated across the public boundary.

use std::sync::Arc;

use serde_json::json;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::api::{DeviceStatus, WebhookEventType};
use crate::config::ManagerConfig;
use crate::qr::QrRenderer;
use crate::store::{DeviceRecordStore, StatusUpdate};

use super::router::EventRouter;
use super::store::SessionStore;

/// What the event pump should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpControl {
    /// Keep consuming events.
    Continue,
    /// The session must be torn down (retry cap, zombie, real disconnect).
    TearDown,
    /// The session was removed out from under us (concurrent disconnect);
    /// stop the pump and discard everything.
    Stop,
}

/// Transition logic for one device's lifecycle events.
///
/// Cheap to clone; shared by every device pump.
#[derive(Clone)]
pub struct PairingMachine {
    store: SessionStore,
    records: Arc<dyn DeviceRecordStore>,
    router: EventRouter,
    qr: Arc<dyn QrRenderer>,
    config: Arc<ManagerConfig>,
}

impl PairingMachine {
    pub fn new(
        store: SessionStore,
        records: Arc<dyn DeviceRecordStore>,
        router: EventRouter,
        qr: Arc<dyn QrRenderer>,
        config: Arc<ManagerConfig>,
    ) -> Self {
        Self {
            store,
            records,
            router,
            qr,
            config,
        }
    }

    /// A pairing challenge arrived (initial issuance or rotation).
    pub async fn on_qr(&self, device_id: &str, challenge: &str) -> PumpControl {
        let Some(session) = self.store.get(device_id) else {
            return PumpControl::Stop;
        };

        // Stale challenge after successful pairing; acting on it would
        // re-enter the pairing loop.
        if session.status.is_paired() {
            debug!(
                device_id = %device_id,
                status = %session.status,
                "Ignoring QR challenge for paired session"
            );
            return PumpControl::Continue;
        }

        // Zombie check: the backing record can vanish while a session is
        // still pairing. Tear it down immediately, regardless of retries.
        match self.records.exists(device_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(device_id = %device_id, "Device record vanished, tearing down orphaned session");
                return PumpControl::TearDown;
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Device existence check failed");
                return PumpControl::Continue;
            }
        }

        if session.qr_retries >= self.config.max_qr_retries {
            warn!(
                device_id = %device_id,
                retries = session.qr_retries,
                "QR retry cap reached, abandoning pairing"
            );
            return PumpControl::TearDown;
        }

        let rotation = session.qr_retries + 1;
        info!(
            device_id = %device_id,
            rotation = rotation,
            cap = self.config.max_qr_retries,
            "QR challenge rotated"
        );

        let updated = self.store.update(device_id, |s| {
            s.status = DeviceStatus::Scanning;
            s.qr_payload = Some(challenge.to_string());
            s.qr_retries = rotation;
        });
        if !updated {
            return PumpControl::Stop;
        }

        match self.qr.to_image(challenge) {
            Ok(image) => {
                self.persist(device_id, StatusUpdate::scanning(image.clone()))
                    .await;
                self.router
                    .lifecycle(device_id, WebhookEventType::Qr, json!({ "qr": image }));
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to render QR image");
            }
        }

        PumpControl::Continue
    }

    /// The phone accepted the pairing. Memory-only; the persisted record
    /// moves straight from scanning to connected on ready.
    pub async fn on_authenticated(&self, device_id: &str) -> PumpControl {
        debug!(device_id = %device_id, "Session authenticated");
        if self
            .store
            .update(device_id, |s| s.status = DeviceStatus::Authenticated)
        {
            PumpControl::Continue
        } else {
            PumpControl::Stop
        }
    }

    /// The session is fully up.
    pub async fn on_ready(&self, device_id: &str, phone: Option<&str>) -> PumpControl {
        let updated = self.store.update(device_id, |s| {
            s.status = DeviceStatus::Connected;
            s.qr_payload = None;
            s.qr_retries = 0;
            s.connected_at = Some(Instant::now());
        });
        if !updated {
            return PumpControl::Stop;
        }

        info!(device_id = %device_id, phone = ?phone, "Device connected");
        self.persist(device_id, StatusUpdate::connected()).await;
        self.router.lifecycle(
            device_id,
            WebhookEventType::Device,
            json!({ "status": "connected", "phone": phone }),
        );

        PumpControl::Continue
    }

    /// Pairing was rejected. Terminal for this attempt; no automatic retry.
    pub async fn on_auth_failure(&self, device_id: &str, reason: &str) -> PumpControl {
        error!(device_id = %device_id, reason = %reason, "Authentication failed");

        let updated = self.store.update(device_id, |s| {
            s.status = DeviceStatus::AuthFailed;
            s.qr_payload = None;
        });
        if !updated {
            return PumpControl::Stop;
        }

        self.persist(device_id, StatusUpdate::disconnected()).await;
        PumpControl::Continue
    }

    /// The underlying session dropped.
    ///
    /// Disconnects arriving right after a successful connection are noise
    /// from the handshake settling and are discarded; a session must dwell
    /// connected past the configured window before a disconnect is real.
    pub async fn on_disconnected(&self, device_id: &str, reason: &str) -> PumpControl {
        let Some(session) = self.store.get(device_id) else {
            return PumpControl::Stop;
        };

        if let Some(connected_at) = session.connected_at {
            let elapsed = connected_at.elapsed();
            let window = Duration::from_secs(self.config.spurious_disconnect_seconds);
            if session.status == DeviceStatus::Connected && elapsed < window {
                warn!(
                    device_id = %device_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    reason = %reason,
                    "Ignoring spurious disconnect"
                );
                return PumpControl::Continue;
            }
        }

        info!(device_id = %device_id, reason = %reason, "Device disconnected");
        PumpControl::TearDown
    }

    /// Best-effort status write-through; failures are logged, never raised.
    async fn persist(&self, device_id: &str, update: StatusUpdate) {
        if let Err(e) = self.records.update_status(device_id, update).await {
            error!(device_id = %device_id, error = %e, "Failed to persist device status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientFactory;
    use crate::client::fake::FakeClientFactory;
    use crate::qr::SvgQrRenderer;
    use crate::session::store::DeviceSession;
    use crate::store::{DeviceRecord, MemoryStore};
    use std::path::Path;

    fn record(id: &str) -> DeviceRecord {
        DeviceRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: "Phone A".to_string(),
            phone: None,
            status: DeviceStatus::Uninitialized,
            is_active: false,
            qr_image: None,
            last_seen: None,
        }
    }

    async fn setup(device_id: &str) -> (PairingMachine, SessionStore, MemoryStore, FakeClientFactory) {
        let store = SessionStore::new();
        let memory = MemoryStore::new();
        memory.insert_device(record(device_id));

        let factory = FakeClientFactory::new();
        let (client, _rx) = factory.spawn(device_id, Path::new("/tmp")).await.unwrap();
        store
            .insert_new(device_id, DeviceSession::initializing(client))
            .unwrap();

        let router = EventRouter::new(
            Arc::new(memory.clone()),
            Arc::new(memory.clone()),
            Arc::new(memory.clone()),
        );
        let machine = PairingMachine::new(
            store.clone(),
            Arc::new(memory.clone()),
            router,
            Arc::new(SvgQrRenderer),
            Arc::new(ManagerConfig::default()),
        );
        (machine, store, memory, factory)
    }

    #[tokio::test]
    async fn qr_moves_session_to_scanning_and_persists_image() {
        let (machine, store, memory, _f) = setup("d1").await;

        let control = machine.on_qr("d1", "2@challenge").await;
        assert_eq!(control, PumpControl::Continue);

        let session = store.get("d1").unwrap();
        assert_eq!(session.status, DeviceStatus::Scanning);
        assert_eq!(session.qr_payload.as_deref(), Some("2@challenge"));
        assert_eq!(session.qr_retries, 1);

        let rec = memory.get("d1").await.unwrap().unwrap();
        assert_eq!(rec.status, DeviceStatus::Scanning);
        assert!(rec.qr_image.unwrap().starts_with("data:image/svg+xml"));
    }

    #[tokio::test]
    async fn qr_after_connected_is_ignored() {
        let (machine, store, _m, _f) = setup("d1").await;
        store.update("d1", |s| s.status = DeviceStatus::Connected);

        let control = machine.on_qr("d1", "2@stale").await;
        assert_eq!(control, PumpControl::Continue);

        let session = store.get("d1").unwrap();
        assert_eq!(session.status, DeviceStatus::Connected);
        assert!(session.qr_payload.is_none());
        assert_eq!(session.qr_retries, 0);
    }

    #[tokio::test]
    async fn qr_for_vanished_record_requests_teardown() {
        let (machine, _s, memory, _f) = setup("d1").await;
        memory.delete_device("d1");

        let control = machine.on_qr("d1", "2@zombie").await;
        assert_eq!(control, PumpControl::TearDown);
    }

    #[tokio::test]
    async fn qr_cap_requests_teardown() {
        let (machine, store, _m, _f) = setup("d1").await;

        for _ in 0..5 {
            assert_eq!(machine.on_qr("d1", "2@rot").await, PumpControl::Continue);
        }
        assert_eq!(store.get("d1").unwrap().qr_retries, 5);

        // The sixth rotation exceeds the default cap of 5.
        assert_eq!(machine.on_qr("d1", "2@rot").await, PumpControl::TearDown);
    }

    #[tokio::test]
    async fn ready_clears_qr_state_and_persists_connected() {
        let (machine, store, memory, _f) = setup("d1").await;
        machine.on_qr("d1", "2@challenge").await;

        let control = machine.on_ready("d1", Some("628123")).await;
        assert_eq!(control, PumpControl::Continue);

        let session = store.get("d1").unwrap();
        assert_eq!(session.status, DeviceStatus::Connected);
        assert!(session.qr_payload.is_none());
        assert_eq!(session.qr_retries, 0);
        assert!(session.connected_at.is_some());

        let rec = memory.get("d1").await.unwrap().unwrap();
        assert_eq!(rec.status, DeviceStatus::Connected);
        assert!(rec.is_active);
        assert!(rec.qr_image.is_none());
        assert!(rec.last_seen.is_some());
    }

    #[tokio::test]
    async fn disconnect_right_after_ready_is_discarded() {
        let (machine, store, _m, _f) = setup("d1").await;
        machine.on_ready("d1", None).await;

        let control = machine.on_disconnected("d1", "NAVIGATION").await;
        assert_eq!(control, PumpControl::Continue);
        assert_eq!(store.get("d1").unwrap().status, DeviceStatus::Connected);
    }

    #[tokio::test]
    async fn disconnect_after_dwell_requests_teardown() {
        let (machine, store, _m, _f) = setup("d1").await;
        machine.on_ready("d1", None).await;

        // Age the connection past the spurious-disconnect window.
        store.update("d1", |s| {
            s.connected_at = Some(Instant::now() - Duration::from_secs(60));
        });

        let control = machine.on_disconnected("d1", "LOGOUT").await;
        assert_eq!(control, PumpControl::TearDown);
    }

    #[tokio::test]
    async fn disconnect_while_scanning_requests_teardown() {
        let (machine, _s, _m, _f) = setup("d1").await;
        machine.on_qr("d1", "2@challenge").await;

        let control = machine.on_disconnected("d1", "browser crash").await;
        assert_eq!(control, PumpControl::TearDown);
    }

    #[tokio::test]
    async fn auth_failure_is_terminal_and_persists_inactive() {
        let (machine, store, memory, _f) = setup("d1").await;
        machine.on_qr("d1", "2@challenge").await;

        let control = machine.on_auth_failure("d1", "pairing rejected").await;
        assert_eq!(control, PumpControl::Continue);

        let session = store.get("d1").unwrap();
        assert_eq!(session.status, DeviceStatus::AuthFailed);
        assert!(session.qr_payload.is_none());

        let rec = memory.get("d1").await.unwrap().unwrap();
        assert_eq!(rec.status, DeviceStatus::Disconnected);
        assert!(!rec.is_active);
    }

    #[tokio::test]
    async fn transitions_on_removed_session_stop_the_pump() {
        let (machine, store, _m, _f) = setup("d1").await;
        store.remove("d1");

        assert_eq!(machine.on_qr("d1", "2@x").await, PumpControl::Stop);
        assert_eq!(machine.on_ready("d1", None).await, PumpControl::Stop);
        assert_eq!(
            machine.on_disconnected("d1", "gone").await,
            PumpControl::Stop
        );
    }
}
