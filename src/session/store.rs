//! In-memory registry of device sessions.
//!
//! One record per device behind a single concurrency-safe map. The
//! original deployment kept clients, QR codes, statuses, and retry counts
//! in parallel maps that could drift; a single [`DeviceSession`] record
//! makes that drift impossible.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::api::DeviceStatus;
use crate::client::WaClient;

use super::error::SessionError;

/// In-memory state of one device session.
///
/// Owned by the session store; mutated only by the device's event pump and
/// the manager's disconnect path.
#[derive(Clone)]
pub struct DeviceSession {
    pub status: DeviceStatus,
    /// Live client handle. `None` only for sessions parked in `Error`
    /// after a failed initialization.
    pub client: Option<Arc<dyn WaClient>>,
    /// Latest pairing challenge; `Some` iff `status == Scanning`.
    pub qr_payload: Option<String>,
    /// QR rotations consumed by the current pairing attempt.
    pub qr_retries: u32,
    /// When the session entered `Connected`; used to filter spurious
    /// disconnect events.
    pub connected_at: Option<Instant>,
}

impl DeviceSession {
    /// Fresh session around a newly spawned client.
    pub fn initializing(client: Arc<dyn WaClient>) -> Self {
        Self {
            status: DeviceStatus::Initializing,
            client: Some(client),
            qr_payload: None,
            qr_retries: 0,
            connected_at: None,
        }
    }

    /// Whether the underlying handle is present and live.
    pub fn has_live_client(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.is_alive())
    }
}

/// Concurrency-safe map of device id to session. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, DeviceSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a session. Never blocks.
    pub fn get(&self, device_id: &str) -> Option<DeviceSession> {
        self.sessions.get(device_id).map(|s| s.clone())
    }

    /// Insert with creation-only semantics.
    ///
    /// Fails with `AlreadyExists` when a live session is registered; a dead
    /// leftover entry is silently replaced.
    pub fn insert_new(&self, device_id: &str, session: DeviceSession) -> Result<(), SessionError> {
        match self.sessions.entry(device_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().has_live_client() {
                    return Err(SessionError::AlreadyExists(device_id.to_string()));
                }
                entry.insert(session);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    /// Remove a session, returning it. Removing an absent id is a no-op.
    pub fn remove(&self, device_id: &str) -> Option<DeviceSession> {
        self.sessions.remove(device_id).map(|(_, s)| s)
    }

    /// Apply a mutation to a session in place. Returns false when the
    /// session no longer exists (e.g. a concurrent disconnect removed it).
    pub fn update<F>(&self, device_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut DeviceSession),
    {
        match self.sessions.get_mut(device_id) {
            Some(mut session) => {
                f(&mut session);
                true
            }
            None => false,
        }
    }

    /// Stored status reconciled against handle liveness.
    ///
    /// A session whose client died is reported `Disconnected` even if the
    /// stored status still says `Connected`. This is the authority consulted
    /// before every send.
    pub fn effective_status(&self, device_id: &str) -> DeviceStatus {
        let Some(session) = self.sessions.get(device_id) else {
            return DeviceStatus::Disconnected;
        };
        if session.status == DeviceStatus::Connected && !session.has_live_client() {
            return DeviceStatus::Disconnected;
        }
        session.status
    }

    /// Live client handle for a device, if any.
    pub fn client(&self, device_id: &str) -> Option<Arc<dyn WaClient>> {
        self.sessions
            .get(device_id)
            .and_then(|s| s.client.clone())
            .filter(|c| c.is_alive())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.sessions.contains_key(device_id)
    }

    /// Ids of every tracked session, snapshotted.
    pub fn iter_ids(&self) -> impl Iterator<Item = String> + '_ {
        self.sessions.iter().map(|entry| entry.key().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
