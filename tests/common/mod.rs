//! Common test utilities.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use tempfile::TempDir;

use wagate::api::DeviceStatus;
use wagate::client::fake::FakeClientFactory;
use wagate::config::ManagerConfig;
use wagate::qr::SvgQrRenderer;
use wagate::server::{self, AppState};
use wagate::session::{NoopTerminator, SessionManager};
use wagate::store::{DeviceRecord, MemoryStore};

/// A fully wired manager over in-memory stores and a scriptable client.
pub struct Harness {
    pub manager: SessionManager,
    pub store: MemoryStore,
    pub factory: FakeClientFactory,
    pub sessions_dir: std::path::PathBuf,
}

/// Build a harness with the given manager tuning.
pub fn harness_with(mut config: ManagerConfig) -> Harness {
    let tmp = TempDir::new().unwrap();
    // Leak the TempDir so it doesn't get cleaned up during the test.
    let tmp = Box::leak(Box::new(tmp));
    config.sessions_path = tmp.path().to_path_buf();
    config.cleanup_backoff_seconds = 0;

    let store = MemoryStore::new();
    let factory = FakeClientFactory::new();
    let manager = SessionManager::new(
        config,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(factory.clone()),
        Arc::new(NoopTerminator),
        Arc::new(SvgQrRenderer),
    );

    Harness {
        manager,
        store,
        factory,
        sessions_dir: tmp.path().to_path_buf(),
    }
}

pub fn harness() -> Harness {
    harness_with(ManagerConfig::default())
}

/// Minimal device record in the uninitialized state.
pub fn device(id: &str, user: &str) -> DeviceRecord {
    DeviceRecord {
        id: id.to_string(),
        user_id: user.to_string(),
        name: format!("device {id}"),
        phone: None,
        status: DeviceStatus::Uninitialized,
        is_active: false,
        qr_image: None,
        last_seen: None,
    }
}

/// Build the HTTP app over a harness.
pub fn test_app(h: &Harness) -> Router {
    let state = AppState {
        manager: h.manager.clone(),
        records: Arc::new(h.store.clone()),
        credentials: Arc::new(h.store.clone()),
    };
    server::build_app(state, 300)
}

/// Let spawned pump and router tasks run.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
