//! External collaborator interfaces.
//!
//! The session core treats persistence as an eventually-consistent
//! collaborator: it writes status changes through [`DeviceRecordStore`] and
//! reconciles on read, but never wraps them in a transaction with its own
//! in-memory state.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{DeviceStatus, WebhookEventType};

// ============================================================================
// Records
// ============================================================================

/// Persisted device record, as far as the session core is concerned.
///
/// The full schema carries more columns; only the fields the manager reads
/// or writes appear here.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub status: DeviceStatus,
    pub is_active: bool,
    /// Rendered QR image (data URL), present while scanning.
    pub qr_image: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Fields written on every status transition.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: DeviceStatus,
    pub is_active: bool,
    pub qr_image: Option<String>,
    /// Whether to touch `last_seen` (set on successful connection).
    pub touch_last_seen: bool,
}

impl StatusUpdate {
    /// Update for a clean disconnect: inactive, QR cleared.
    pub fn disconnected() -> Self {
        Self {
            status: DeviceStatus::Disconnected,
            is_active: false,
            qr_image: None,
            touch_last_seen: false,
        }
    }

    /// Update for a live connection: active, QR cleared, last_seen touched.
    pub fn connected() -> Self {
        Self {
            status: DeviceStatus::Connected,
            is_active: true,
            qr_image: None,
            touch_last_seen: true,
        }
    }

    /// Update for a fresh pairing challenge.
    pub fn scanning(qr_image: String) -> Self {
        Self {
            status: DeviceStatus::Scanning,
            is_active: false,
            qr_image: Some(qr_image),
            touch_last_seen: false,
        }
    }
}

/// How an auto-reply rule matches the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Whole-body equality with any listed keyword.
    Exact,
    /// Substring match with any listed keyword.
    Contains,
}

/// Which chats an auto-reply rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyScope {
    All,
    Group,
    Private,
}

/// One auto-reply rule. Keywords are a comma-separated list.
#[derive(Debug, Clone)]
pub struct AutoReplyRule {
    pub user_id: String,
    pub keywords: String,
    pub match_mode: MatchMode,
    pub response: String,
    pub scope: ReplyScope,
}

/// Webhook configuration for an account.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub events: Vec<WebhookEventType>,
}

/// Who a bearer token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Device-scoped token: sends go through this device.
    Device { device_id: String, user_id: String },
    /// Account-level key: the gateway auto-selects a connected device.
    Account { user_id: String },
}

// ============================================================================
// Errors
// ============================================================================

/// Error from a backing store.
#[derive(Debug, thiserror::Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Backing persistence for device records.
#[async_trait]
pub trait DeviceRecordStore: Send + Sync {
    async fn get(&self, device_id: &str) -> Result<Option<DeviceRecord>, StoreError>;

    async fn exists(&self, device_id: &str) -> Result<bool, StoreError>;

    /// Persist a status transition. The write is eventually consistent with
    /// the in-memory session state.
    async fn update_status(&self, device_id: &str, update: StatusUpdate)
    -> Result<(), StoreError>;

    /// Most recently seen `connected` device owned by the account, for
    /// account-level send auto-selection.
    async fn most_recent_connected(
        &self,
        user_id: &str,
    ) -> Result<Option<DeviceRecord>, StoreError>;

    /// Devices persisted as active and connected, for startup reconnection.
    async fn active_connected(&self) -> Result<Vec<DeviceRecord>, StoreError>;
}

/// Append-only outbound message log. Failures are non-fatal to the send path.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(
        &self,
        user_id: &str,
        device_id: &str,
        recipient: &str,
        content: &str,
        status: &str,
    ) -> Result<(), StoreError>;
}

/// Source of active auto-reply rules, ordered newest-first.
#[async_trait]
pub trait AutoReplyRuleSource: Send + Sync {
    async fn active_rules_for(&self, device_id: &str) -> Result<Vec<AutoReplyRule>, StoreError>;
}

/// Source of the account's webhook configuration.
#[async_trait]
pub trait WebhookConfigSource: Send + Sync {
    /// Active webhook for the account owning the given device, if any.
    async fn active_webhook_for(&self, device_id: &str)
    -> Result<Option<WebhookConfig>, StoreError>;
}

/// Resolves bearer tokens to callers. Stands in for the auth middleware.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<Caller>, StoreError>;
}
