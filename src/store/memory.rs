//! In-memory implementations of the collaborator traits.
//!
//! Used by the default server wiring and by tests. A deployment backed by a
//! relational database implements the same traits over its own pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{
    AutoReplyRule, AutoReplyRuleSource, Caller, CredentialSource, DeviceRecord, DeviceRecordStore,
    MessageLog, StatusUpdate, StoreError, WebhookConfig, WebhookConfigSource,
};

/// One appended message-log row.
#[derive(Debug, Clone)]
pub struct LoggedMessage {
    pub user_id: String,
    pub device_id: String,
    pub recipient: String,
    pub content: String,
    pub status: String,
}

/// In-memory store implementing every collaborator trait.
///
/// Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    devices: Arc<DashMap<String, DeviceRecord>>,
    rules: Arc<DashMap<String, Vec<AutoReplyRule>>>,
    webhooks: Arc<DashMap<String, WebhookConfig>>,
    tokens: Arc<DashMap<String, Caller>>,
    messages: Arc<Mutex<Vec<LoggedMessage>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&self, record: DeviceRecord) {
        self.devices.insert(record.id.clone(), record);
    }

    pub fn delete_device(&self, device_id: &str) {
        self.devices.remove(device_id);
    }

    /// Replace the rule list for a device. Callers supply rules newest-first.
    pub fn set_rules(&self, device_id: &str, rules: Vec<AutoReplyRule>) {
        self.rules.insert(device_id.to_string(), rules);
    }

    pub fn set_webhook(&self, user_id: &str, config: WebhookConfig) {
        self.webhooks.insert(user_id.to_string(), config);
    }

    pub fn insert_token(&self, token: &str, caller: Caller) {
        self.tokens.insert(token.to_string(), caller);
    }

    /// Snapshot of the message log, oldest first.
    pub async fn logged_messages(&self) -> Vec<LoggedMessage> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl DeviceRecordStore for MemoryStore {
    async fn get(&self, device_id: &str) -> Result<Option<DeviceRecord>, StoreError> {
        Ok(self.devices.get(device_id).map(|r| r.clone()))
    }

    async fn exists(&self, device_id: &str) -> Result<bool, StoreError> {
        Ok(self.devices.contains_key(device_id))
    }

    async fn update_status(
        &self,
        device_id: &str,
        update: StatusUpdate,
    ) -> Result<(), StoreError> {
        let Some(mut record) = self.devices.get_mut(device_id) else {
            return Err(StoreError(format!("no device record: {device_id}")));
        };
        record.status = update.status;
        record.is_active = update.is_active;
        record.qr_image = update.qr_image;
        if update.touch_last_seen {
            record.last_seen = Some(Utc::now());
        }
        Ok(())
    }

    async fn most_recent_connected(
        &self,
        user_id: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        let mut candidates: Vec<DeviceRecord> = self
            .devices
            .iter()
            .filter(|r| r.user_id == user_id && r.status == crate::api::DeviceStatus::Connected)
            .map(|r| r.clone())
            .collect();
        candidates.sort_by_key(|r| std::cmp::Reverse(r.last_seen));
        Ok(candidates.into_iter().next())
    }

    async fn active_connected(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self
            .devices
            .iter()
            .filter(|r| r.is_active && r.status == crate::api::DeviceStatus::Connected)
            .map(|r| r.clone())
            .collect())
    }
}

#[async_trait]
impl MessageLog for MemoryStore {
    async fn append(
        &self,
        user_id: &str,
        device_id: &str,
        recipient: &str,
        content: &str,
        status: &str,
    ) -> Result<(), StoreError> {
        self.messages.lock().await.push(LoggedMessage {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            recipient: recipient.to_string(),
            content: content.to_string(),
            status: status.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl AutoReplyRuleSource for MemoryStore {
    async fn active_rules_for(&self, device_id: &str) -> Result<Vec<AutoReplyRule>, StoreError> {
        Ok(self
            .rules
            .get(device_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl WebhookConfigSource for MemoryStore {
    async fn active_webhook_for(
        &self,
        device_id: &str,
    ) -> Result<Option<WebhookConfig>, StoreError> {
        let Some(record) = self.devices.get(device_id) else {
            return Ok(None);
        };
        Ok(self.webhooks.get(&record.user_id).map(|w| w.clone()))
    }
}

#[async_trait]
impl CredentialSource for MemoryStore {
    async fn resolve(&self, token: &str) -> Result<Option<Caller>, StoreError> {
        Ok(self.tokens.get(token).map(|c| c.clone()))
    }
}
