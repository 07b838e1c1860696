//! Abstraction over the underlying WhatsApp Web client.
//!
//! The wire protocol is not our concern: the session core only needs a
//! handle it can send through, probe for liveness, and tear down. The
//! production implementation ([`bridge::BridgeClient`]) wraps an external
//! bridge subprocess speaking JSON Lines over stdio.

pub mod bridge;
pub mod fake;

pub use bridge::BridgeClientFactory;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ============================================================================
// Events
// ============================================================================

/// Inbound message delivered by a connected session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub timestamp: i64,
    /// Whether the originating chat is a group.
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
}

fn default_kind() -> String {
    "text".to_string()
}

/// Lifecycle and message events emitted by a client session.
///
/// Per device these arrive strictly ordered; the event pump consumes them
/// one at a time.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A pairing challenge is ready to be scanned.
    Qr { challenge: String },
    /// Phone accepted the pairing.
    Authenticated,
    /// Session is fully up and can send messages.
    Ready { phone: Option<String> },
    /// Pairing was rejected.
    AuthFailure { reason: String },
    /// Session ended (remote logout, browser crash, network loss).
    Disconnected { reason: String },
    /// Inbound message.
    Message(InboundMessage),
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from the underlying client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client session is gone; commands can no longer reach it.
    #[error("client session closed")]
    Closed,

    /// The bridge process could not be started.
    #[error("failed to spawn client: {0}")]
    Spawn(#[from] std::io::Error),

    /// The client reported a send failure.
    #[error("send failed: {0}")]
    Send(String),

    /// The client did not answer a command in time.
    #[error("client command timed out")]
    Timeout,
}

// ============================================================================
// Traits
// ============================================================================

/// Handle to one live client session. Exactly one per device.
#[async_trait]
pub trait WaClient: Send + Sync {
    /// Send a text message to a chat id, returning the provider message id.
    async fn send_message(&self, chat_id: &str, body: &str) -> Result<String, ClientError>;

    /// Whether the underlying session is still live. Never blocks.
    fn is_alive(&self) -> bool;

    /// OS process id of the client, when it runs out of process.
    fn pid(&self) -> Option<u32>;

    /// Tear the session down. Idempotent; graceful close first, the caller
    /// escalates to forceful termination via the pid.
    async fn destroy(&self);
}

/// Allocates client sessions. Injected into the session manager so tests
/// can substitute a scriptable client.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Spawn a session bound to the device's credential directory.
    ///
    /// Returns the handle and the receiver for the session's event stream.
    async fn spawn(
        &self,
        device_id: &str,
        data_dir: &Path,
    ) -> Result<(Arc<dyn WaClient>, mpsc::Receiver<ClientEvent>), ClientError>;
}
