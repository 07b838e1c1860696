//! Shared API types used by handlers and the session core.
//!
//! These types define the contract between the HTTP surface and clients.
//! Changes here affect both sides, preventing silent drift.

use serde::{Deserialize, Serialize};

// ============================================================================
// Device Status
// ============================================================================

/// Lifecycle status of a device session.
///
/// `Disconnected` and `AuthFailed` are terminal: recovering from either
/// requires a fresh connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// No session has been created for this device.
    Uninitialized,
    /// Client is starting up, no pairing challenge yet.
    Initializing,
    /// A QR challenge is available and waiting to be scanned.
    Scanning,
    /// Phone accepted the pairing, session not yet ready.
    Authenticated,
    /// Session is live and can send messages.
    Connected,
    /// Session is gone (explicit disconnect, retry cap, or remote logout).
    Disconnected,
    /// Pairing was rejected by the remote end.
    AuthFailed,
    /// Client initialization failed.
    Error,
}

impl DeviceStatus {
    /// Statuses under which a pairing challenge is a stale event.
    pub fn is_paired(self) -> bool {
        matches!(self, DeviceStatus::Authenticated | DeviceStatus::Connected)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Uninitialized => "uninitialized",
            DeviceStatus::Initializing => "initializing",
            DeviceStatus::Scanning => "scanning",
            DeviceStatus::Authenticated => "authenticated",
            DeviceStatus::Connected => "connected",
            DeviceStatus::Disconnected => "disconnected",
            DeviceStatus::AuthFailed => "auth_failed",
            DeviceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Webhook Events
// ============================================================================

/// Event categories a webhook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// A new QR challenge was issued.
    Qr,
    /// Device lifecycle change (connected, disconnected).
    Device,
    /// Inbound message received.
    Message,
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WebhookEventType::Qr => "qr",
            WebhookEventType::Device => "device",
            WebhookEventType::Message => "message",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Device Endpoints
// ============================================================================

/// Request body for `POST /api/v1/devices/{id}/connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Display name for the device (used in logs and webhook payloads).
    pub name: String,
    /// Optional phone number hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Response for connect / disconnect / status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusResponse {
    pub device_id: String,
    pub status: DeviceStatus,
}

/// Response for `GET /api/v1/devices/{id}/qr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrResponse {
    pub device_id: String,
    /// Raw pairing challenge string, absent unless the device is scanning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

// ============================================================================
// Send Endpoint
// ============================================================================

/// Request body for `POST /api/v1/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    /// Recipient phone or chat id. A bare number gets the default
    /// `@c.us` addressing suffix.
    pub recipient: String,
    /// Message body, must be non-empty.
    pub message: String,
}

/// Response for a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub message_id: String,
    pub device_id: String,
    pub recipient: String,
    pub status: String,
}
