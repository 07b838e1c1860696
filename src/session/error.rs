//! Session error types.
//!
//! Only actionable failures cross the public operation boundary. Races
//! inherent to driving an external asynchronous resource (stale events,
//! teardown contention) are absorbed and logged inside the state machine.

use thiserror::Error;

use crate::client::ClientError;
use crate::store::StoreError;

/// Errors surfaced by session manager operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No device record exists for the given id.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The device has no live connected session. Transient; the caller
    /// should re-initiate connect.
    #[error("device not connected: {0}")]
    DeviceNotConnected(String),

    /// Account-level send found no connected device to route through.
    #[error("no connected device for account {0}")]
    NoConnectedDevice(String),

    /// Creation-only insert found a live session already registered.
    #[error("a live session already exists for device {0}")]
    AlreadyExists(String),

    /// The QR retry cap was reached and the session was torn down. The
    /// caller must start a fresh connect.
    #[error("pairing abandoned for device {0}: qr retry cap reached")]
    PairingExhausted(String),

    /// Message body failed validation.
    #[error("message body must not be empty")]
    EmptyMessage,

    /// The underlying client failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
