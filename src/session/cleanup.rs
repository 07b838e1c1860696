//! Teardown of on-disk session artifacts.
//!
//! The credential directory can stay locked for a while after the client
//! process dies, so removal is retried with back-off. When every attempt
//! fails, the directory is renamed out of the way so a future reconnect of
//! the same device is never blocked. Cleanup is best-effort: the caller's
//! disconnect already succeeded by the time this runs.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Cleanup that could not remove the artifacts. Logged only; never fails
/// the disconnect itself.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// Removal kept failing and the rename fallback failed too.
    #[error("session artifacts left in place at {path}: {source}")]
    Incomplete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Directory holding one device's credential store.
pub fn session_dir(sessions_path: &Path, device_id: &str) -> PathBuf {
    sessions_path.join(format!("session-device-{device_id}"))
}

/// Remove a device's credential directory with bounded retries.
///
/// Missing directory is success (idempotent). On exhaustion the directory
/// is renamed to a trash name next to it.
pub async fn cleanup_session_dir(
    sessions_path: &Path,
    device_id: &str,
    max_attempts: u32,
    backoff: Duration,
) -> Result<(), CleanupError> {
    let dir = session_dir(sessions_path, device_id);

    let mut attempts = 0;
    loop {
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(device_id = %device_id, path = %dir.display(), "Session artifacts removed");
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(device_id = %device_id, "No session artifacts to clean");
                return Ok(());
            }
            Err(e) => {
                attempts += 1;
                if attempts < max_attempts {
                    warn!(
                        device_id = %device_id,
                        attempt = attempts,
                        max_attempts = max_attempts,
                        error = %e,
                        "Session artifacts locked, retrying cleanup"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }

                // Final fallback: move the locked directory aside so it
                // cannot block a future session for this device.
                let trash = sessions_path.join(format!(
                    "_trash_device_{device_id}_{}",
                    Utc::now().timestamp_millis()
                ));
                return match fs::rename(&dir, &trash).await {
                    Ok(()) => {
                        info!(
                            device_id = %device_id,
                            trash = %trash.display(),
                            "Locked session artifacts renamed aside"
                        );
                        Ok(())
                    }
                    Err(rename_err) if rename_err.kind() == ErrorKind::NotFound => Ok(()),
                    Err(rename_err) => Err(CleanupError::Incomplete {
                        path: dir,
                        source: rename_err,
                    }),
                };
            }
        }
    }
}
