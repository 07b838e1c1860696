//! Bridge subprocess client.
//!
//! Each device gets its own bridge process: the configured command is
//! spawned with the device id and credential directory, and the two sides
//! speak JSON Lines over stdio. Events (QR, ready, disconnect, inbound
//! messages) arrive on stdout; send commands go to stdin and are correlated
//! by request id.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use ulid::Ulid;

use super::{ClientError, ClientEvent, ClientFactory, InboundMessage, WaClient};

/// How long to wait for the bridge to answer a send before giving up.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between a shutdown command and a hard kill.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Wire Protocol
// ============================================================================

/// Commands written to the bridge's stdin.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeCommand {
    SendMessage {
        request_id: String,
        chat_id: String,
        body: String,
    },
    Shutdown,
}

/// Events read from the bridge's stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    Qr {
        challenge: String,
    },
    Authenticated,
    Ready {
        #[serde(default)]
        phone: Option<String>,
    },
    AuthFailure {
        reason: String,
    },
    Disconnected {
        reason: String,
    },
    Message(InboundMessage),
    CommandOk {
        request_id: String,
        message_id: String,
    },
    CommandError {
        request_id: String,
        message: String,
    },
}

// ============================================================================
// Bridge Client
// ============================================================================

type PendingSends = Arc<DashMap<String, oneshot::Sender<Result<String, String>>>>;

/// Handle to one bridge subprocess.
pub struct BridgeClient {
    device_id: String,
    cmd_tx: mpsc::Sender<BridgeCommand>,
    pending: PendingSends,
    alive: Arc<AtomicBool>,
    pid: Option<u32>,
}

#[async_trait]
impl WaClient for BridgeClient {
    async fn send_message(&self, chat_id: &str, body: &str) -> Result<String, ClientError> {
        if !self.is_alive() {
            return Err(ClientError::Closed);
        }

        let request_id = Ulid::new().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let command = BridgeCommand::SendMessage {
            request_id: request_id.clone(),
            chat_id: chat_id.to_string(),
            body: body.to_string(),
        };
        if self.cmd_tx.send(command).await.is_err() {
            self.pending.remove(&request_id);
            return Err(ClientError::Closed);
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Ok(message_id))) => Ok(message_id),
            Ok(Ok(Err(message))) => Err(ClientError::Send(message)),
            // Reply sender dropped: the IO task exited mid-send.
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(ClientError::Timeout)
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn destroy(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(device_id = %self.device_id, "Shutting down bridge client");
        let _ = self.cmd_tx.send(BridgeCommand::Shutdown).await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        // The IO task holds the child and kills it when the command channel
        // closes; dropping our sender is enough if the grace period lapsed.
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Spawns one bridge subprocess per device.
pub struct BridgeClientFactory {
    command: String,
}

impl BridgeClientFactory {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn spawn_child(&self, device_id: &str, data_dir: &Path) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--device-id")
            .arg(device_id)
            .arg("--data-dir")
            .arg(data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd.spawn()
    }
}

#[async_trait]
impl ClientFactory for BridgeClientFactory {
    async fn spawn(
        &self,
        device_id: &str,
        data_dir: &Path,
    ) -> Result<(Arc<dyn WaClient>, mpsc::Receiver<ClientEvent>), ClientError> {
        let mut child = self.spawn_child(device_id, data_dir)?;
        let pid = child.id();

        let stdin = child.stdin.take().expect("stdin should be piped");
        let stdout = child.stdout.take().expect("stdout should be piped");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (evt_tx, evt_rx) = mpsc::channel(256);
        let pending: PendingSends = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));

        let client = Arc::new(BridgeClient {
            device_id: device_id.to_string(),
            cmd_tx,
            pending: pending.clone(),
            alive: alive.clone(),
            pid,
        });

        tokio::spawn(run_io(
            device_id.to_string(),
            child,
            stdin,
            stdout,
            cmd_rx,
            evt_tx,
            pending,
            alive,
        ));

        Ok((client, evt_rx))
    }
}

// ============================================================================
// IO Task
// ============================================================================

/// Bridges the subprocess stdio to the client's channels.
///
/// Exits when the process dies, stdout closes, or the command channel is
/// dropped; in every case the child is killed and a final `Disconnected`
/// event is emitted so the event pump observes the loss.
#[allow(clippy::too_many_arguments)]
async fn run_io(
    device_id: String,
    mut child: Child,
    mut stdin: tokio::process::ChildStdin,
    stdout: tokio::process::ChildStdout,
    mut cmd_rx: mpsc::Receiver<BridgeCommand>,
    evt_tx: mpsc::Sender<ClientEvent>,
    pending: PendingSends,
    alive: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match serde_json::from_str::<BridgeEvent>(&line) {
                            Ok(event) => {
                                if !dispatch_event(event, &evt_tx, &pending).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    device_id = %device_id,
                                    line = %line,
                                    error = %e,
                                    "Failed to parse bridge event"
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(device_id = %device_id, "Bridge stdout closed");
                        break;
                    }
                    Err(e) => {
                        error!(device_id = %device_id, error = %e, "Error reading bridge stdout");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        let is_shutdown = matches!(command, BridgeCommand::Shutdown);
                        match serde_json::to_string(&command) {
                            Ok(json) => {
                                let line = format!("{json}\n");
                                if stdin.write_all(line.as_bytes()).await.is_err()
                                    || stdin.flush().await.is_err()
                                {
                                    error!(device_id = %device_id, "Failed to write to bridge stdin");
                                    break;
                                }
                                if is_shutdown {
                                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                                    break;
                                }
                            }
                            Err(e) => {
                                error!(device_id = %device_id, error = %e, "Failed to serialize command");
                            }
                        }
                    }
                    None => {
                        debug!(device_id = %device_id, "Bridge command channel closed");
                        break;
                    }
                }
            }

            status = child.wait() => {
                match status {
                    Ok(status) => {
                        debug!(device_id = %device_id, status = %status, "Bridge process exited");
                    }
                    Err(e) => {
                        error!(device_id = %device_id, error = %e, "Error waiting for bridge process");
                    }
                }
                finish(&device_id, &evt_tx, &pending, &alive, "process exited").await;
                return;
            }
        }
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
    finish(&device_id, &evt_tx, &pending, &alive, "bridge closed").await;
}

/// Forward one bridge event; returns false when the event channel is gone.
async fn dispatch_event(
    event: BridgeEvent,
    evt_tx: &mpsc::Sender<ClientEvent>,
    pending: &PendingSends,
) -> bool {
    let mapped = match event {
        BridgeEvent::Qr { challenge } => ClientEvent::Qr { challenge },
        BridgeEvent::Authenticated => ClientEvent::Authenticated,
        BridgeEvent::Ready { phone } => ClientEvent::Ready { phone },
        BridgeEvent::AuthFailure { reason } => ClientEvent::AuthFailure { reason },
        BridgeEvent::Disconnected { reason } => ClientEvent::Disconnected { reason },
        BridgeEvent::Message(message) => ClientEvent::Message(message),
        BridgeEvent::CommandOk {
            request_id,
            message_id,
        } => {
            if let Some((_, reply)) = pending.remove(&request_id) {
                let _ = reply.send(Ok(message_id));
            }
            return true;
        }
        BridgeEvent::CommandError {
            request_id,
            message,
        } => {
            if let Some((_, reply)) = pending.remove(&request_id) {
                let _ = reply.send(Err(message));
            }
            return true;
        }
    };
    evt_tx.send(mapped).await.is_ok()
}

/// Mark the client dead, fail outstanding sends, emit a final disconnect.
async fn finish(
    device_id: &str,
    evt_tx: &mpsc::Sender<ClientEvent>,
    pending: &PendingSends,
    alive: &AtomicBool,
    reason: &str,
) {
    alive.store(false, Ordering::Release);
    pending.retain(|_, _| false);
    let _ = evt_tx
        .send(ClientEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await;
    debug!(device_id = %device_id, "Bridge IO task stopped");
}
