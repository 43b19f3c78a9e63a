//! Stdio transport: a child process speaking newline-delimited JSON-RPC.

use super::{FrameSender, TransportEvent, TransportHandle};
use crate::config::ServiceConfig;
use indexmap::IndexMap;
use serde_json::Value;
use std::process::Stdio;
use switchboard_types::BridgeError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct StdioTransport {
    service: String,
    command: String,
    args: Vec<String>,
    env: IndexMap<String, String>,
}

impl StdioTransport {
    pub(crate) fn from_config(config: &ServiceConfig) -> Result<Self, BridgeError> {
        let command = config
            .command
            .clone()
            .ok_or_else(|| BridgeError::config("stdio transport requires a command"))?;
        Ok(Self {
            service: config.name.clone(),
            command,
            args: config.args.clone(),
            env: config.env.clone(),
        })
    }

    pub(crate) async fn open(
        &self,
        cancel: CancellationToken,
    ) -> Result<TransportHandle, BridgeError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Config env overlays the inherited parent environment.
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::transport(format!("failed to spawn '{}': {e}", self.command))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::transport("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::transport("child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::transport("child stderr unavailable"))?;

        let (out_tx, mut out_rx) = mpsc::channel::<Value>(64);
        let (evt_tx, evt_rx) = mpsc::channel::<TransportEvent>(64);

        // Writer: frames out, one JSON object per line.
        let writer_cancel = cancel.clone();
        let writer_evt = evt_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let mut line = match serde_json::to_vec(&frame) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!("dropping unserializable frame: {e}");
                                continue;
                            }
                        };
                        line.push(b'\n');
                        if let Err(e) = stdin.write_all(&line).await {
                            let _ = writer_evt
                                .send(TransportEvent::Closed {
                                    reason: format!("stdin write failed: {e}"),
                                })
                                .await;
                            break;
                        }
                        if let Err(e) = stdin.flush().await {
                            let _ = writer_evt
                                .send(TransportEvent::Closed {
                                    reason: format!("stdin flush failed: {e}"),
                                })
                                .await;
                            break;
                        }
                    }
                }
            }
        });

        // Reader: one frame per stdout line; unparseable lines are dropped.
        let reader_cancel = cancel.clone();
        let reader_evt = evt_tx.clone();
        let reader_service = self.service.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<Value>(trimmed) {
                                Ok(frame) => {
                                    if reader_evt.send(TransportEvent::Frame(frame)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(
                                    service = %reader_service,
                                    "discarding unparseable stdout line: {e}"
                                ),
                            }
                        }
                        Ok(None) => {
                            let _ = reader_evt
                                .send(TransportEvent::Closed { reason: "stdout closed".into() })
                                .await;
                            break;
                        }
                        Err(e) => {
                            let _ = reader_evt
                                .send(TransportEvent::Closed {
                                    reason: format!("stdout read failed: {e}"),
                                })
                                .await;
                            break;
                        }
                    }
                }
            }
        });

        // Child stderr goes to the log at debug level.
        let stderr_cancel = cancel.clone();
        let stderr_service = self.service.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    _ = stderr_cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => debug!(service = %stderr_service, "stderr: {line}"),
                        _ => break,
                    }
                }
            }
        });

        // Reaper: owns the child; exit becomes a transport error, and
        // cancellation kills the process so nothing is orphaned.
        let reaper_cancel = cancel.clone();
        let reaper_service = self.service.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = reaper_cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    debug!(service = %reaper_service, "child process reaped after cancel");
                }
                status = child.wait() => {
                    let reason = match status {
                        Ok(status) => format!("process exited: {status}"),
                        Err(e) => format!("process wait failed: {e}"),
                    };
                    let _ = evt_tx.send(TransportEvent::Closed { reason }).await;
                }
            }
        });

        Ok(TransportHandle {
            sender: FrameSender::new(out_tx),
            events: evt_rx,
            cancel,
        })
    }
}
