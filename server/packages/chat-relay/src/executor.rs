//! Runs one engine turn as a child process and relays its output.
//!
//! The executor owns the full lifecycle: spawn, stdout line relay,
//! cancellation, exit classification, and registry release. Whatever
//! happens, consumers see at most the stream events followed by exactly
//! one terminal event, and the registry entry is gone afterwards.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use chat_relay_error::RelayError;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::abort::AbortRegistry;
use crate::events::{extract_session_id, StreamResponse};

/// Bounded queue between the turn task and the HTTP response body. A
/// slow client eventually stops us reading stdout, which propagates
/// back-pressure into the engine's pipe.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Stderr retained for error reporting, capped so a chatty engine
/// cannot grow the buffer without bound.
const STDERR_CAP_BYTES: usize = 8 * 1024;

/// UI command markers (`/review`, `/explain`) are routing hints for the
/// frontend; the engine gets the plain text.
pub fn strip_command_marker(message: &str) -> &str {
    message.strip_prefix('/').unwrap_or(message)
}

/// Failures whose message indicates user-initiated cancellation rather
/// than a genuine engine error.
fn is_abort_failure(message: &str) -> bool {
    message.contains("AbortError") || message.to_ascii_lowercase().contains("aborted")
}

/// Releases the registry entry when the turn task ends, on every exit
/// path including panics.
struct ReleaseGuard {
    registry: Arc<AbortRegistry>,
    request_id: String,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.registry.release(&self.request_id);
    }
}

/// Starts one turn and returns the event stream for it.
///
/// Registration happens before this returns, so a duplicate request id
/// fails here with a conflict instead of surfacing mid-stream.
pub fn spawn_turn(
    registry: Arc<AbortRegistry>,
    request_id: String,
    command: Command,
) -> Result<mpsc::Receiver<StreamResponse>, RelayError> {
    let cancel_rx = registry.register(&request_id)?;
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(run_turn(registry, request_id, command, cancel_rx, tx));
    Ok(rx)
}

async fn run_turn(
    registry: Arc<AbortRegistry>,
    request_id: String,
    mut command: Command,
    mut cancel_rx: oneshot::Receiver<()>,
    tx: mpsc::Sender<StreamResponse>,
) {
    let _guard = ReleaseGuard {
        registry,
        request_id: request_id.clone(),
    };
    let started = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            tracing::error!(request_id = %request_id, error = %err, "failed to spawn engine");
            let _ = tx
                .send(StreamResponse::Error {
                    error: format!("failed to start claude: {err}"),
                })
                .await;
            return;
        }
    };
    tracing::info!(
        request_id = %request_id,
        pid = child.id().unwrap_or_default(),
        "turn started"
    );

    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(collect_stderr(stderr)));

    let mut aborted = false;
    // A oneshot receiver must not be polled again once it has resolved.
    let mut cancel_armed = true;
    let mut read_failure: Option<String> = None;

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                signal = &mut cancel_rx, if cancel_armed => {
                    cancel_armed = false;
                    if signal.is_ok() {
                        aborted = true;
                        tracing::info!(request_id = %request_id, "abort requested, stopping engine");
                        let _ = child.start_kill();
                        // Keep reading: output already in the pipe still
                        // reaches the client before the terminal event.
                    }
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        // Non-JSON lines are relayed as raw strings; the
                        // client decides what to do with them.
                        let data = serde_json::from_str::<Value>(trimmed)
                            .unwrap_or_else(|_| Value::String(trimmed.to_string()));
                        if let Some(session_id) = extract_session_id(&data) {
                            tracing::info!(
                                request_id = %request_id,
                                session_id = %session_id,
                                "engine session established"
                            );
                        }
                        if tx.send(StreamResponse::ClaudeJson { data }).await.is_err() {
                            // Client went away; stop the engine and fall
                            // through to normal cleanup.
                            aborted = true;
                            let _ = child.start_kill();
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        read_failure = Some(format!("failed to read engine output: {err}"));
                        break;
                    }
                }
            }
        }
    }

    let status = child.wait().await;
    let stderr_text = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    let terminal = if aborted {
        StreamResponse::Aborted
    } else if let Some(message) = read_failure {
        StreamResponse::Error { error: message }
    } else {
        match status {
            Ok(status) if status.success() => StreamResponse::Done,
            Ok(status) => {
                let message = exit_failure_message(status.code(), &stderr_text);
                if is_abort_failure(&message) {
                    StreamResponse::Aborted
                } else {
                    StreamResponse::Error { error: message }
                }
            }
            Err(err) => StreamResponse::Error {
                error: format!("failed to wait for engine: {err}"),
            },
        }
    };

    tracing::info!(
        request_id = %request_id,
        outcome = terminal.kind(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "turn finished"
    );
    let _ = tx.send(terminal).await;
}

fn exit_failure_message(code: Option<i32>, stderr: &str) -> String {
    let mut message = match code {
        Some(code) => format!("claude exited with status {code}"),
        None => "claude terminated by signal".to_string(),
    };
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        message.push_str(": ");
        message.push_str(stderr);
    }
    message
}

async fn collect_stderr(stderr: tokio::process::ChildStderr) -> String {
    let mut text = String::new();
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(stderr = %line, "engine stderr");
        if text.len() < STDERR_CAP_BYTES {
            text.push_str(&line);
            text.push('\n');
        }
    }
    text
}
