//! WebSocket progress stream.
//!
//! Pushes a progress snapshot every poll interval, and immediately whenever
//! the project's live pipeline publishes a stage change. Unknown projects get
//! a `not_found` snapshot on every tick.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use anigen_models::{ProgressSnapshot, ProjectId};

use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// GET /ws/:project_id
pub async fn ws_progress(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_progress_socket(socket, state, project_id))
}

async fn handle_progress_socket(socket: WebSocket, state: AppState, raw_id: String) {
    metrics::record_ws_connection("progress");
    let active = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    metrics::set_ws_active_connections(active);
    info!(project_id = %raw_id, "Progress WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    match ProjectId::parse(raw_id.as_str()) {
        Ok(project_id) => {
            let poll = Duration::from_secs(state.config.ws_poll_interval_secs);
            stream_progress(&mut sender, &mut receiver, &state, &project_id, poll).await;
        }
        Err(_) => {
            // Ids that can't name a project can't exist either
            let _ = send_snapshot(&mut sender, &ProgressSnapshot::not_found(&raw_id)).await;
            let _ = sender.send(Message::Close(None)).await;
        }
    }

    let active = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
    metrics::set_ws_active_connections(active);
    info!(project_id = %raw_id, "Progress WebSocket disconnected");
}

async fn stream_progress(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    project_id: &ProjectId,
    poll: Duration,
) {
    let mut ticker = interval(poll);
    let mut updates: Option<broadcast::Receiver<ProgressSnapshot>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Subscribe first; every change after this snapshot arrives on `updates`
                if updates.is_none() {
                    updates = state.pipelines.get(project_id).await.map(|p| p.subscribe());
                }
                let snapshot = match state.pipelines.progress_or_not_found(project_id).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(project_id = %project_id, "Failed to read progress: {}", e);
                        continue;
                    }
                };
                if send_snapshot(sender, &snapshot).await.is_err() {
                    break;
                }
            }
            update = next_update(&mut updates) => {
                match update {
                    Ok(snapshot) => {
                        if send_snapshot(sender, &snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(project_id = %project_id, skipped, "Progress subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => updates = None,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(project_id = %project_id, "WebSocket receive error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Next broadcast update, or never when not subscribed.
async fn next_update(
    updates: &mut Option<broadcast::Receiver<ProgressSnapshot>>,
) -> Result<ProgressSnapshot, broadcast::error::RecvError> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    snapshot: &ProgressSnapshot,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(snapshot) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize progress snapshot: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await?;
    metrics::record_ws_message_sent(&snapshot.stage);
    Ok(())
}
