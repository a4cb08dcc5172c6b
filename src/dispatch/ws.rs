//! WebSocket change feed.
//!
//! Handlers publish typed [`WsMessage`]s on one broadcast channel. Each
//! socket filters that stream for its own user, so a worker or client only
//! hears about jobs the REST API would let them read.

use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use super::api::{ApiError, ApiQuery, SharedState, can_view, in_scope, resolve_token};
use super::models::{Job, JobStatus, User, UserRole};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    JobCreated {
        job: Job,
    },
    JobUpdated {
        job: Job,
    },
    JobStatusChanged {
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
        #[serde(default)]
        worker_id: Option<i64>,
        #[serde(default)]
        client_id: Option<i64>,
    },
    JobDeleted {
        job_id: i64,
        #[serde(default)]
        worker_id: Option<i64>,
        #[serde(default)]
        client_id: Option<i64>,
    },
    NotificationCreated {
        user_id: i64,
        notification_id: i64,
    },
    StatsRecomputed {
        week_start: String,
    },
    UserChanged {
        user_id: i64,
    },
}

impl WsMessage {
    /// Whether `user` may receive this event. Job events follow the REST
    /// visibility rules, notifications go to their owner only, and
    /// financial and account events are admin-only.
    pub fn visible_to(&self, user: &User) -> bool {
        match self {
            WsMessage::JobCreated { job } | WsMessage::JobUpdated { job } => can_view(user, job),
            WsMessage::JobStatusChanged {
                worker_id,
                client_id,
                ..
            }
            | WsMessage::JobDeleted {
                worker_id,
                client_id,
                ..
            } => in_scope(user, *worker_id, *client_id),
            WsMessage::NotificationCreated { user_id, .. } => *user_id == user.id,
            WsMessage::StatsRecomputed { .. } | WsMessage::UserChanged { .. } => {
                user.role == UserRole::Admin
            }
        }
    }
}

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

// ── WebSocket handler ────────────────────────────────────────────────

/// Upgrade to a WebSocket after checking the `?token=` session; browsers
/// cannot set an Authorization header on the upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<WsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::Unauthorized("missing token".to_string()))?;
    let user = resolve_token(&state, token).await?;
    tracing::debug!(user_id = user.id, role = %user.role, "websocket connected");
    let rx = state.ws_tx.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, rx)))
}

async fn handle_socket(socket: WebSocket, user: User, rx: broadcast::Receiver<WsMessage>) {
    let (sender, receiver) = socket.split();
    let user_id = user.id;
    run_socket_loop(sender, receiver, rx, user).await;
    tracing::debug!(user_id, "websocket closed");
}

/// Wait for the next event `user` may see, serialized for the wire.
/// Returns `None` once the channel is closed. A lagging receiver skips
/// what it missed and carries on with the oldest retained event.
async fn next_outgoing(rx: &mut broadcast::Receiver<WsMessage>, user: &User) -> Option<String> {
    loop {
        match rx.recv().await {
            Ok(msg) if msg.visible_to(user) => match serde_json::to_string(&msg) {
                Ok(json) => return Some(json),
                Err(e) => tracing::error!(error = %e, "failed to serialize WsMessage"),
            },
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(user_id = user.id, skipped, "websocket subscriber lagged");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Forward the user's events and keep the connection alive with
/// ping/pong; a peer silent for [`PONG_TIMEOUT`] after a Ping is dropped.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<WsMessage>,
    user: User,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(user_id = user.id, "websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            outgoing = next_outgoing(&mut rx, &user) => {
                let Some(text) = outgoing else { break };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
