use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::api::{ApiError, SharedState};
use super::channels::ChannelKey;
use super::sync::BoardMessage;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a board subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    ClientClosed,
    PongTimeout,
    SendFailed,
    ChannelClosed,
}

// ── WebSocket handler ────────────────────────────────────────────────

/// Subscribe to one board. Unknown boards are rejected before the upgrade.
pub async fn board_ws_handler(
    ws: WebSocketUpgrade,
    Path(board_id): Path<i64>,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.service.board_snapshot(board_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, snapshot.board.id)))
}

async fn handle_socket(socket: WebSocket, state: SharedState, board_id: i64) {
    let key = ChannelKey::board(board_id);
    // Subscribe before reading the initial snapshot so no update can slip
    // between the two.
    let rx = state.hub.subscribe(key);
    info!(channel = %key, subscribers = state.hub.subscriber_count(&key), "subscriber connected");

    let initial = match state.service.board_snapshot(board_id).await {
        Ok(snapshot) => BoardMessage::snapshot(snapshot),
        Err(e) => BoardMessage::error(board_id, e.to_string()),
    };

    let (sender, receiver) = socket.split();
    let reason = run_subscription(board_id, sender, receiver, rx, initial).await;

    state.hub.prune_idle();
    info!(
        channel = %key,
        ?reason,
        subscribers = state.hub.subscriber_count(&key),
        "subscriber disconnected"
    );
}

/// Only the fields needed to order messages; the payload is not decoded.
#[derive(Deserialize)]
struct MessageHeader {
    status: String,
    #[serde(default)]
    revision: Option<i64>,
}

/// Newest snapshot revision a client has been sent.
struct Subscriber {
    board_id: i64,
    sent_revision: Option<i64>,
}

impl Subscriber {
    fn new(board_id: i64) -> Self {
        Self {
            board_id,
            sent_revision: None,
        }
    }

    /// Whether a channel message should reach the client. Snapshots that are
    /// not newer than the last one sent are dropped; errors always pass.
    fn admit(&mut self, json: &str) -> bool {
        let header: MessageHeader = match serde_json::from_str(json) {
            Ok(header) => header,
            Err(e) => {
                warn!(board_id = self.board_id, error = %e, "dropping malformed board message");
                return false;
            }
        };
        match (header.status.as_str(), header.revision) {
            ("SUCCESS", Some(revision)) => {
                if self.sent_revision.is_some_and(|sent| revision <= sent) {
                    debug!(board_id = self.board_id, revision, "skipping stale snapshot");
                    return false;
                }
                self.sent_revision = Some(revision);
                true
            }
            _ => true,
        }
    }
}

/// Drive one subscriber: send `initial`, then forward newer board messages
/// while keeping the connection alive with ping/pong.
///
/// A lagging receiver skips what it missed, since the next snapshot
/// replaces everything before it. If no Pong arrives within
/// [`PONG_TIMEOUT`] of the last one, the connection is dropped.
pub(crate) async fn run_subscription<S, R, E>(
    board_id: i64,
    mut sink: S,
    mut stream: R,
    mut rx: broadcast::Receiver<String>,
    initial: BoardMessage,
) -> Disconnect
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let mut subscriber = Subscriber::new(board_id);
    let initial = match serde_json::to_string(&initial) {
        Ok(json) => json,
        Err(e) => {
            warn!(board_id, error = %e, "failed to serialize initial snapshot");
            return Disconnect::SendFailed;
        }
    };
    subscriber.admit(&initial);
    if sink.send(Message::Text(initial.into())).await.is_err() {
        return Disconnect::SendFailed;
    }

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    let reason = loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(board_id, "pong timeout, dropping subscriber");
                    break Disconnect::PongTimeout;
                }
                if sink.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break Disconnect::SendFailed;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(json) => {
                        if subscriber.admit(&json)
                            && sink.send(Message::Text(json.into())).await.is_err()
                        {
                            break Disconnect::SendFailed;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break Disconnect::ChannelClosed,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(board_id, skipped, "subscriber lagged");
                    }
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        break Disconnect::ClientClosed;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    let _ = sink.send(Message::Close(None)).await;
    reason
}
