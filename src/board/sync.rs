//! Broadcast synchronization.
//!
//! After a mutation commits, [`BoardSynchronizer::publish_board_update`]
//! re-reads the board tree and pushes it, whole, to the board's channel.
//! Subscribers never receive deltas, so any message can replace their view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::channels::{ChannelKey, ChannelTransport};
use super::db::DbHandle;
use super::models::BoardSnapshot;
use crate::errors::BoardResult;

/// Message published on a board channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoardMessage {
    Success {
        board_id: i64,
        revision: i64,
        payload: BoardSnapshot,
        timestamp: DateTime<Utc>,
    },
    Error {
        board_id: i64,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl BoardMessage {
    pub fn snapshot(snapshot: BoardSnapshot) -> Self {
        Self::Success {
            board_id: snapshot.board.id,
            revision: snapshot.revision(),
            payload: snapshot,
            timestamp: Utc::now(),
        }
    }

    pub fn error(board_id: i64, message: impl Into<String>) -> Self {
        Self::Error {
            board_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn board_id(&self) -> i64 {
        match self {
            Self::Success { board_id, .. } | Self::Error { board_id, .. } => *board_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Lifecycle of one mutation request as seen by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationState {
    Received,
    Applied,
    SnapshotBuilt,
    Published,
    Rejected,
    PublishFailed,
}

impl MutationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Applied => "APPLIED",
            Self::SnapshotBuilt => "SNAPSHOT_BUILT",
            Self::Published => "PUBLISHED",
            Self::Rejected => "REJECTED",
            Self::PublishFailed => "PUBLISH_FAILED",
        }
    }
}

impl std::fmt::Display for MutationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct BoardSynchronizer {
    db: DbHandle,
    transport: Arc<dyn ChannelTransport>,
}

impl BoardSynchronizer {
    pub fn new(db: DbHandle, transport: Arc<dyn ChannelTransport>) -> Self {
        Self { db, transport }
    }

    /// Materialize `board_id` and publish the result on its channel.
    ///
    /// Must only run after the mutation committed. A failed load still
    /// publishes an `ERROR` message; nothing here touches stored state.
    pub async fn publish_board_update(&self, board_id: i64) -> MutationState {
        let key = ChannelKey::board(board_id);

        let (message, state) = match self.db.call(move |db| db.load_tree(board_id)).await {
            Ok(snapshot) => {
                debug!(board_id, revision = snapshot.revision(), state = %MutationState::SnapshotBuilt, "snapshot built");
                (BoardMessage::snapshot(snapshot), MutationState::Published)
            }
            Err(e) => {
                warn!(board_id, error = %e, "failed to materialize board");
                (BoardMessage::error(board_id, e.to_string()), MutationState::PublishFailed)
            }
        };

        match self.transport.publish(&key, &message).await {
            Ok(receivers) => {
                debug!(board_id, channel = %key, receivers, state = %state, "board update published");
                state
            }
            Err(e) => {
                error!(board_id, channel = %key, error = %e, "board broadcast failed");
                MutationState::PublishFailed
            }
        }
    }
}

/// Subscriber-side view that only moves forward.
///
/// A snapshot is applied only when its revision is newer than the last one
/// applied; error messages are recorded but never replace the view.
#[derive(Debug, Default)]
pub struct SnapshotFollower {
    current: Option<BoardSnapshot>,
    last_error: Option<String>,
}

impl SnapshotFollower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the message replaced the current view.
    pub fn apply(&mut self, message: BoardMessage) -> bool {
        match message {
            BoardMessage::Success {
                revision, payload, ..
            } => {
                if self.revision().is_some_and(|current| revision <= current) {
                    return false;
                }
                self.current = Some(payload);
                true
            }
            BoardMessage::Error { message, .. } => {
                self.last_error = Some(message);
                false
            }
        }
    }

    pub fn apply_json(&mut self, json: &str) -> BoardResult<bool> {
        let message: BoardMessage = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("Invalid board message: {}", e))?;
        Ok(self.apply(message))
    }

    pub fn current(&self) -> Option<&BoardSnapshot> {
        self.current.as_ref()
    }

    pub fn revision(&self) -> Option<i64> {
        self.current.as_ref().map(|s| s.revision())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::board::db::BoardDb;
    use crate::board::models::{Board, ItemFields};
    use crate::errors::BoardError;

    /// Transport that records every message it is handed.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, BoardMessage)>>,
        fail: bool,
    }

    #[async_trait]
    impl ChannelTransport for RecordingTransport {
        async fn publish(&self, key: &ChannelKey, message: &BoardMessage) -> BoardResult<usize> {
            if self.fail {
                return Err(BoardError::BroadcastFailure {
                    board_id: key.board_id(),
                    message: "transport down".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((key.to_string(), message.clone()));
            Ok(1)
        }
    }

    fn snapshot_at(revision: i64) -> BoardSnapshot {
        BoardSnapshot {
            board: Board {
                id: 1,
                name: "b".into(),
                description: None,
                revision,
                archived: false,
                created_at: "2024-01-01".into(),
                updated_at: "2024-01-01".into(),
            },
            columns: vec![],
        }
    }

    #[test]
    fn success_message_shape() {
        let json = serde_json::to_value(BoardMessage::snapshot(snapshot_at(4))).unwrap();
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["board_id"], 1);
        assert_eq!(json["revision"], 4);
        assert_eq!(json["payload"]["board"]["name"], "b");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn error_message_shape() {
        let json = serde_json::to_value(BoardMessage::error(9, "Board 9 not found")).unwrap();
        assert_eq!(json["status"], "ERROR");
        assert_eq!(json["board_id"], 9);
        assert_eq!(json["message"], "Board 9 not found");
    }

    #[test]
    fn follower_discards_stale_snapshots() {
        let mut follower = SnapshotFollower::new();
        assert!(follower.apply(BoardMessage::snapshot(snapshot_at(2))));
        assert!(!follower.apply(BoardMessage::snapshot(snapshot_at(1))));
        assert!(!follower.apply(BoardMessage::snapshot(snapshot_at(2))));
        assert_eq!(follower.revision(), Some(2));
        assert!(follower.apply(BoardMessage::snapshot(snapshot_at(3))));
        assert_eq!(follower.revision(), Some(3));
    }

    #[test]
    fn follower_keeps_view_on_error() {
        let mut follower = SnapshotFollower::new();
        follower.apply(BoardMessage::snapshot(snapshot_at(1)));
        let json = serde_json::to_string(&BoardMessage::error(1, "db down")).unwrap();
        assert!(!follower.apply_json(&json).unwrap());
        assert_eq!(follower.revision(), Some(1));
        assert_eq!(follower.last_error(), Some("db down"));
        assert!(follower.apply_json("not json").is_err());
    }

    #[test]
    fn mutation_state_renders_wire_names() {
        assert_eq!(MutationState::SnapshotBuilt.as_str(), "SNAPSHOT_BUILT");
        assert_eq!(MutationState::PublishFailed.to_string(), "PUBLISH_FAILED");
    }

    #[tokio::test]
    async fn publishes_current_tree() {
        let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let board = db
            .call(|db| db.create_board("Sync", None, None))
            .await
            .unwrap()
            .value;
        let column = db
            .call(move |db| db.load_tree(board.id))
            .await
            .unwrap()
            .columns[0]
            .column
            .id;
        db.call(move |db| {
            db.create_item(
                column,
                ItemFields {
                    title: "t".into(),
                    ..Default::default()
                },
                false,
            )
        })
        .await
        .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let sync = BoardSynchronizer::new(db, transport.clone());
        assert_eq!(sync.publish_board_update(board.id).await, MutationState::Published);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, format!("board/{}", board.id));
        match &sent[0].1 {
            BoardMessage::Success { payload, .. } => assert_eq!(payload.item_count(), 1),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_materialization_still_publishes_error() {
        let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let transport = Arc::new(RecordingTransport::default());
        let sync = BoardSynchronizer::new(db, transport.clone());

        assert_eq!(sync.publish_board_update(42).await, MutationState::PublishFailed);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].1.is_success());
        assert_eq!(sent[0].1.board_id(), 42);
    }

    #[tokio::test]
    async fn transport_failure_is_reported_not_raised() {
        let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let board = db
            .call(|db| db.create_board("Sync", None, None))
            .await
            .unwrap()
            .value;
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let sync = BoardSynchronizer::new(db.clone(), transport);
        assert_eq!(sync.publish_board_update(board.id).await, MutationState::PublishFailed);
        // Committed state is untouched.
        assert!(db.call(move |db| db.get_board(board.id)).await.is_ok());
    }
}
