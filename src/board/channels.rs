//! Per-board broadcast channels.
//!
//! A [`ChannelTransport`] delivers serialized [`BoardMessage`]s to whoever
//! listens on a channel key. [`BroadcastHub`] is the in-process transport the
//! server uses: one `tokio::sync::broadcast` channel per board, created on
//! first subscription.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::sync::BoardMessage;
use crate::errors::{BoardError, BoardResult};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Channel name for one board, rendered as `board/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey(i64);

impl ChannelKey {
    pub fn board(board_id: i64) -> Self {
        Self(board_id)
    }

    pub fn board_id(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "board/{}", self.0)
    }
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Deliver `message` to every current subscriber of `key`.
    /// Returns how many subscribers received it.
    async fn publish(&self, key: &ChannelKey, message: &BoardMessage) -> BoardResult<usize>;
}

pub struct BroadcastHub {
    channels: DashMap<ChannelKey, broadcast::Sender<String>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, key: ChannelKey) -> broadcast::Receiver<String> {
        self.channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.channels
            .get(key)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels nobody listens on anymore.
    pub fn prune_idle(&self) {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl ChannelTransport for BroadcastHub {
    async fn publish(&self, key: &ChannelKey, message: &BoardMessage) -> BoardResult<usize> {
        let json = serde_json::to_string(message).map_err(|e| BoardError::BroadcastFailure {
            board_id: key.board_id(),
            message: format!("Failed to serialize board message: {}", e),
        })?;
        let Some(tx) = self.channels.get(key) else {
            return Ok(0);
        };
        // A send error only means there are no receivers right now.
        Ok(tx.send(json).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_message(board_id: i64) -> BoardMessage {
        BoardMessage::error(board_id, "boom")
    }

    #[test]
    fn channel_key_renders_board_path() {
        assert_eq!(ChannelKey::board(12).to_string(), "board/12");
    }

    #[tokio::test]
    async fn publish_reaches_only_that_board() {
        let hub = BroadcastHub::new(8);
        let mut one = hub.subscribe(ChannelKey::board(1));
        let mut two = hub.subscribe(ChannelKey::board(2));

        let delivered = hub
            .publish(&ChannelKey::board(1), &error_message(1))
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        let json = one.recv().await.unwrap();
        assert!(json.contains("\"status\":\"ERROR\""));
        assert!(json.contains("\"board_id\":1"));
        assert!(two.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let hub = BroadcastHub::default();
        let delivered = hub
            .publish(&ChannelKey::board(5), &error_message(5))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn prune_drops_idle_channels() {
        let hub = BroadcastHub::new(4);
        let rx = hub.subscribe(ChannelKey::board(3));
        assert_eq!(hub.subscriber_count(&ChannelKey::board(3)), 1);
        drop(rx);
        hub.prune_idle();
        assert_eq!(hub.subscriber_count(&ChannelKey::board(3)), 0);
        assert!(hub.channels.is_empty());
    }
}
