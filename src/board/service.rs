use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::channels::ChannelTransport;
use super::db::{BoardDb, Committed, DbHandle};
use super::models::*;
use super::sync::{BoardSynchronizer, MutationState};
use crate::errors::BoardResult;

pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Entry point for every board operation.
///
/// Mutations run as one unit of work on the blocking pool. Once committed,
/// one broadcast per affected board is spawned on a [`TaskTracker`]; the
/// caller gets its result without waiting for subscribers.
#[derive(Clone)]
pub struct BoardService {
    db: DbHandle,
    sync: BoardSynchronizer,
    tracker: TaskTracker,
    conflict_retries: u32,
}

impl BoardService {
    pub fn new(db: DbHandle, transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            sync: BoardSynchronizer::new(db.clone(), transport),
            db,
            tracker: TaskTracker::new(),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Wait until every broadcast spawned so far has finished.
    pub async fn wait_for_broadcasts(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    // ── Reordering ────────────────────────────────────────────────────

    pub async fn add_to_end(&self, item_id: i64, column_id: i64) -> BoardResult<Item> {
        self.mutate("add_to_end", move |db| db.add_to_end(item_id, column_id))
            .await
    }

    pub async fn add_to_start(&self, item_id: i64, column_id: i64) -> BoardResult<Item> {
        self.mutate("add_to_start", move |db| db.add_to_start(item_id, column_id))
            .await
    }

    pub async fn move_to(&self, item_id: i64, new_position: i32) -> BoardResult<Item> {
        self.mutate("move_to", move |db| db.move_to(item_id, new_position))
            .await
    }

    pub async fn move_to_column(
        &self,
        item_id: i64,
        new_column_id: i64,
        new_position: i32,
    ) -> BoardResult<Item> {
        self.mutate("move_to_column", move |db| {
            db.move_to_column(item_id, new_column_id, new_position)
        })
        .await
    }

    pub async fn remove(&self, item_id: i64) -> BoardResult<Item> {
        self.mutate("remove", move |db| db.remove(item_id)).await
    }

    pub async fn repair_column(&self, column_id: i64) -> BoardResult<usize> {
        let changed = self
            .mutate("repair_column", move |db| db.repair_column(column_id))
            .await?;
        if changed > 0 {
            info!(column_id, changed, "repaired column positions");
        }
        Ok(changed)
    }

    // ── Boards and columns ────────────────────────────────────────────

    pub async fn create_board(
        &self,
        name: String,
        description: Option<String>,
        columns: Option<Vec<NewColumn>>,
    ) -> BoardResult<Board> {
        self.mutate("create_board", move |db| {
            db.create_board(&name, description.as_deref(), columns)
        })
        .await
    }

    pub async fn list_boards(&self, archived: bool) -> BoardResult<Vec<Board>> {
        self.db.call(move |db| db.list_boards(archived)).await
    }

    pub async fn set_archived(&self, board_id: i64, archived: bool) -> BoardResult<Board> {
        self.mutate("set_archived", move |db| db.set_archived(board_id, archived))
            .await
    }

    pub async fn board_snapshot(&self, board_id: i64) -> BoardResult<BoardSnapshot> {
        self.db.call(move |db| db.load_tree(board_id)).await
    }

    pub async fn delete_board(&self, board_id: i64) -> BoardResult<()> {
        self.mutate("delete_board", move |db| db.delete_board(board_id))
            .await
    }

    pub async fn create_column(&self, board_id: i64, column: NewColumn) -> BoardResult<Column> {
        self.mutate("create_column", move |db| db.create_column(board_id, column))
            .await
    }

    pub async fn update_column(&self, column_id: i64, patch: ColumnPatch) -> BoardResult<Column> {
        self.mutate("update_column", move |db| db.update_column(column_id, patch))
            .await
    }

    pub async fn delete_column(&self, column_id: i64) -> BoardResult<()> {
        self.mutate("delete_column", move |db| db.delete_column(column_id))
            .await
    }

    pub async fn column_items(&self, column_id: i64) -> BoardResult<Vec<Item>> {
        self.db.call(move |db| db.column_items(column_id)).await
    }

    // ── Items ─────────────────────────────────────────────────────────

    pub async fn create_item(
        &self,
        column_id: i64,
        fields: ItemFields,
        at_start: bool,
    ) -> BoardResult<Item> {
        self.mutate("create_item", move |db| {
            db.create_item(column_id, fields, at_start)
        })
        .await
    }

    pub async fn get_item(&self, item_id: i64) -> BoardResult<Item> {
        self.db.call(move |db| db.get_item(item_id)).await
    }

    pub async fn update_item(
        &self,
        item_id: i64,
        patch: ItemPatch,
        position: Option<i32>,
    ) -> BoardResult<Item> {
        self.mutate("update_item", move |db| {
            db.update_item(item_id, patch, position)
        })
        .await
    }

    pub async fn set_status(&self, item_ids: Vec<i64>, status: ItemStatus) -> BoardResult<Vec<Item>> {
        self.mutate("set_status", move |db| db.set_status(&item_ids, status))
            .await
    }

    pub async fn delete_item(&self, item_id: i64) -> BoardResult<()> {
        self.mutate("delete_item", move |db| db.delete_item(item_id))
            .await
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Run one write, retrying the whole unit of work on lock conflicts,
    /// then schedule a broadcast for each board it touched.
    async fn mutate<T, F>(&self, op: &'static str, f: F) -> BoardResult<T>
    where
        F: FnOnce(&BoardDb) -> BoardResult<Committed<T>> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let mutation_id = Uuid::new_v4();
        let span = info_span!("mutation", %mutation_id, op);

        async move {
            debug!(state = %MutationState::Received, "mutation received");
            let mut attempt = 0u32;
            let committed = loop {
                match self.db.call(f.clone()).await {
                    Ok(committed) => break committed,
                    Err(e) if e.is_retryable() && attempt < self.conflict_retries => {
                        attempt += 1;
                        warn!(attempt, error = %e, "write conflict, retrying");
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    }
                    Err(e) => {
                        debug!(state = %MutationState::Rejected, error = %e, "mutation rejected");
                        return Err(e);
                    }
                }
            };

            debug!(state = %MutationState::Applied, boards = ?committed.boards, "mutation applied");
            for board_id in &committed.boards {
                self.schedule_broadcast(*board_id);
            }
            Ok(committed.value)
        }
        .instrument(span)
        .await
    }

    fn schedule_broadcast(&self, board_id: i64) {
        let sync = self.sync.clone();
        self.tracker.spawn(
            async move {
                sync.publish_board_update(board_id).await;
            }
            .in_current_span(),
        );
    }
}
