use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use super::engine::{Placement, PositionStore, ReorderEngine};
use super::materializer;
use super::models::*;
use super::position;
use crate::errors::{BoardError, BoardResult};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> BoardResult<R>
    where
        F: FnOnce(&BoardDb) -> BoardResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| BoardError::Other(anyhow::Error::new(e).context("DB task panicked")))?
    }

}

/// A committed write and every board whose subscribers must be told.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub boards: BTreeSet<i64>,
}

impl Committed<Placement> {
    fn into_item(self) -> Committed<Item> {
        let mut boards = self.boards;
        boards.extend(self.value.boards);
        Committed {
            value: self.value.item,
            boards,
        }
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("Failed to enable WAL")?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened board database");
        let db = Self { conn };
        db.init(busy_timeout)?;
        Ok(db)
    }

    pub fn new(path: &Path) -> anyhow::Result<Self> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init(DEFAULT_BUSY_TIMEOUT)?;
        Ok(db)
    }

    fn init(&self, busy_timeout: Duration) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS boards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                revision INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS board_columns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                color TEXT,
                task_limit INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                column_id INTEGER REFERENCES board_columns(id) ON DELETE CASCADE,
                position INTEGER CHECK (position IS NULL OR position >= 0),
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'todo',
                priority TEXT NOT NULL DEFAULT 'medium',
                due_date TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_items_column_position
                ON items(column_id, position) WHERE position IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_columns_board ON board_columns(board_id);
            ",
        )?;

        // Additive migrations. Only "duplicate column" is ignored.
        match self.conn.execute(
            "ALTER TABLE boards ADD COLUMN archived INTEGER NOT NULL DEFAULT 0",
            [],
        ) {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add archived column: {}", e)),
        }
        Ok(())
    }

    // ── Units of work ─────────────────────────────────────────────────

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction and commit.
    ///
    /// The write lock is taken before the first read, so every position the
    /// closure reads stays valid until commit. Returning an error drops the
    /// transaction, which rolls it back.
    pub fn write<R>(
        &self,
        f: impl FnOnce(&UnitOfWork<'_>) -> BoardResult<R>,
    ) -> BoardResult<Committed<R>> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let uow = UnitOfWork {
            tx,
            touched: RefCell::default(),
        };
        let value = f(&uow)?;
        let boards = uow.touched.take();
        uow.tx.commit()?;
        Ok(Committed { value, boards })
    }

    /// Run `f` inside one deferred read transaction.
    pub fn read<R>(&self, f: impl FnOnce(&Connection) -> BoardResult<R>) -> BoardResult<R> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ── Boards ────────────────────────────────────────────────────────

    /// Create a board with the given columns, or [`DEFAULT_COLUMNS`] if none.
    pub fn create_board(
        &self,
        name: &str,
        description: Option<&str>,
        columns: Option<Vec<NewColumn>>,
    ) -> BoardResult<Committed<Board>> {
        let name = required("Board name", name)?;
        let columns = columns.unwrap_or_else(|| {
            DEFAULT_COLUMNS
                .iter()
                .map(|name| NewColumn {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect()
        });
        for column in &columns {
            validate_column(column)?;
        }

        self.write(|uow| {
            uow.conn().execute(
                "INSERT INTO boards (name, description) VALUES (?1, ?2)",
                params![name, description],
            )?;
            let board_id = uow.conn().last_insert_rowid();
            for (idx, column) in columns.iter().enumerate() {
                insert_column(uow.conn(), board_id, idx as i32, column)?;
            }
            uow.touch_board(board_id)?;
            require_board(uow.conn(), board_id)
        })
    }

    /// Boards with the given archived flag, oldest first.
    pub fn list_boards(&self, archived: bool) -> BoardResult<Vec<Board>> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} WHERE archived = ?1 ORDER BY id", BOARD_SELECT))?;
            let boards = stmt
                .query_map(params![archived], board_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(boards)
        })
    }

    pub fn get_board(&self, id: i64) -> BoardResult<Board> {
        self.read(|conn| require_board(conn, id))
    }

    /// Canonical, ordered view of a board read in one transaction.
    pub fn load_tree(&self, board_id: i64) -> BoardResult<BoardSnapshot> {
        self.read(|conn| materializer::load_tree(conn, board_id))
    }

    /// Archive or restore a board. Its columns and items are untouched.
    pub fn set_archived(&self, id: i64, archived: bool) -> BoardResult<Committed<Board>> {
        self.write(|uow| {
            require_board(uow.conn(), id)?;
            uow.conn().execute(
                "UPDATE boards SET archived = ?1 WHERE id = ?2",
                params![archived, id],
            )?;
            uow.touch_board(id)?;
            require_board(uow.conn(), id)
        })
    }

    pub fn delete_board(&self, id: i64) -> BoardResult<Committed<()>> {
        self.write(|uow| {
            require_board(uow.conn(), id)?;
            uow.conn()
                .execute("DELETE FROM boards WHERE id = ?1", params![id])?;
            uow.touched.borrow_mut().insert(id);
            Ok(())
        })
    }

    // ── Columns ───────────────────────────────────────────────────────

    /// Append a column to the board's column order.
    pub fn create_column(&self, board_id: i64, column: NewColumn) -> BoardResult<Committed<Column>> {
        validate_column(&column)?;
        self.write(|uow| {
            require_board(uow.conn(), board_id)?;
            let next: i32 = uow.conn().query_row(
                "SELECT COALESCE(MAX(order_index), -1) + 1 FROM board_columns WHERE board_id = ?1",
                params![board_id],
                |row| row.get(0),
            )?;
            let id = insert_column(uow.conn(), board_id, next, &column)?;
            uow.touch_board(board_id)?;
            uow.column(id)
        })
    }

    /// Rename or restyle a column. Omitted fields keep their value.
    pub fn update_column(&self, id: i64, patch: ColumnPatch) -> BoardResult<Committed<Column>> {
        if let Some(name) = patch.name.as_deref() {
            required("Column name", name)?;
        }
        if patch.task_limit.is_some_and(|limit| limit < 0) {
            return Err(BoardError::invalid("Task limit cannot be negative"));
        }
        self.write(|uow| {
            let column = uow.column(id)?;
            if patch.is_empty() {
                return Ok(column);
            }
            uow.conn().execute(
                "UPDATE board_columns SET
                    name = COALESCE(?1, name),
                    color = COALESCE(?2, color),
                    task_limit = COALESCE(?3, task_limit)
                 WHERE id = ?4",
                params![
                    patch.name.as_deref().map(str::trim),
                    patch.color,
                    patch.task_limit,
                    id,
                ],
            )?;
            uow.touch_board(column.board_id)?;
            uow.column(id)
        })
    }

    /// Delete a column together with the items placed in it.
    pub fn delete_column(&self, id: i64) -> BoardResult<Committed<()>> {
        self.write(|uow| {
            let column = uow.column(id)?;
            uow.conn()
                .execute("DELETE FROM board_columns WHERE id = ?1", params![id])?;
            uow.touch_board(column.board_id)
        })
    }

    pub fn column_items(&self, column_id: i64) -> BoardResult<Vec<Item>> {
        self.read(|conn| {
            require_column(conn, column_id)?;
            materializer::load_ordered(conn, column_id)
        })
    }

    /// Renumber a drifted column. Returns how many rows changed.
    pub fn repair_column(&self, column_id: i64) -> BoardResult<Committed<usize>> {
        self.write(|uow| ReorderEngine::new(uow).repair(column_id))
    }

    // ── Items ─────────────────────────────────────────────────────────

    /// Create an item and place it at the start or the end of `column_id`.
    pub fn create_item(
        &self,
        column_id: i64,
        fields: ItemFields,
        at_start: bool,
    ) -> BoardResult<Committed<Item>> {
        let title = required("Title", &fields.title)?.to_string();
        self.write(|uow| {
            require_column(uow.conn(), column_id)?;
            uow.conn().execute(
                "INSERT INTO items (title, description, status, priority, due_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    title,
                    fields.description,
                    fields.status.as_str(),
                    fields.priority.as_str(),
                    fields.due_date,
                ],
            )?;
            let id = uow.conn().last_insert_rowid();
            let engine = ReorderEngine::new(uow);
            if at_start {
                engine.add_to_start(id, column_id)
            } else {
                engine.add_to_end(id, column_id)
            }
        })
        .map(Committed::into_item)
    }

    pub fn get_item(&self, id: i64) -> BoardResult<Item> {
        self.read(|conn| require_item(conn, id))
    }

    /// Update an item's attributes. A `position` is applied as a move within
    /// the item's column in the same unit of work.
    pub fn update_item(
        &self,
        id: i64,
        patch: ItemPatch,
        position: Option<i32>,
    ) -> BoardResult<Committed<Item>> {
        if let Some(title) = patch.title.as_deref() {
            required("Title", title)?;
        }
        if let Some(position) = position {
            position::validate_target(position)?;
        }

        let committed = self.write(|uow| {
            let item = uow.item(id)?;
            let mut boards = BTreeSet::new();
            if !patch.is_empty() {
                uow.conn().execute(
                    "UPDATE items SET
                        title = COALESCE(?1, title),
                        description = COALESCE(?2, description),
                        status = COALESCE(?3, status),
                        priority = COALESCE(?4, priority),
                        due_date = COALESCE(?5, due_date),
                        updated_at = datetime('now')
                     WHERE id = ?6",
                    params![
                        patch.title.as_deref().map(str::trim),
                        patch.description,
                        patch.status.map(|s| s.as_str()),
                        patch.priority.map(|p| p.as_str()),
                        patch.due_date,
                        id,
                    ],
                )?;
                if let Some(column_id) = item.column_id {
                    let board_id = uow.column(column_id)?.board_id;
                    uow.touch_board(board_id)?;
                    boards.insert(board_id);
                }
            }
            if let Some(position) = position {
                let placed = ReorderEngine::new(uow).move_to(id, position)?;
                boards.extend(placed.boards);
            }
            Ok((uow.item(id)?, boards))
        })?;

        let (item, extra) = committed.value;
        let mut boards = committed.boards;
        boards.extend(extra);
        Ok(Committed { value: item, boards })
    }

    /// Set the status of every listed item in one unit of work. Any unknown
    /// id rejects the whole batch.
    pub fn set_status(&self, item_ids: &[i64], status: ItemStatus) -> BoardResult<Committed<Vec<Item>>> {
        if item_ids.is_empty() {
            return Err(BoardError::invalid("No items given"));
        }
        self.write(|uow| {
            let mut updated = Vec::with_capacity(item_ids.len());
            for &id in item_ids {
                let item = uow.item(id)?;
                uow.conn().execute(
                    "UPDATE items SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                    params![status.as_str(), id],
                )?;
                if let Some(column_id) = item.column_id {
                    uow.touch_board(uow.column(column_id)?.board_id)?;
                }
                updated.push(uow.item(id)?);
            }
            Ok(updated)
        })
    }

    /// Remove the item from its column, then delete the row.
    pub fn delete_item(&self, id: i64) -> BoardResult<Committed<()>> {
        self.write(|uow| {
            ReorderEngine::new(uow).remove(id)?;
            uow.conn()
                .execute("DELETE FROM items WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    // ── Reordering ────────────────────────────────────────────────────

    pub fn add_to_end(&self, item_id: i64, column_id: i64) -> BoardResult<Committed<Item>> {
        self.write(|uow| ReorderEngine::new(uow).add_to_end(item_id, column_id))
            .map(Committed::into_item)
    }

    pub fn add_to_start(&self, item_id: i64, column_id: i64) -> BoardResult<Committed<Item>> {
        self.write(|uow| ReorderEngine::new(uow).add_to_start(item_id, column_id))
            .map(Committed::into_item)
    }

    pub fn move_to(&self, item_id: i64, position: i32) -> BoardResult<Committed<Item>> {
        self.write(|uow| ReorderEngine::new(uow).move_to(item_id, position))
            .map(Committed::into_item)
    }

    pub fn move_to_column(
        &self,
        item_id: i64,
        column_id: i64,
        position: i32,
    ) -> BoardResult<Committed<Item>> {
        self.write(|uow| ReorderEngine::new(uow).move_to_column(item_id, column_id, position))
            .map(Committed::into_item)
    }

    pub fn remove(&self, item_id: i64) -> BoardResult<Committed<Item>> {
        self.write(|uow| ReorderEngine::new(uow).remove(item_id))
            .map(Committed::into_item)
    }
}

/// One `BEGIN IMMEDIATE` transaction scoped to a single operation.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
    touched: RefCell<BTreeSet<i64>>,
}

impl UnitOfWork<'_> {
    pub fn conn(&self) -> &Connection {
        &self.tx
    }
}

impl PositionStore for UnitOfWork<'_> {
    fn item(&self, id: i64) -> BoardResult<Item> {
        require_item(self.conn(), id)
    }

    fn column(&self, id: i64) -> BoardResult<Column> {
        require_column(self.conn(), id)
    }

    fn save_item(&self, item: &Item) -> BoardResult<()> {
        let changed = self.conn().execute(
            "UPDATE items SET column_id = ?1, position = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![item.column_id, item.position, item.id],
        )?;
        if changed == 0 {
            return Err(BoardError::ItemNotFound { id: item.id });
        }
        Ok(())
    }

    fn items_in_column(&self, column_id: i64) -> BoardResult<Vec<Item>> {
        materializer::load_ordered(self.conn(), column_id)
    }

    fn column_rows(&self, column_id: i64) -> BoardResult<Vec<Item>> {
        materializer::load_column_rows(self.conn(), column_id)
    }

    fn items_from_position(&self, column_id: i64, position: i32) -> BoardResult<Vec<Item>> {
        let mut stmt = self.conn().prepare_cached(&format!(
            "{} WHERE column_id = ?1 AND position >= ?2 ORDER BY position, id",
            ITEM_SELECT
        ))?;
        let rows = stmt
            .query_map(params![column_id, position], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ItemRow::into_item).collect()
    }

    fn max_position(&self, column_id: i64) -> BoardResult<i32> {
        let max = self.conn().query_row(
            "SELECT COALESCE(MAX(position), -1) FROM items WHERE column_id = ?1",
            params![column_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn touch_board(&self, board_id: i64) -> BoardResult<()> {
        if self.touched.borrow_mut().insert(board_id) {
            self.conn().execute(
                "UPDATE boards SET revision = revision + 1, updated_at = datetime('now')
                 WHERE id = ?1",
                params![board_id],
            )?;
        }
        Ok(())
    }
}

// ── Row helpers ───────────────────────────────────────────────────────

pub(crate) const BOARD_SELECT: &str =
    "SELECT id, name, description, revision, archived, created_at, updated_at FROM boards";

pub(crate) const COLUMN_SELECT: &str =
    "SELECT id, board_id, name, order_index, color, task_limit, created_at FROM board_columns";

pub(crate) const ITEM_SELECT: &str = "SELECT id, column_id, position, title, description, \
     status, priority, due_date, created_at, updated_at FROM items";

pub(crate) fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        revision: row.get(3)?,
        archived: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        order_index: row.get(3)?,
        color: row.get(4)?,
        task_limit: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Intermediate row struct for reading items before parsing the enum columns.
pub(crate) struct ItemRow {
    id: i64,
    column_id: Option<i64>,
    position: Option<i32>,
    title: String,
    description: String,
    status: String,
    priority: String,
    due_date: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ItemRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            column_id: row.get(1)?,
            position: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            status: row.get(5)?,
            priority: row.get(6)?,
            due_date: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    pub(crate) fn into_item(self) -> BoardResult<Item> {
        let status = ItemStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse item status")?;
        let priority = Priority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse item priority")?;

        Ok(Item {
            id: self.id,
            column_id: self.column_id,
            position: self.position,
            title: self.title,
            description: self.description,
            status,
            priority,
            due_date: self.due_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn require_board(conn: &Connection, id: i64) -> BoardResult<Board> {
    conn.query_row(
        &format!("{} WHERE id = ?1", BOARD_SELECT),
        params![id],
        board_from_row,
    )
    .optional()?
    .ok_or(BoardError::BoardNotFound { id })
}

pub(crate) fn require_column(conn: &Connection, id: i64) -> BoardResult<Column> {
    conn.query_row(
        &format!("{} WHERE id = ?1", COLUMN_SELECT),
        params![id],
        column_from_row,
    )
    .optional()?
    .ok_or(BoardError::ColumnNotFound { id })
}

pub(crate) fn require_item(conn: &Connection, id: i64) -> BoardResult<Item> {
    conn.query_row(
        &format!("{} WHERE id = ?1", ITEM_SELECT),
        params![id],
        ItemRow::from_row,
    )
    .optional()?
    .ok_or(BoardError::ItemNotFound { id })?
    .into_item()
}

fn insert_column(
    conn: &Connection,
    board_id: i64,
    order_index: i32,
    column: &NewColumn,
) -> BoardResult<i64> {
    conn.execute(
        "INSERT INTO board_columns (board_id, name, order_index, color, task_limit)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            board_id,
            column.name.trim(),
            order_index,
            column.color,
            column.task_limit
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn required<'a>(what: &str, value: &'a str) -> BoardResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::invalid(format!("{} cannot be empty", what)));
    }
    Ok(trimmed)
}

fn validate_column(column: &NewColumn) -> BoardResult<()> {
    required("Column name", &column.name)?;
    if column.task_limit.is_some_and(|limit| limit < 0) {
        return Err(BoardError::invalid("Task limit cannot be negative"));
    }
    Ok(())
}
