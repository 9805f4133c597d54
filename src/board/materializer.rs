//! Container materializer: turns stored rows into the ordered tree that
//! subscribers receive.
//!
//! Both loaders take a plain `&Connection` so they run inside whatever
//! transaction the caller opened, read-only for snapshots and the engine's
//! unit of work for `items_in_column`.

use rusqlite::{Connection, params};

use super::db::{COLUMN_SELECT, ITEM_SELECT, ItemRow, column_from_row, require_board};
use super::models::{BoardSnapshot, ColumnSnapshot, Item};
use crate::errors::BoardResult;

/// Placed items of a column, ascending by position.
pub fn load_ordered(conn: &Connection, column_id: i64) -> BoardResult<Vec<Item>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{} WHERE column_id = ?1 AND position IS NOT NULL ORDER BY position, id",
        ITEM_SELECT
    ))?;
    let rows = stmt
        .query_map(params![column_id], ItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(ItemRow::into_item).collect()
}

/// Every row assigned to a column, placed ones first by position, then rows
/// that lost their position, by id.
pub fn load_column_rows(conn: &Connection, column_id: i64) -> BoardResult<Vec<Item>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{} WHERE column_id = ?1 ORDER BY position IS NULL, position, id",
        ITEM_SELECT
    ))?;
    let rows = stmt
        .query_map(params![column_id], ItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(ItemRow::into_item).collect()
}

/// Board, its columns by `order_index`, and each column's ordered items.
pub fn load_tree(conn: &Connection, board_id: i64) -> BoardResult<BoardSnapshot> {
    let board = require_board(conn, board_id)?;

    let mut stmt = conn.prepare_cached(&format!(
        "{} WHERE board_id = ?1 ORDER BY order_index, id",
        COLUMN_SELECT
    ))?;
    let columns = stmt
        .query_map(params![board_id], column_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let columns = columns
        .into_iter()
        .map(|column| {
            let items = load_ordered(conn, column.id)?;
            Ok(ColumnSnapshot { column, items })
        })
        .collect::<BoardResult<Vec<_>>>()?;

    Ok(BoardSnapshot { board, columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use crate::board::models::{ItemFields, NewColumn};
    use crate::errors::BoardError;

    fn item(db: &BoardDb, column_id: i64, title: &str) -> Item {
        db.create_item(
            column_id,
            ItemFields {
                title: title.into(),
                ..Default::default()
            },
            false,
        )
        .unwrap()
        .value
    }

    #[test]
    fn tree_orders_columns_and_items() {
        let db = BoardDb::new_in_memory().unwrap();
        let board = db
            .create_board(
                "Release",
                None,
                Some(vec![
                    NewColumn {
                        name: "Doing".into(),
                        ..Default::default()
                    },
                    NewColumn {
                        name: "Done".into(),
                        ..Default::default()
                    },
                ]),
            )
            .unwrap()
            .value;
        let tree = db.load_tree(board.id).unwrap();
        let (doing, done) = (tree.columns[0].column.id, tree.columns[1].column.id);

        let first = item(&db, doing, "first");
        item(&db, doing, "second");
        item(&db, done, "shipped");
        db.move_to(first.id, 1).unwrap();

        let tree = db.load_tree(board.id).unwrap();
        assert_eq!(tree.columns.len(), 2);
        assert_eq!(tree.columns[0].column.name, "Doing");
        let titles: Vec<&str> = tree.columns[0]
            .items
            .iter()
            .map(|i| i.title.as_str())
            .collect();
        assert_eq!(titles, vec!["second", "first"]);
        assert_eq!(tree.column(done).unwrap().items.len(), 1);
        assert_eq!(tree.item_count(), 3);
        assert_eq!(tree.revision(), db.get_board(board.id).unwrap().revision);
    }

    #[test]
    fn detached_items_are_not_materialized() {
        let db = BoardDb::new_in_memory().unwrap();
        let board = db.create_board("B", None, None).unwrap().value;
        let column = db.load_tree(board.id).unwrap().columns[0].column.id;
        let a = item(&db, column, "a");
        item(&db, column, "b");
        db.remove(a.id).unwrap();

        let tree = db.load_tree(board.id).unwrap();
        assert_eq!(tree.item_count(), 1);
        let ordered = db.column_items(column).unwrap();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].position, Some(0));
    }

    #[test]
    fn missing_board_is_not_found() {
        let db = BoardDb::new_in_memory().unwrap();
        let err = db.load_tree(77).unwrap_err();
        assert!(matches!(err, BoardError::BoardNotFound { id: 77 }));
    }
}
