//! Reordering engine.
//!
//! Every operation here runs against one [`PositionStore`], which the
//! caller scopes to a single transaction. The engine validates first and
//! only then writes, so a rejected call never leaves a partial shift behind.
//!
//! Write discipline for each operation:
//!
//! 1. the moving item is parked (position cleared) so it holds no slot;
//! 2. the affected range is shifted one row at a time, in the order given by
//!    [`Shift::sort_for_write`];
//! 3. the item receives its final column and position last.
//!
//! With that order the `(column, position)` pairs of placed items stay
//! unique after every single write, not just at commit.

use std::collections::BTreeSet;

use serde::Serialize;

use super::models::{Column, Item};
use super::position::{self, Shift};
use crate::errors::{BoardError, BoardResult};

/// Store primitives the engine needs. Implementations must run every call
/// inside the same transaction for the lifetime of one engine operation.
pub trait PositionStore {
    fn item(&self, id: i64) -> BoardResult<Item>;

    fn column(&self, id: i64) -> BoardResult<Column>;

    /// Persist the item's `column_id` and `position`.
    fn save_item(&self, item: &Item) -> BoardResult<()>;

    /// Persist placements in slice order.
    fn save_all(&self, items: &[Item]) -> BoardResult<()> {
        for item in items {
            self.save_item(item)?;
        }
        Ok(())
    }

    /// Items of a column ordered by position (ties by id).
    fn items_in_column(&self, column_id: i64) -> BoardResult<Vec<Item>>;

    /// Every row whose `column_id` is the column, including rows without a
    /// position: placed rows by position, then unplaced rows by id.
    fn column_rows(&self, column_id: i64) -> BoardResult<Vec<Item>>;

    /// Items of a column with `position >= position`, ordered by position.
    fn items_from_position(&self, column_id: i64, position: i32) -> BoardResult<Vec<Item>>;

    /// Highest position in the column, or -1 when it is empty.
    fn max_position(&self, column_id: i64) -> BoardResult<i32>;

    /// Record that a board's content changed in this transaction.
    fn touch_board(&self, board_id: i64) -> BoardResult<()>;
}

/// Result of an engine operation: the item as stored afterwards and every
/// board whose subscribers must hear about it.
#[derive(Debug, Clone, Serialize)]
pub struct Placement {
    pub item: Item,
    #[serde(skip)]
    pub boards: BTreeSet<i64>,
}

pub struct ReorderEngine<'s, S: PositionStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: PositionStore + ?Sized> ReorderEngine<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Append the item to `column_id`. A placed item is detached from its
    /// current column first.
    pub fn add_to_end(&self, item_id: i64, column_id: i64) -> BoardResult<Placement> {
        let column = self.store.column(column_id)?;
        let mut item = self.store.item(item_id)?;
        let mut boards = BTreeSet::new();

        self.detach(&mut item, &mut boards)?;

        let max = self.store.max_position(column_id)?;
        item.column_id = Some(column_id);
        item.position = Some(max + 1);
        self.store.save_item(&item)?;
        self.touch(column.board_id, &mut boards)?;

        Ok(Placement { item, boards })
    }

    /// Insert the item at position 0 of `column_id`, pushing everything down.
    pub fn add_to_start(&self, item_id: i64, column_id: i64) -> BoardResult<Placement> {
        let column = self.store.column(column_id)?;
        let mut item = self.store.item(item_id)?;
        let mut boards = BTreeSet::new();

        self.detach(&mut item, &mut boards)?;

        self.shift(column_id, Shift::open_slot(0))?;
        item.column_id = Some(column_id);
        item.position = Some(0);
        self.store.save_item(&item)?;
        self.touch(column.board_id, &mut boards)?;

        Ok(Placement { item, boards })
    }

    /// Move a placed item to `new_position` inside its own column.
    ///
    /// Targets past the end land on the last slot. Moving to the current
    /// position writes nothing.
    pub fn move_to(&self, item_id: i64, new_position: i32) -> BoardResult<Placement> {
        position::validate_target(new_position)?;
        let mut item = self.store.item(item_id)?;
        let (column_id, current) = item
            .placement()
            .ok_or_else(|| BoardError::invalid(format!("Item {} is not in a column", item_id)))?;
        let column = self.store.column(column_id)?;
        let mut boards = BTreeSet::from([column.board_id]);

        let count = self.store.max_position(column_id)? + 1;
        let target = position::clamp_within(count, new_position);

        let Some(shift) = position::plan_move_within(current, target) else {
            return Ok(Placement { item, boards });
        };

        item.position = None;
        self.store.save_item(&item)?;
        self.shift(column_id, shift)?;
        item.position = Some(target);
        self.store.save_item(&item)?;
        self.touch(column.board_id, &mut boards)?;

        Ok(Placement { item, boards })
    }

    /// Move an item into `new_column_id` at `new_position`.
    ///
    /// Degrades to [`Self::move_to`] when the column does not change. A
    /// detached item is simply inserted at the target.
    pub fn move_to_column(
        &self,
        item_id: i64,
        new_column_id: i64,
        new_position: i32,
    ) -> BoardResult<Placement> {
        position::validate_target(new_position)?;
        let mut item = self.store.item(item_id)?;
        let dest = self.store.column(new_column_id)?;

        if item.column_id == Some(new_column_id) && item.position.is_some() {
            return self.move_to(item_id, new_position);
        }

        let mut boards = BTreeSet::new();
        self.detach(&mut item, &mut boards)?;

        let count = self.store.max_position(new_column_id)? + 1;
        let target = position::clamp_into(count, new_position);
        self.shift(new_column_id, Shift::open_slot(target))?;

        item.column_id = Some(new_column_id);
        item.position = Some(target);
        self.store.save_item(&item)?;
        self.touch(dest.board_id, &mut boards)?;

        Ok(Placement { item, boards })
    }

    /// Take the item out of its column and close the gap. The item row
    /// itself stays, detached.
    pub fn remove(&self, item_id: i64) -> BoardResult<Placement> {
        let mut item = self.store.item(item_id)?;
        let mut boards = BTreeSet::new();
        self.detach(&mut item, &mut boards)?;
        Ok(Placement { item, boards })
    }

    /// Renumber a column to `0..count` keeping its current order. Rows that
    /// sit in the column without a position are appended after the rest.
    ///
    /// Returns the number of rows rewritten.
    pub fn repair(&self, column_id: i64) -> BoardResult<usize> {
        let column = self.store.column(column_id)?;
        let items = self.store.column_rows(column_id)?;
        let rows: Vec<(i64, Option<i32>)> = items.iter().map(|i| (i.id, i.position)).collect();
        let plan = position::repair_plan(&rows);
        if plan.is_empty() {
            return Ok(0);
        }

        let mut changed: Vec<Item> = items
            .into_iter()
            .filter(|i| plan.iter().any(|(id, _)| *id == i.id))
            .collect();
        for item in changed.iter_mut() {
            item.position = None;
        }
        self.store.save_all(&changed)?;
        for item in changed.iter_mut() {
            item.position = plan.iter().find(|(id, _)| *id == item.id).map(|(_, p)| *p);
        }
        self.store.save_all(&changed)?;

        let mut boards = BTreeSet::new();
        self.touch(column.board_id, &mut boards)?;
        Ok(changed.len())
    }

    fn detach(&self, item: &mut Item, boards: &mut BTreeSet<i64>) -> BoardResult<()> {
        let Some((column_id, current)) = item.placement() else {
            // Half-placed rows only exist mid-transaction; normalise them.
            if item.column_id.is_some() {
                item.column_id = None;
                self.store.save_item(item)?;
            }
            return Ok(());
        };
        let column = self.store.column(column_id)?;

        item.column_id = None;
        item.position = None;
        self.store.save_item(item)?;
        self.shift(column_id, Shift::close_gap(current))?;
        self.touch(column.board_id, boards)
    }

    fn shift(&self, column_id: i64, shift: Shift) -> BoardResult<()> {
        let mut rows: Vec<Item> = self
            .store
            .items_from_position(column_id, shift.from)?
            .into_iter()
            .filter(|i| i.position.is_some_and(|p| shift.covers(p)))
            .collect();
        shift.sort_for_write(&mut rows, |i| i.position.unwrap_or_default());
        for row in rows.iter_mut() {
            row.position = row.position.map(|p| shift.apply(p));
        }
        self.store.save_all(&rows)
    }

    fn touch(&self, board_id: i64, boards: &mut BTreeSet<i64>) -> BoardResult<()> {
        boards.insert(board_id);
        self.store.touch_board(board_id)
    }
}
