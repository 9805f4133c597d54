//! Position index for a single column.
//!
//! Positions of the items placed in one column always form the dense
//! sequence `0..count`. Everything in this module is pure: it plans which
//! range of positions has to move and in which order rows must be written,
//! and the engine applies those plans against the store.

use crate::errors::{BoardError, BoardResult};

/// A contiguous block of positions that moves by `delta` (+1 or -1).
///
/// `to` is inclusive; `None` means "through the end of the column".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub from: i32,
    pub to: Option<i32>,
    pub delta: i32,
}

impl Shift {
    /// Make room at `at`: every position `>= at` moves up by one.
    pub fn open_slot(at: i32) -> Self {
        Self {
            from: at,
            to: None,
            delta: 1,
        }
    }

    /// Close the hole left at `removed`: every position `> removed` moves down.
    pub fn close_gap(removed: i32) -> Self {
        Self {
            from: removed + 1,
            to: None,
            delta: -1,
        }
    }

    pub fn covers(&self, position: i32) -> bool {
        position >= self.from && self.to.is_none_or(|to| position <= to)
    }

    pub fn apply(&self, position: i32) -> i32 {
        if self.covers(position) {
            position + self.delta
        } else {
            position
        }
    }

    /// Rows must be written so that no intermediate state holds a duplicate:
    /// moving down goes lowest-first, moving up goes highest-first.
    pub fn sort_for_write<T>(&self, rows: &mut [T], position_of: impl Fn(&T) -> i32) {
        if self.delta < 0 {
            rows.sort_by_key(|r| position_of(r));
        } else {
            rows.sort_by_key(|r| std::cmp::Reverse(position_of(r)));
        }
    }
}

/// Rejects negative targets before anything is read or written.
pub fn validate_target(position: i32) -> BoardResult<()> {
    if position < 0 {
        return Err(BoardError::invalid("Position cannot be negative"));
    }
    Ok(())
}

/// Target for a move inside a column of `count` items (the moved item included).
pub fn clamp_within(count: i32, target: i32) -> i32 {
    target.min((count - 1).max(0))
}

/// Target for an insert into a column currently holding `count` items.
pub fn clamp_into(count: i32, target: i32) -> i32 {
    target.min(count.max(0))
}

/// Shift needed to move an item from `current` to `target` in the same column.
/// `None` when the move is a no-op.
pub fn plan_move_within(current: i32, target: i32) -> Option<Shift> {
    match target.cmp(&current) {
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Greater => Some(Shift {
            from: current + 1,
            to: Some(target),
            delta: -1,
        }),
        std::cmp::Ordering::Less => Some(Shift {
            from: target,
            to: Some(current - 1),
            delta: 1,
        }),
    }
}

/// True when `positions` is exactly `{0, .., n-1}`.
pub fn is_dense(positions: impl IntoIterator<Item = i32>) -> bool {
    let mut sorted: Vec<i32> = positions.into_iter().collect();
    sorted.sort_unstable();
    sorted.iter().enumerate().all(|(idx, pos)| *pos == idx as i32)
}

/// New positions for a column whose ordering drifted.
///
/// `rows` is `(id, position)` in current display order; the result lists only
/// the rows whose position has to change, with their dense replacement.
pub fn repair_plan(rows: &[(i64, Option<i32>)]) -> Vec<(i64, i32)> {
    rows.iter()
        .enumerate()
        .filter_map(|(idx, (id, pos))| {
            let want = idx as i32;
            (*pos != Some(want)).then_some((*id, want))
        })
        .collect()
}
