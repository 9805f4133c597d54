use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Column names used when a board is created without an explicit layout.
pub const DEFAULT_COLUMNS: [&str; 5] = ["Backlog", "To Do", "In Progress", "Review", "Done"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub revision: i64,
    #[serde(default)]
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub id: i64,
    pub board_id: i64,
    pub name: String,
    pub order_index: i32,
    pub color: Option<String>,
    pub task_limit: Option<i32>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid item status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// A work item. `column_id` and `position` are either both set (placed) or
/// both `None` (detached). Only the reordering engine writes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: i64,
    pub column_id: Option<i64>,
    pub position: Option<i32>,
    pub title: String,
    pub description: String,
    pub status: ItemStatus,
    pub priority: Priority,
    pub due_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Item {
    pub fn is_placed(&self) -> bool {
        self.column_id.is_some() && self.position.is_some()
    }

    /// `(column, position)` if the item is placed.
    pub fn placement(&self) -> Option<(i64, i32)> {
        match (self.column_id, self.position) {
            (Some(column_id), Some(position)) => Some((column_id, position)),
            _ => None,
        }
    }
}

/// Attribute fields of an item; ordering is never part of this.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// Partial update of an item's attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    pub due_date: Option<String>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewColumn {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub task_limit: Option<i32>,
}

/// Partial update of a column. Position in the board is fixed at creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ColumnPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub task_limit: Option<i32>,
}

impl ColumnPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.task_limit.is_none()
    }
}

// Snapshot types pushed to subscribers

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardSnapshot {
    pub board: Board,
    pub columns: Vec<ColumnSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSnapshot {
    pub column: Column,
    pub items: Vec<Item>,
}

impl BoardSnapshot {
    pub fn revision(&self) -> i64 {
        self.board.revision
    }

    pub fn column(&self, column_id: i64) -> Option<&ColumnSnapshot> {
        self.columns.iter().find(|c| c.column.id == column_id)
    }

    pub fn item_count(&self) -> usize {
        self.columns.iter().map(|c| c.items.len()).sum()
    }
}

impl ColumnSnapshot {
    pub fn item_ids(&self) -> Vec<i64> {
        self.items.iter().map(|i| i.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_status_roundtrip() {
        for s in &["todo", "in_progress", "review", "done"] {
            let parsed: ItemStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_priority_roundtrip() {
        for s in &["low", "medium", "high", "urgent"] {
            let parsed: Priority = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("critical".parse::<Priority>().is_err());
    }

    #[test]
    fn test_serde_produces_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&ItemStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"urgent\"");
    }

    #[test]
    fn test_item_fields_defaults_from_json() {
        let fields: ItemFields = serde_json::from_str(r#"{"title": "Write docs"}"#).unwrap();
        assert_eq!(fields.title, "Write docs");
        assert_eq!(fields.status, ItemStatus::Todo);
        assert_eq!(fields.priority, Priority::Medium);
        assert!(fields.description.is_empty());
    }

    #[test]
    fn test_item_placement() {
        let mut item = Item {
            id: 1,
            column_id: Some(3),
            position: Some(0),
            title: "t".into(),
            description: String::new(),
            status: ItemStatus::Todo,
            priority: Priority::Medium,
            due_date: None,
            created_at: "2024-01-01".into(),
            updated_at: "2024-01-01".into(),
        };
        assert_eq!(item.placement(), Some((3, 0)));
        item.position = None;
        assert!(!item.is_placed());
        assert_eq!(item.placement(), None);
    }

    #[test]
    fn test_column_patch_from_json() {
        let patch: ColumnPatch = serde_json::from_str(r#"{"task_limit": 4}"#).unwrap();
        assert_eq!(patch.task_limit, Some(4));
        assert!(patch.name.is_none());
        assert!(!patch.is_empty());
        assert!(ColumnPatch::default().is_empty());
    }

    #[test]
    fn test_board_archived_defaults_to_false() {
        let board: Board = serde_json::from_str(
            r#"{"id": 1, "name": "b", "description": null, "revision": 2,
                "created_at": "2024-01-01", "updated_at": "2024-01-01"}"#,
        )
        .unwrap();
        assert!(!board.archived);
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(ItemPatch::default().is_empty());
        let patch = ItemPatch {
            priority: Some(Priority::High),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
