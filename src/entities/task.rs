use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{now_rfc3339, Entity, EntityId, RemoteOrder};

/// A to-do item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: EntityId,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Due day as `yyyy-mm-dd`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

/// Which tasks a listing shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskFilter {
    /// Every task.
    #[default]
    All,
    /// Tasks not yet completed.
    Open,
    /// Completed tasks.
    Done,
}

impl TaskFilter {
    /// Whether the task passes this filter.
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Open => !task.completed,
            TaskFilter::Done => task.completed,
        }
    }
}

impl std::str::FromStr for TaskFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(TaskFilter::All),
            "open" | "pending" => Ok(TaskFilter::Open),
            "done" | "completed" => Ok(TaskFilter::Done),
            _ => Err(format!("Unknown task filter: {}", s)),
        }
    }
}

impl Task {
    /// New open task created now.
    pub fn new(id: EntityId, text: impl Into<String>, due_date: Option<NaiveDate>) -> Self {
        Self {
            id,
            text: text.into(),
            completed: false,
            created_at: now_rfc3339(),
            completed_at: None,
            due_date: due_date.map(|d| d.format("%Y-%m-%d").to_string()),
        }
    }

    /// Flip completion, stamping or clearing `completed_at`.
    pub fn toggle(&mut self) {
        self.completed = !self.completed;
        self.completed_at = if self.completed {
            Some(now_rfc3339())
        } else {
            None
        };
    }

    /// Parsed due day, if any and well-formed.
    pub fn due(&self) -> Option<NaiveDate> {
        self.due_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }

    /// Open and due on or before `day`.
    pub fn is_due_by(&self, day: NaiveDate) -> bool {
        !self.completed && self.due().is_some_and(|due| due <= day)
    }
}

#[derive(Deserialize)]
struct TaskRow {
    id: EntityId,
    text: String,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
}

impl Entity for Task {
    const KIND: &'static str = "Task";
    const STORAGE_KEY: &'static str = "tasks";
    const REMOTE_TABLE: &'static str = "tasks";
    const REMOTE_ORDER: RemoteOrder = RemoteOrder {
        column: "created_at",
        ascending: false,
    };

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn timestamp(&self) -> &str {
        &self.created_at
    }

    /// Open tasks first, then most recent first.
    fn compare(a: &Self, b: &Self) -> Ordering {
        a.completed
            .cmp(&b.completed)
            .then_with(|| b.recency().cmp(&a.recency()))
    }

    fn to_row(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "text": self.text,
            "completed": self.completed,
            "created_at": self.created_at,
            "completed_at": self.completed_at,
            "due_date": self.due_date,
        })
    }

    fn from_row(row: serde_json::Value) -> Result<Self, serde_json::Error> {
        let row: TaskRow = serde_json::from_value(row)?;
        Ok(Self {
            id: row.id,
            text: row.text,
            completed: row.completed,
            created_at: row.created_at.unwrap_or_else(now_rfc3339),
            completed_at: row.completed_at,
            due_date: row.due_date,
        })
    }
}
