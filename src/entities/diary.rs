use serde::{Deserialize, Serialize};

use super::{now_rfc3339, Entity, EntityId, RemoteOrder};

/// Emotions offered when writing an entry. Free text is accepted as well.
pub const EMOTIONS: [&str; 8] = [
    "😊 happy",
    "😢 sad",
    "😡 angry",
    "😰 anxious",
    "😴 tired",
    "😌 calm",
    "🤔 thoughtful",
    "😍 excited",
];

/// An emotion journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryEntry {
    pub id: EntityId,
    pub text: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

impl DiaryEntry {
    /// New entry written now. An empty emotion is stored as none.
    pub fn new(id: EntityId, text: impl Into<String>, emotion: Option<String>) -> Self {
        Self {
            id,
            text: text.into(),
            created_at: now_rfc3339(),
            emotion: emotion.filter(|e| !e.trim().is_empty()),
        }
    }
}

#[derive(Deserialize)]
struct DiaryRow {
    id: EntityId,
    text: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
}

impl Entity for DiaryEntry {
    const KIND: &'static str = "Diary entry";
    const STORAGE_KEY: &'static str = "diaryEntries";
    const REMOTE_TABLE: &'static str = "diary_entries";
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

    fn to_row(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "text": self.text,
            "created_at": self.created_at,
            "emotion": self.emotion,
        })
    }

    fn from_row(row: serde_json::Value) -> Result<Self, serde_json::Error> {
        let row: DiaryRow = serde_json::from_value(row)?;
        Ok(Self {
            id: row.id,
            text: row.text,
            created_at: row.created_at.unwrap_or_else(now_rfc3339),
            emotion: row.emotion.filter(|e| !e.is_empty()),
        })
    }
}
