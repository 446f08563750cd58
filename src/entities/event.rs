use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityId, RemoteOrder};

/// Colour used when none is picked.
pub const DEFAULT_EVENT_COLOR: &str = "#2196F3";

/// A calendar event pinned to one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: EntityId,
    /// Day as `yyyy-mm-dd`.
    pub date: String,
    pub text: String,
    pub color: String,
}

/// Event as stored under its date key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEvent {
    #[serde(default)]
    id: Option<EntityId>,
    text: String,
    #[serde(default = "default_color")]
    color: String,
}

fn default_color() -> String {
    DEFAULT_EVENT_COLOR.to_string()
}

impl CalendarEvent {
    /// Event on `date` with an id of the form `<stamp>-<date>`.
    pub fn new(stamp: i64, date: NaiveDate, text: impl Into<String>, color: impl Into<String>) -> Self {
        let date = date.format("%Y-%m-%d").to_string();
        Self {
            id: EntityId::new(format!("{}-{}", stamp, date)),
            date,
            text: text.into(),
            color: color.into(),
        }
    }

    /// Parsed day, if well-formed.
    pub fn day(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()
    }
}

impl Entity for CalendarEvent {
    const KIND: &'static str = "Event";
    const STORAGE_KEY: &'static str = "@calendar_events";
    const REMOTE_TABLE: &'static str = "events";
    const REMOTE_ORDER: RemoteOrder = RemoteOrder {
        column: "date",
        ascending: true,
    };

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn timestamp(&self) -> &str {
        &self.date
    }

    /// Chronological by day; order within a day is left as inserted.
    fn compare(a: &Self, b: &Self) -> Ordering {
        a.recency().cmp(&b.recency())
    }

    fn to_row(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "date": self.date,
            "text": self.text,
            "color": self.color,
        })
    }

    fn from_row(row: serde_json::Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct EventRow {
            id: EntityId,
            date: String,
            text: String,
            #[serde(default)]
            color: Option<String>,
        }

        let row: EventRow = serde_json::from_value(row)?;
        Ok(Self {
            id: row.id,
            date: row.date,
            text: row.text,
            color: row.color.unwrap_or_else(default_color),
        })
    }

    /// Events are stored as `{ "yyyy-mm-dd": [{id, text, color}] }`.
    /// Entries without an id get one derived from the clock and their date.
    fn decode_collection(value: serde_json::Value) -> Result<Vec<Self>, serde_json::Error> {
        let by_date: BTreeMap<String, Vec<StoredEvent>> = serde_json::from_value(value)?;
        let mut stamp = Utc::now().timestamp_millis();
        let mut events = Vec::new();
        for (date, list) in by_date {
            for stored in list {
                let id = match stored.id {
                    Some(id) if !id.is_empty() => id,
                    _ => {
                        stamp += 1;
                        EntityId::new(format!("{}-{}", stamp, date))
                    }
                };
                events.push(CalendarEvent {
                    id,
                    date: date.clone(),
                    text: stored.text,
                    color: stored.color,
                });
            }
        }
        Ok(events)
    }

    fn encode_collection(items: &[Self]) -> Result<serde_json::Value, serde_json::Error> {
        let mut by_date: BTreeMap<&str, Vec<StoredEvent>> = BTreeMap::new();
        for event in items {
            by_date
                .entry(event.date.as_str())
                .or_default()
                .push(StoredEvent {
                    id: Some(event.id.clone()),
                    text: event.text.clone(),
                    color: event.color.clone(),
                });
        }
        serde_json::to_value(by_date)
    }
}
