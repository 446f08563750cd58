//! Domain entities persisted locally and mirrored to the hosted backend.
//!
//! All four collections share one shape: a string-keyed record with a
//! recency field. The [`Entity`] trait captures what the reconciliation
//! routine and the repositories need to know about each of them: where the
//! collection lives locally, which remote table mirrors it, how rows map to
//! and from the remote schema, and how a collection is ordered.

mod decision;
mod diary;
mod event;
mod task;


pub use decision::{Decision, Point, PointSide, Sentiment, MAX_POINTS_PER_SIDE, MAX_RATING};
pub use diary::{DiaryEntry, EMOTIONS};
pub use event::{CalendarEvent, DEFAULT_EVENT_COLOR};
pub use task::{Task, TaskFilter};

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of an entity within its collection.
///
/// Older clients wrote numeric ids (milliseconds since the epoch) while newer
/// ones write strings, so deserialization accepts both and serialization
/// always produces a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty identifier, which some legacy payloads carry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = EntityId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer identifier")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(EntityId(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(EntityId(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(EntityId(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(EntityId(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if v.fract() == 0.0 && v.is_finite() {
                    Ok(EntityId(format!("{}", v as i64)))
                } else {
                    Err(E::custom(format!("non-integer identifier: {}", v)))
                }
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Ordering applied to a remote `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteOrder {
    /// Column to order by.
    pub column: &'static str,
    /// Ascending when true, descending otherwise.
    pub ascending: bool,
}

/// A record kind that lives in a local collection and a remote table.
pub trait Entity:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Human-readable kind, used in logs and errors.
    const KIND: &'static str;
    /// Key of the collection in the local key/value store.
    const STORAGE_KEY: &'static str;
    /// Remote table mirroring the collection.
    const REMOTE_TABLE: &'static str;
    /// Order requested from the remote table.
    const REMOTE_ORDER: RemoteOrder;

    /// Identifier, unique within the collection.
    fn id(&self) -> &EntityId;

    /// Raw recency field as stored.
    fn timestamp(&self) -> &str;

    /// Milliseconds since the epoch of [`Entity::timestamp`], 0 when unparsable.
    fn recency(&self) -> i64 {
        parse_timestamp(self.timestamp())
    }

    /// Display order of the collection. The default is most recent first.
    fn compare(a: &Self, b: &Self) -> Ordering {
        b.recency().cmp(&a.recency())
    }

    /// Remote row for this entity, without the owner column.
    fn to_row(&self) -> serde_json::Value;

    /// Decode one remote row.
    fn from_row(row: serde_json::Value) -> Result<Self, serde_json::Error>;

    /// Decode the stored representation of a whole collection.
    fn decode_collection(value: serde_json::Value) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Encode a whole collection for storage.
    fn encode_collection(items: &[Self]) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(items)
    }
}

/// Stable in-place sort by the entity's display order.
pub fn sort_collection<E: Entity>(items: &mut [E]) {
    items.sort_by(E::compare);
}

/// Parse a stored timestamp into milliseconds since the epoch.
///
/// Accepts RFC 3339, naive ISO date-times (taken as UTC), plain dates and the
/// two locale renderings older app versions wrote. Anything else maps to 0.
pub fn parse_timestamp(raw: &str) -> i64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.timestamp_millis();
    }

    const NAIVE_FORMATS: [&str; 5] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%m/%d/%Y, %I:%M:%S %p",
        "%d/%m/%Y, %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return dt.and_utc().timestamp_millis();
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0);
    }

    tracing::trace!(timestamp = raw, "Unparsable timestamp, treating as epoch");
    0
}

/// Current time as an RFC 3339 string, the format new records are written in.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Millisecond-clock id source.
///
/// Ids are the current time in milliseconds, bumped forward when two calls
/// land in the same millisecond so that ids handed out by one generator never
/// collide.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    /// Create a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next strictly increasing millisecond value.
    pub fn next_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last.load(AtomicOrdering::Relaxed);
        loop {
            let candidate = if now > current { now } else { current + 1 };
            match self.last.compare_exchange_weak(
                current,
                candidate,
                AtomicOrdering::SeqCst,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    /// Next identifier.
    pub fn next_id(&self) -> EntityId {
        EntityId::from(self.next_millis())
    }
}
