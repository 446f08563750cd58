//! On-device persistence.
//!
//! The app keeps every collection as one JSON document under a fixed key in a
//! key/value store, and rewrites the whole document on every mutation. This
//! module provides that store (backed by SQLite), typed helpers to read and
//! write entity collections through it, and the durable outbox table used by
//! [`crate::sync::SyncQueue`].

mod sqlite;

pub use sqlite::{OutboxRecord, SqliteStore};

use async_trait::async_trait;
use tracing::warn;

use crate::entities::Entity;
use crate::error::{StorageError, StorageResult};

/// Key holding the holiday overlay preference (JSON bool).
pub const HOLIDAYS_ENABLED_KEY: &str = "@holidays_enabled";

/// Process-wide key/value store holding JSON documents.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value under `key`.
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>>;
    /// Write (insert or overwrite) the raw value under `key`.
    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Remove `key`; absent keys are not an error.
    async fn remove_item(&self, key: &str) -> StorageResult<()>;
    /// Every key currently stored.
    async fn all_keys(&self) -> StorageResult<Vec<String>>;
    /// Remove several keys at once.
    async fn multi_remove(&self, keys: &[String]) -> StorageResult<()>;
}

/// Read a collection strictly: a missing key is an empty collection, a
/// value that does not decode is an error.
pub async fn read_collection<E: Entity>(store: &dyn KeyValueStore) -> StorageResult<Vec<E>> {
    let Some(raw) = store.get_item(E::STORAGE_KEY).await? else {
        return Ok(Vec::new());
    };
    let corrupt = |e: serde_json::Error| StorageError::Corrupt {
        key: E::STORAGE_KEY.to_string(),
        message: e.to_string(),
    };
    let value: serde_json::Value = serde_json::from_str(&raw).map_err(corrupt)?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    E::decode_collection(value).map_err(corrupt)
}

/// Read a collection leniently: any failure yields an empty collection.
///
/// This is the cache-read behaviour every screen relies on. A corrupt
/// document is logged and then overwritten by the next save.
pub async fn load_collection<E: Entity>(store: &dyn KeyValueStore) -> Vec<E> {
    match read_collection::<E>(store).await {
        Ok(items) => items,
        Err(e) => {
            warn!(key = E::STORAGE_KEY, error = %e, "Local collection unreadable, treating as empty");
            Vec::new()
        }
    }
}

/// Rewrite a whole collection.
pub async fn save_collection<E: Entity>(store: &dyn KeyValueStore, items: &[E]) -> StorageResult<()> {
    let value = E::encode_collection(items).map_err(|e| StorageError::Corrupt {
        key: E::STORAGE_KEY.to_string(),
        message: e.to_string(),
    })?;
    store.set_item(E::STORAGE_KEY, &value.to_string()).await
}

/// Whether the calendar shows the holiday overlay. Defaults to on.
pub async fn holidays_enabled(store: &dyn KeyValueStore) -> bool {
    match store.get_item(HOLIDAYS_ENABLED_KEY).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or(true),
        Ok(None) => true,
        Err(e) => {
            warn!(error = %e, "Failed to read holiday preference");
            true
        }
    }
}

/// Persist the holiday overlay preference.
pub async fn set_holidays_enabled(store: &dyn KeyValueStore, enabled: bool) -> StorageResult<()> {
    store
        .set_item(HOLIDAYS_ENABLED_KEY, if enabled { "true" } else { "false" })
        .await
}
