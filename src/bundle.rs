//! JSON backup of the four collections.
//!
//! A bundle is one object with a section per collection holding the value
//! exactly as stored locally (or `null`). Import checks every section before
//! writing any of them.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::info;

use crate::entities::{CalendarEvent, Decision, DiaryEntry, Entity, Task};
use crate::error::{AppError, AppResult};
use crate::storage::KeyValueStore;

/// File name used when the caller does not pick one.
pub const DEFAULT_BUNDLE_FILE: &str = "divergente-backup.json";

/// Bundle section names and the storage keys they mirror.
pub const SECTIONS: [(&str, &str); 4] = [
    ("calendar", CalendarEvent::STORAGE_KEY),
    ("tasks", Task::STORAGE_KEY),
    ("diary", DiaryEntry::STORAGE_KEY),
    ("decision", Decision::STORAGE_KEY),
];

fn bundle_error(message: impl Into<String>) -> AppError {
    AppError::Bundle {
        message: message.into(),
    }
}

/// Check that `value` decodes as the collection stored under `key`.
fn check_section(key: &str, value: &Value) -> Result<(), serde_json::Error> {
    fn decodes<E: Entity>(value: &Value) -> Result<(), serde_json::Error> {
        E::decode_collection(value.clone()).map(|_| ())
    }

    match key {
        k if k == CalendarEvent::STORAGE_KEY => decodes::<CalendarEvent>(value),
        k if k == Task::STORAGE_KEY => decodes::<Task>(value),
        k if k == DiaryEntry::STORAGE_KEY => decodes::<DiaryEntry>(value),
        k if k == Decision::STORAGE_KEY => decodes::<Decision>(value),
        _ => Ok(()),
    }
}

/// Collect every section from the store.
pub async fn export_bundle(store: &dyn KeyValueStore) -> AppResult<Value> {
    let mut bundle = Map::new();
    for (section, key) in SECTIONS {
        let value = match store.get_item(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| bundle_error(format!("stored {} is not valid JSON: {}", section, e)))?,
            None => Value::Null,
        };
        bundle.insert(section.to_string(), value);
    }
    Ok(Value::Object(bundle))
}

/// Export to a pretty-printed file at `path`.
pub async fn write_bundle(store: &dyn KeyValueStore, path: &Path) -> AppResult<()> {
    let bundle = export_bundle(store).await?;
    let body = serde_json::to_string_pretty(&bundle)
        .map_err(|e| bundle_error(format!("failed to render bundle: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| bundle_error(format!("cannot create {}: {}", parent.display(), e)))?;
        }
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| bundle_error(format!("cannot write {}: {}", path.display(), e)))?;

    info!(path = %path.display(), "Backup exported");
    Ok(())
}

/// Restore the sections present in `bundle`, returning their names.
///
/// Sections may be `null`, which empties the collection. Nothing is written
/// unless every present section is valid.
pub async fn import_bundle(store: &dyn KeyValueStore, bundle: &Value) -> AppResult<Vec<&'static str>> {
    let object = bundle
        .as_object()
        .ok_or_else(|| bundle_error("bundle must be a JSON object"))?;

    let mut present = Vec::new();
    for (section, key) in SECTIONS {
        if let Some(value) = object.get(section) {
            if !value.is_null() {
                check_section(key, value)
                    .map_err(|e| bundle_error(format!("section {} is invalid: {}", section, e)))?;
            }
            present.push((section, key, value));
        }
    }

    for (_, key, value) in &present {
        store.set_item(key, &value.to_string()).await?;
    }

    let restored: Vec<&'static str> = present.into_iter().map(|(section, _, _)| section).collect();
    info!(sections = ?restored, "Backup imported");
    Ok(restored)
}

/// Read a bundle file and import it.
pub async fn read_bundle(store: &dyn KeyValueStore, path: &Path) -> AppResult<Vec<&'static str>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| bundle_error(format!("cannot read {}: {}", path.display(), e)))?;
    let bundle: Value = serde_json::from_str(&raw)
        .map_err(|e| bundle_error(format!("{} is not valid JSON: {}", path.display(), e)))?;
    import_bundle(store, &bundle).await
}
