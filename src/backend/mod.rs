//! Hosted backend access.
//!
//! The backend exposes one table per entity kind, each row owned by a user
//! through a `user_id` column. [`BackendClient`] speaks the HTTP API;
//! [`RemoteStore`] is the narrow table interface the sync layer depends on,
//! and [`SessionRemote`] implements it for whoever is currently signed in.

mod client;
mod types;

pub use client::BackendClient;
pub use types::{AuthResponse, SessionUser, StoredSession};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::entities::{Entity, RemoteOrder};
use crate::error::{BackendError, BackendResult};

/// Shared slot holding the current session, if any.
pub type SessionHandle = Arc<RwLock<Option<StoredSession>>>;

/// Table-level operations against the hosted backend, scoped to the
/// signed-in user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every row of `table` owned by the current user.
    async fn fetch_rows(&self, table: &str, order: RemoteOrder) -> BackendResult<Vec<Value>>;
    /// Insert or update one row. The owner column is filled in.
    async fn upsert_row(&self, table: &str, row: Value) -> BackendResult<()>;
    /// Delete the current user's row with `id`.
    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()>;
    /// Delete every row of `table` owned by the current user.
    async fn purge_table(&self, table: &str) -> BackendResult<()>;
}

/// [`RemoteStore`] bound to the live session.
///
/// Every call fails with [`BackendError::Unauthenticated`] while nobody is
/// signed in.
#[derive(Clone)]
pub struct SessionRemote {
    client: BackendClient,
    session: SessionHandle,
}

impl SessionRemote {
    /// Create a remote store reading credentials from `session`.
    pub fn new(client: BackendClient, session: SessionHandle) -> Self {
        Self { client, session }
    }

    async fn credentials(&self) -> BackendResult<(String, String)> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(BackendError::Unauthenticated)?;
        Ok((session.access_token.clone(), session.user.id.clone()))
    }
}

#[async_trait]
impl RemoteStore for SessionRemote {
    async fn fetch_rows(&self, table: &str, order: RemoteOrder) -> BackendResult<Vec<Value>> {
        let (token, user_id) = self.credentials().await?;
        self.client.select_rows(table, &token, &user_id, order).await
    }

    async fn upsert_row(&self, table: &str, mut row: Value) -> BackendResult<()> {
        let (token, user_id) = self.credentials().await?;
        match row.as_object_mut() {
            Some(fields) => {
                fields.insert("user_id".to_string(), Value::String(user_id));
            }
            None => {
                return Err(BackendError::InvalidResponse {
                    message: format!("Row for {} is not an object", table),
                })
            }
        }
        self.client.upsert_row(table, &token, &row).await
    }

    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()> {
        let (token, user_id) = self.credentials().await?;
        self.client
            .delete_rows(table, &token, &[("id", id), ("user_id", user_id.as_str())])
            .await
    }

    async fn purge_table(&self, table: &str) -> BackendResult<()> {
        let (token, user_id) = self.credentials().await?;
        self.client
            .delete_rows(table, &token, &[("user_id", user_id.as_str())])
            .await
    }
}

/// Fetch and decode the remote collection of `E`.
///
/// Rows that do not decode are skipped with a warning so one bad row does
/// not hide the rest of the collection.
pub async fn fetch_entities<E: Entity>(remote: &dyn RemoteStore) -> BackendResult<Vec<E>> {
    let rows = remote.fetch_rows(E::REMOTE_TABLE, E::REMOTE_ORDER).await?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        match E::from_row(row) {
            Ok(item) => items.push(item),
            Err(e) => warn!(kind = E::KIND, error = %e, "Skipping undecodable remote row"),
        }
    }
    Ok(items)
}
