//! Authentication and session lifecycle.
//!
//! [`AuthService`] owns the shared [`SessionHandle`] read by
//! [`crate::backend::SessionRemote`]. Every change of session goes through
//! it so the in-memory slot and the [`SessionVault`] file stay in step.

mod vault;

pub use vault::SessionVault;

use tracing::{info, warn};

use crate::backend::{BackendClient, RemoteStore, SessionHandle, SessionUser, StoredSession};
use crate::entities::{CalendarEvent, Decision, DiaryEntry, Entity, Task};
use crate::error::{AppError, AppResult, BackendError};
use crate::storage::KeyValueStore;

/// Shortest password accepted at sign-up.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Server function removing the auth user itself.
const DELETE_USER_RPC: &str = "delete_user";

/// Result of a sign-up.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// The account is active and signed in.
    SignedIn(SessionUser),
    /// A confirmation email was sent; no session yet.
    ConfirmationPending,
}

/// Sign-in, sign-up and session bookkeeping against the hosted auth API.
pub struct AuthService {
    client: BackendClient,
    session: SessionHandle,
    vault: SessionVault,
    redirect_url: Option<String>,
}

fn validate_email(email: &str) -> AppResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::validation("email", "must be a valid email address")),
    }
}

impl AuthService {
    /// Create a service writing sessions into `session` and `vault`.
    pub fn new(
        client: BackendClient,
        session: SessionHandle,
        vault: SessionVault,
        redirect_url: Option<String>,
    ) -> Self {
        Self {
            client,
            session,
            vault,
            redirect_url,
        }
    }

    /// The shared session slot.
    pub fn session_handle(&self) -> SessionHandle {
        self.session.clone()
    }

    async fn install(&self, session: StoredSession) -> AppResult<SessionUser> {
        let user = session.user.clone();
        self.vault.save(&session).await?;
        *self.session.write().await = Some(session);
        Ok(user)
    }

    async fn forget(&self) -> AppResult<()> {
        *self.session.write().await = None;
        self.vault.clear().await?;
        Ok(())
    }

    /// Sign in with email and password.
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<SessionUser> {
        validate_email(email)?;
        if password.is_empty() {
            return Err(AppError::validation("password", "cannot be empty"));
        }

        let response = self.client.sign_in_with_password(email.trim(), password).await?;
        let session = response.into_session().ok_or_else(|| BackendError::InvalidResponse {
            message: "sign-in returned no session".to_string(),
        })?;

        let user = self.install(session).await?;
        info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    /// Register a new account. Whether a session comes back depends on the
    /// backend's email confirmation setting.
    pub async fn sign_up(&self, full_name: &str, email: &str, password: &str) -> AppResult<SignUpOutcome> {
        if full_name.trim().is_empty() {
            return Err(AppError::validation("full_name", "cannot be empty"));
        }
        validate_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(
                "password",
                format!("must have at least {} characters", MIN_PASSWORD_LEN),
            ));
        }

        let response = self
            .client
            .sign_up(
                email.trim(),
                password,
                Some(full_name.trim()),
                self.redirect_url.as_deref(),
            )
            .await?;

        match response.into_session() {
            Some(session) => {
                let user = self.install(session).await?;
                info!(user_id = %user.id, "Signed up and signed in");
                Ok(SignUpOutcome::SignedIn(user))
            }
            None => {
                info!(email = %email.trim(), "Signed up, confirmation pending");
                Ok(SignUpOutcome::ConfirmationPending)
            }
        }
    }

    /// Sign out. The remote logout is best-effort; the local session is
    /// always cleared.
    pub async fn sign_out(&self) -> AppResult<()> {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone());

        if let Some(token) = token {
            if let Err(e) = self.client.sign_out(&token).await {
                warn!(error = %e, "Remote logout failed");
            }
        }

        self.forget().await?;
        info!("Signed out");
        Ok(())
    }

    /// Load the persisted session, refreshing it when expired.
    ///
    /// A session that cannot be refreshed is dropped.
    pub async fn restore(&self) -> AppResult<Option<SessionUser>> {
        let Some(stored) = self.vault.load().await? else {
            return Ok(None);
        };

        if !stored.is_expired() {
            let user = stored.user.clone();
            *self.session.write().await = Some(stored);
            return Ok(Some(user));
        }

        let Some(refresh_token) = stored.refresh_token.as_deref() else {
            info!("Stored session expired without refresh token");
            self.forget().await?;
            return Ok(None);
        };

        match self.client.refresh_session(refresh_token).await {
            Ok(response) => {
                let user_fallback = stored.user.clone();
                match response.into_session() {
                    Some(mut session) => {
                        if session.refresh_token.is_none() {
                            session.refresh_token = stored.refresh_token.clone();
                        }
                        let user = self.install(session).await?;
                        info!(user_id = %user.id, "Session refreshed");
                        Ok(Some(user))
                    }
                    None => {
                        warn!(user_id = %user_fallback.id, "Refresh returned no session");
                        self.forget().await?;
                        Ok(None)
                    }
                }
            }
            Err(e) if e.is_transient() => {
                // Keep the stale session; the next run tries again.
                warn!(error = %e, "Session refresh failed, keeping stored session");
                let user = stored.user.clone();
                *self.session.write().await = Some(stored);
                Ok(Some(user))
            }
            Err(e) => {
                warn!(error = %e, "Session refresh rejected, signing out locally");
                self.forget().await?;
                Ok(None)
            }
        }
    }

    /// The signed-in user, if any.
    pub async fn current_user(&self) -> Option<SessionUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    /// Send a password reset email.
    pub async fn reset_password(&self, email: &str) -> AppResult<()> {
        validate_email(email)?;
        self.client
            .recover(email.trim(), self.redirect_url.as_deref())
            .await?;
        Ok(())
    }

    /// Delete everything the signed-in user owns, then the account.
    ///
    /// Remote rows go first and any failure there aborts before local data
    /// is touched. Removing the auth user itself is best-effort.
    pub async fn delete_account(
        &self,
        store: &dyn KeyValueStore,
        remote: &dyn RemoteStore,
    ) -> AppResult<()> {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(BackendError::Unauthenticated)?;

        for table in [
            Task::REMOTE_TABLE,
            DiaryEntry::REMOTE_TABLE,
            Decision::REMOTE_TABLE,
            CalendarEvent::REMOTE_TABLE,
        ] {
            remote.purge_table(table).await?;
            info!(table = %table, "Remote rows purged");
        }

        let keys: Vec<String> = store
            .all_keys()
            .await?
            .into_iter()
            .filter(|key| is_user_data_key(key))
            .collect();
        store.multi_remove(&keys).await?;
        info!(keys = keys.len(), "Local data cleared");

        if let Err(e) = self
            .client
            .rpc(DELETE_USER_RPC, &token, &serde_json::json!({}))
            .await
        {
            warn!(error = %e, "Account removal function failed");
        }

        self.sign_out().await
    }
}

/// Keys wiped on account deletion: the collections plus every `@`-prefixed
/// app key.
fn is_user_data_key(key: &str) -> bool {
    key.starts_with('@') || key == Task::STORAGE_KEY || key == DiaryEntry::STORAGE_KEY
}
