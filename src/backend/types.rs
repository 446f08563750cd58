use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which a session counts as expired.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// The slice of the user profile kept with a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<serde_json::Value>,
}

impl SessionUser {
    /// Display name given at sign-up, if any.
    pub fn full_name(&self) -> Option<&str> {
        self.user_metadata
            .as_ref()
            .and_then(|m| m.get("full_name"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Reduced session payload persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: SessionUser,
}

impl StoredSession {
    /// Whether the access token is expired (or about to be) at `now_secs`.
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|exp| exp - EXPIRY_LEEWAY_SECS <= now_secs)
    }

    /// Whether the access token is expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

/// Response of the token, refresh and sign-up endpoints.
///
/// Sign-up answers with a full session when email confirmation is off and
/// with a bare user object otherwise, so every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user: Option<SessionUser>,
    /// Present when the body itself is a user object.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<serde_json::Value>,
}

impl AuthResponse {
    /// User carried by the response, whichever shape it came in.
    pub fn user(&self) -> Option<SessionUser> {
        if let Some(user) = &self.user {
            return Some(user.clone());
        }
        self.id.as_ref().map(|id| SessionUser {
            id: id.clone(),
            email: self.email.clone(),
            user_metadata: self.user_metadata.clone(),
        })
    }

    /// Reduce to the persisted payload. None when no session was issued.
    pub fn into_session(self) -> Option<StoredSession> {
        let user = self.user()?;
        let access_token = self.access_token?;
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Some(StoredSession {
            access_token,
            refresh_token: self.refresh_token,
            expires_at,
            token_type: self.token_type,
            user,
        })
    }
}

/// Body of the password grant.
#[derive(Debug, Clone, Serialize)]
pub struct PasswordGrant<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Body of the refresh grant.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshGrant<'a> {
    pub refresh_token: &'a str,
}

/// Body of the sign-up call.
#[derive(Debug, Clone, Serialize)]
pub struct SignUpRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Body of the password recovery call.
#[derive(Debug, Clone, Serialize)]
pub struct RecoverRequest<'a> {
    pub email: &'a str,
}
