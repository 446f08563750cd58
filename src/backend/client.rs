use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{AuthResponse, PasswordGrant, RecoverRequest, RefreshGrant, SignUpRequest};
use crate::config::{BackendConfig, RequestConfig};
use crate::entities::RemoteOrder;
use crate::error::{BackendError, BackendResult};

/// Largest doubling applied to the retry delay.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Client for the hosted backend: row API under `/rest/v1`, auth under `/auth/v1`.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    anon_key: String,
    request_config: RequestConfig,
}

impl BackendClient {
    /// Create a new backend client
    pub fn new(config: &BackendConfig, request_config: RequestConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Delay before retry number `retries` (1-based), doubling each time.
    fn retry_delay(&self, retries: u32) -> Duration {
        let shift = retries.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        Duration::from_millis(self.request_config.retry_delay_ms.saturating_mul(1u64 << shift))
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// Attach the project key and the bearer token. Without a user token the
    /// project key doubles as bearer.
    fn authorized(&self, builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header(
                "Authorization",
                format!("Bearer {}", token.unwrap_or(&self.anon_key)),
            )
    }

    async fn send(&self, builder: RequestBuilder) -> BackendResult<Response> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout {
                    timeout_ms: self.request_config.timeout_ms,
                }
            } else {
                BackendError::Http(e)
            }
        })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: error_message(&error_body),
            });
        }

        Ok(response)
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> BackendResult<T> {
        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: format!("Failed to parse {} response: {}", what, e),
            })
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    /// Fetch every row of `table` owned by `user_id`, ordered server-side.
    /// Transient failures are retried with exponential backoff.
    pub async fn select_rows(
        &self,
        table: &str,
        token: &str,
        user_id: &str,
        order: RemoteOrder,
    ) -> BackendResult<Vec<Value>> {
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = self.retry_delay(retries);
                warn!(
                    table = %table,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying backend fetch"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_select(table, token, user_id, order).await {
                Ok(rows) => {
                    info!(
                        table = %table,
                        rows = rows.len(),
                        latency_ms = start.elapsed().as_millis(),
                        "Backend fetch succeeded"
                    );
                    return Ok(rows);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    error!(
                        table = %table,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Backend fetch failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(BackendError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    async fn execute_select(
        &self,
        table: &str,
        token: &str,
        user_id: &str,
        order: RemoteOrder,
    ) -> BackendResult<Vec<Value>> {
        debug!(table = %table, order = order.column, "Fetching remote rows");

        let direction = if order.ascending { "asc" } else { "desc" };
        let builder = self.client.get(self.rest_url(table)).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("order", format!("{}.{}", order.column, direction)),
        ]);

        let response = self.send(self.authorized(builder, Some(token))).await?;
        Self::parse(response, "select").await
    }

    /// Insert or update one row, keyed by its `id`.
    pub async fn upsert_row(&self, table: &str, token: &str, row: &Value) -> BackendResult<()> {
        debug!(table = %table, id = %row.get("id").unwrap_or(&serde_json::Value::Null), "Upserting remote row");

        let builder = self
            .client
            .post(self.rest_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);

        self.send(self.authorized(builder, Some(token))).await?;
        Ok(())
    }

    /// Delete rows of `table` matching every `column = value` filter.
    pub async fn delete_rows(
        &self,
        table: &str,
        token: &str,
        filters: &[(&str, &str)],
    ) -> BackendResult<()> {
        debug!(table = %table, filters = filters.len(), "Deleting remote rows");

        let query: Vec<(&str, String)> = filters
            .iter()
            .map(|(column, value)| (*column, format!("eq.{}", value)))
            .collect();
        let builder = self.client.delete(self.rest_url(table)).query(&query);

        self.send(self.authorized(builder, Some(token))).await?;
        Ok(())
    }

    /// Invoke a server-side function.
    pub async fn rpc(&self, function: &str, token: &str, args: &Value) -> BackendResult<()> {
        info!(function = %function, "Calling backend function");

        let builder = self
            .client
            .post(self.rest_url(&format!("rpc/{}", function)))
            .json(args);

        self.send(self.authorized(builder, Some(token))).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    /// Exchange email and password for a session.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<AuthResponse> {
        info!(email = %email, "Signing in");

        let builder = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&PasswordGrant { email, password });

        let response = self.send(self.authorized(builder, None)).await?;
        Self::parse(response, "sign-in").await
    }

    /// Exchange a refresh token for a fresh session.
    pub async fn refresh_session(&self, refresh_token: &str) -> BackendResult<AuthResponse> {
        debug!("Refreshing session");

        let builder = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&RefreshGrant { refresh_token });

        let response = self.send(self.authorized(builder, None)).await?;
        Self::parse(response, "refresh").await
    }

    /// Register a new account.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
        redirect_to: Option<&str>,
    ) -> BackendResult<AuthResponse> {
        info!(email = %email, "Signing up");

        let request = SignUpRequest {
            email,
            password,
            data: full_name.map(|name| serde_json::json!({ "full_name": name })),
        };
        let mut builder = self.client.post(self.auth_url("signup")).json(&request);
        if let Some(url) = redirect_to {
            builder = builder.query(&[("redirect_to", url)]);
        }

        let response = self.send(self.authorized(builder, None)).await?;
        Self::parse(response, "sign-up").await
    }

    /// Revoke the session behind `token`.
    pub async fn sign_out(&self, token: &str) -> BackendResult<()> {
        let builder = self.client.post(self.auth_url("logout"));
        self.send(self.authorized(builder, Some(token))).await?;
        Ok(())
    }

    /// Send a password reset email.
    pub async fn recover(&self, email: &str, redirect_to: Option<&str>) -> BackendResult<()> {
        info!(email = %email, "Requesting password reset");

        let mut builder = self
            .client
            .post(self.auth_url("recover"))
            .json(&RecoverRequest { email });
        if let Some(url) = redirect_to {
            builder = builder.query(&[("redirect_to", url)]);
        }

        self.send(self.authorized(builder, None)).await?;
        Ok(())
    }
}

/// Pull the human-readable message out of an error body, falling back to
/// the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|field| v.get(*field).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}
