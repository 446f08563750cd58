//! Integration tests for the hosted backend client
//!
//! Uses wiremock to stand in for the row and auth endpoints.

use serde_json::json;
use wiremock::matchers::{body_json, header, headers, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use divergente::backend::BackendClient;
use divergente::config::{BackendConfig, RequestConfig};
use divergente::entities::{Entity, Task};
use divergente::error::BackendError;

fn create_test_client(base_url: &str, max_retries: u32) -> BackendClient {
    let config = BackendConfig {
        url: base_url.to_string(),
        anon_key: "anon".to_string(),
        signup_redirect_url: None,
    };
    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };
    BackendClient::new(&config, request_config).expect("Failed to create client")
}

#[cfg(test)]
mod row_tests {
    use super::*;

    #[tokio::test]
    async fn test_select_rows_sends_owner_filter_and_order() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/tasks"))
            .and(query_param("select", "*"))
            .and(query_param("user_id", "eq.user-1"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "anon"))
            .and(header("Authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "text": "Buy milk", "completed": false, "created_at": "2024-05-01T10:00:00Z"}
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let rows = client
            .select_rows("tasks", "token-1", "user-1", Task::REMOTE_ORDER)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["text"], "Buy milk");
    }

    #[tokio::test]
    async fn test_select_rows_retries_transient_then_gives_up() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/tasks"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service unavailable"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let result = client
            .select_rows("tasks", "token-1", "user-1", Task::REMOTE_ORDER)
            .await;

        match result {
            Err(BackendError::Unavailable { retries, message }) => {
                assert_eq!(retries, 3);
                assert!(message.contains("Service unavailable"));
            }
            other => panic!("Expected Unavailable, got {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn test_select_rows_does_not_retry_client_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/tasks"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "JWT expired"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 3);
        let result = client
            .select_rows("tasks", "token-1", "user-1", Task::REMOTE_ORDER)
            .await;

        match result {
            Err(BackendError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "JWT expired");
            }
            other => panic!("Expected Api error, got {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn test_upsert_row_merges_on_id() {
        let mock_server = MockServer::start().await;
        let row = json!({"id": "7", "user_id": "user-1", "text": "Walk"});

        Mock::given(method("POST"))
            .and(path("/rest/v1/tasks"))
            .and(query_param("on_conflict", "id"))
            .and(headers("Prefer", vec!["resolution=merge-duplicates", "return=minimal"]))
            .and(body_json(&row))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        tokio_test::assert_ok!(client.upsert_row("tasks", "token-1", &row).await);
    }

    #[tokio::test]
    async fn test_delete_rows_applies_every_filter() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/diary_entries"))
            .and(query_param("id", "eq.42"))
            .and(query_param("user_id", "eq.user-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        client
            .delete_rows("diary_entries", "token-1", &[("id", "42"), ("user_id", "user-1")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rpc_posts_to_function_path() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/delete_user"))
            .and(header("Authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        client.rpc("delete_user", "token-1", &json!({})).await.unwrap();
    }
}

#[cfg(test)]
mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_with_password() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("Authorization", "Bearer anon"))
            .and(body_json(json!({"email": "ana@example.com", "password": "secret1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3600,
                "token_type": "bearer",
                "user": {"id": "user-1", "email": "ana@example.com", "user_metadata": {"full_name": "Ana"}}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let response = client
            .sign_in_with_password("ana@example.com", "secret1")
            .await
            .unwrap();

        let session = response.into_session().unwrap();
        assert_eq!(session.access_token, "access");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(session.user.full_name(), Some("Ana"));
        assert!(!session.is_expired());
    }

    #[tokio::test]
    async fn test_sign_in_surfaces_error_description() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let error = client
            .sign_in_with_password("ana@example.com", "wrong-password")
            .await
            .unwrap_err();

        assert!(!error.is_transient());
        assert!(error.to_string().contains("Invalid login credentials"));
    }

    #[tokio::test]
    async fn test_refresh_session_uses_refresh_grant() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_json(json!({"refresh_token": "refresh"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-2",
                "expires_in": 3600,
                "user": {"id": "user-1"}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let response = client.refresh_session("refresh").await.unwrap();
        assert_eq!(response.access_token.as_deref(), Some("access-2"));
        assert!(response.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation_returns_bare_user() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(query_param("redirect_to", "https://example.com/confirm"))
            .and(body_json(json!({
                "email": "ana@example.com",
                "password": "secret1",
                "data": {"full_name": "Ana"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-1",
                "email": "ana@example.com",
                "user_metadata": {"full_name": "Ana"}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let response = client
            .sign_up(
                "ana@example.com",
                "secret1",
                Some("Ana"),
                Some("https://example.com/confirm"),
            )
            .await
            .unwrap();

        assert_eq!(response.user().map(|u| u.id), Some("user-1".to_string()));
        assert!(response.into_session().is_none());
    }

    #[tokio::test]
    async fn test_recover_and_sign_out() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/recover"))
            .and(body_json(json!({"email": "ana@example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("Authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        client.recover("ana@example.com", None).await.unwrap();
        client.sign_out("access").await.unwrap();
    }
}

#[cfg(test)]
mod outbox_tests {
    use super::*;
    use std::sync::Arc;

    use divergente::backend::{RemoteStore, SessionRemote, SessionUser, StoredSession};
    use divergente::config::SyncConfig;
    use divergente::entities::EntityId;
    use divergente::storage::SqliteStore;
    use divergente::sync::SyncQueue;
    use tokio::sync::RwLock;

    fn signed_in() -> StoredSession {
        StoredSession {
            access_token: "stale-token".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: None,
            token_type: Some("bearer".to_string()),
            user: SessionUser {
                id: "user-1".to_string(),
                email: Some("ana@example.com".to_string()),
                user_metadata: None,
            },
        }
    }

    #[tokio::test]
    async fn test_rejected_token_keeps_pending_write() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/tasks"))
            .and(header("Authorization", "Bearer stale-token"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "JWT expired"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let session = Arc::new(RwLock::new(Some(signed_in())));
        let remote: Arc<dyn RemoteStore> = Arc::new(SessionRemote::new(
            create_test_client(&mock_server.uri(), 0),
            session,
        ));
        let store = SqliteStore::new_in_memory()
            .await
            .expect("Failed to create in-memory store");
        let config = SyncConfig {
            max_attempts: 3,
            interval_ms: 1000,
            retry_delay_ms: 10,
        };
        let (queue, _nudges) = SyncQueue::new(store, Some(remote), config);

        queue
            .enqueue_upsert(&Task::new(EntityId::from("1"), "Walk", None))
            .await
            .unwrap();
        let report = queue.drain().await.unwrap();

        assert!(report.deferred);
        assert_eq!(report.dropped, 0);
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 0);
    }
}
