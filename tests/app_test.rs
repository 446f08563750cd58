//! End-to-end tests for the application context
//!
//! Each test wires an [`App`] over an in-memory database, a temporary session
//! file and a wiremock backend.

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use divergente::auth::SessionVault;
use divergente::backend::{BackendClient, SessionUser, StoredSession};
use divergente::cli::{execute_command, Commands, OutboxCommands, TaskCommands};
use divergente::config::{
    BackendConfig, Config, DatabaseConfig, LogFormat, LoggingConfig, RequestConfig, SessionConfig,
    SyncConfig,
};
use divergente::entities::TaskFilter;
use divergente::storage::{KeyValueStore, SqliteStore};
use divergente::App;

fn test_config(base_url: &str, dir: &TempDir) -> Config {
    Config {
        backend: BackendConfig {
            url: base_url.to_string(),
            anon_key: "anon".to_string(),
            signup_redirect_url: None,
        },
        database: DatabaseConfig {
            path: dir.path().join("app.db"),
            max_connections: 1,
        },
        session: SessionConfig {
            path: dir.path().join("session.json"),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
        },
        request: RequestConfig {
            timeout_ms: 5000,
            max_retries: 0,
            retry_delay_ms: 10,
        },
        sync: SyncConfig {
            max_attempts: 3,
            interval_ms: 1000,
            retry_delay_ms: 10,
        },
    }
}

async fn create_test_app(base_url: &str, dir: &TempDir) -> App {
    let config = test_config(base_url, dir);
    let store = SqliteStore::new_in_memory()
        .await
        .expect("Failed to create in-memory store");
    let client = BackendClient::new(&config.backend, config.request.clone())
        .expect("Failed to create client");
    App::from_parts(config, store, client)
}

fn stored_session(expires_at: i64) -> StoredSession {
    StoredSession {
        access_token: "access-1".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expires_at: Some(expires_at),
        token_type: Some("bearer".to_string()),
        user: SessionUser {
            id: "user-1".to_string(),
            email: Some("ana@example.com".to_string()),
            user_metadata: Some(json!({"full_name": "Ana"})),
        },
    }
}

async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "user": {"id": "user-1", "email": "ana@example.com"}
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_empty_table(server: &MockServer, table: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/rest/v1/{}", table)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

#[cfg(test)]
mod offline_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cli_task_flow_without_session() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let mut app = create_test_app(&server.uri(), &dir).await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let added = execute_command(
            Commands::Tasks(TaskCommands::Add {
                text: "Buy milk".to_string(),
                due,
            }),
            &mut app,
        )
        .await;
        assert_eq!(added.exit_code, 0);
        assert!(added.message.contains("Buy milk"));

        let listed = execute_command(
            Commands::Tasks(TaskCommands::List {
                filter: TaskFilter::All,
            }),
            &mut app,
        )
        .await;
        assert!(listed.message.contains("Buy milk"));

        let status = execute_command(Commands::Outbox(OutboxCommands::Status), &mut app).await;
        assert!(status.message.starts_with("1 pending"));

        let flushed = execute_command(Commands::Outbox(OutboxCommands::Flush), &mut app).await;
        assert_eq!(flushed.exit_code, 0);
        assert!(flushed.message.contains("not signed in"));
        assert_eq!(app.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sync_requires_session() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let mut app = create_test_app(&server.uri(), &dir).await;

        let result = execute_command(Commands::Sync { watch: false }, &mut app).await;
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_load_without_session_returns_local() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        app.tasks.add_task("Offline", due).await.unwrap();
        let loaded = app.tasks.load().await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "Offline");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_then_import_restores_collections() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let backup = dir.path().join("backups").join("backup.json");

        app.tasks.add_task("Keep me", due).await.unwrap();
        app.diary
            .add_entry("Calm day", Some("😌 calm".to_string()))
            .await
            .unwrap();
        app.export(&backup).await.unwrap();

        app.kv().remove_item("tasks").await.unwrap();
        app.kv().remove_item("diaryEntries").await.unwrap();
        assert!(app.tasks.list().await.unwrap().is_empty());

        let restored = app.import(&backup).await.unwrap();
        assert_eq!(restored, vec!["calendar", "tasks", "diary", "decision"]);
        assert_eq!(app.tasks.list().await.unwrap()[0].text, "Keep me");
        assert_eq!(app.diary.list().await.unwrap()[0].text, "Calm day");
    }
}

#[cfg(test)]
mod online_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_sign_in_sync_and_flush() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let local = app.tasks.add_task("Local only", due).await.unwrap();

        mount_sign_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/tasks"))
            .and(query_param("user_id", "eq.user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "remote-1",
                "text": "From the web",
                "completed": false,
                "created_at": "2024-05-01T10:00:00Z"
            }])))
            .expect(1)
            .mount(&server)
            .await;
        for table in ["diary_entries", "decisions", "events"] {
            mount_empty_table(&server, table).await;
        }
        Mock::given(method("POST"))
            .and(path("/rest/v1/tasks"))
            .and(body_partial_json(json!({
                "id": local.id.as_str(),
                "user_id": "user-1",
                "text": "Local only"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        app.auth.sign_in("ana@example.com", "secret1").await.unwrap();
        assert!(app.is_signed_in().await);

        let summary = app.sync_all().await.unwrap();
        assert_eq!(summary.tasks, 2);
        assert_eq!(summary.diary, 0);

        let texts: Vec<String> = app
            .tasks
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert!(texts.contains(&"From the web".to_string()));
        assert!(texts.contains(&"Local only".to_string()));

        // The add and the reconcile queued the same row once.
        assert_eq!(app.queue.len().await.unwrap(), 1);

        let report = app.flush().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(!report.deferred);
        assert!(app.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_write_is_dropped() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        mount_sign_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/tasks"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"message": "bad row"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        app.auth.sign_in("ana@example.com", "secret1").await.unwrap();
        app.tasks.add_task("Doomed", due).await.unwrap();

        let report = app.flush().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(app.queue.is_empty().await.unwrap());
        assert_eq!(app.tasks.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_write_is_rescheduled() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        mount_sign_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/tasks"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        app.auth.sign_in("ana@example.com", "secret1").await.unwrap();
        app.tasks.add_task("Later", due).await.unwrap();

        let report = app.flush().await.unwrap();
        assert_eq!(report.rescheduled, 1);

        let pending = app.queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].next_attempt_at > Utc::now() - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_delete_account_purges_everything() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        mount_sign_in(&server).await;
        for table in ["tasks", "diary_entries", "decisions", "events"] {
            Mock::given(method("DELETE"))
                .and(path(format!("/rest/v1/{}", table)))
                .and(query_param("user_id", "eq.user-1"))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/delete_user"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        app.auth.sign_in("ana@example.com", "secret1").await.unwrap();
        app.tasks.add_task("Private", due).await.unwrap();
        app.set_holidays_enabled(false).await.unwrap();
        app.kv().set_item("theme", "\"dark\"").await.unwrap();

        app.delete_account().await.unwrap();

        assert_eq!(app.kv().all_keys().await.unwrap(), vec!["theme".to_string()]);
        assert!(app.queue.is_empty().await.unwrap());
        assert!(!app.is_signed_in().await);
        assert!(!dir.path().join("session.json").exists());
    }

    #[tokio::test]
    async fn test_delete_account_stops_on_remote_failure() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        mount_sign_in(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/tasks"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "denied"})))
            .expect(1)
            .mount(&server)
            .await;

        app.auth.sign_in("ana@example.com", "secret1").await.unwrap();
        app.tasks.add_task("Private", due).await.unwrap();

        assert!(app.delete_account().await.is_err());
        assert_eq!(app.tasks.list().await.unwrap().len(), 1);
        assert!(app.is_signed_in().await);
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_restore_valid_session_without_network() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;

        SessionVault::new(dir.path().join("session.json"))
            .save(&stored_session(Utc::now().timestamp() + 3600))
            .await
            .unwrap();

        let user = app.auth.restore().await.unwrap().unwrap();
        assert_eq!(user.id, "user-1");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_refreshes_expired_session() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let vault = SessionVault::new(dir.path().join("session.json"));

        vault
            .save(&stored_session(Utc::now().timestamp() - 3600))
            .await
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-2",
                "expires_in": 3600,
                "user": {"id": "user-1", "email": "ana@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let user = app.auth.restore().await.unwrap();
        assert_eq!(user.map(|u| u.id), Some("user-1".to_string()));

        let saved = vault.load().await.unwrap().unwrap();
        assert_eq!(saved.access_token, "access-2");
        assert_eq!(saved.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_restore_drops_rejected_session() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;
        let vault = SessionVault::new(dir.path().join("session.json"));

        vault
            .save(&stored_session(Utc::now().timestamp() - 3600))
            .await
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_description": "Invalid Refresh Token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(app.auth.restore().await.unwrap(), None);
        assert!(vault.load().await.unwrap().is_none());
        assert!(!app.is_signed_in().await);
    }

    #[tokio::test]
    async fn test_sign_up_validation_happens_before_network() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(&server.uri(), &dir).await;

        assert!(app.auth.sign_up("", "ana@example.com", "secret1").await.is_err());
        assert!(app.auth.sign_up("Ana", "not-an-email", "secret1").await.is_err());
        assert!(app.auth.sign_up("Ana", "ana@example.com", "short").await.is_err());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
