//! Application context.
//!
//! [`App`] builds every service once from [`Config`] and hands out explicit
//! references; nothing in the crate reaches for global state.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::{AuthService, SessionVault};
use crate::backend::{BackendClient, RemoteStore, SessionHandle, SessionRemote};
use crate::bundle;
use crate::calendar::{self, CalendarDay};
use crate::config::Config;
use crate::entities::{CalendarEvent, Decision, DiaryEntry, IdGenerator, Task};
use crate::error::AppResult;
use crate::storage::{self, KeyValueStore, SqliteStore};
use crate::sync::{DrainReport, Repository, SyncQueue, SyncWorker};

/// Entity counts after a full sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Tasks after the merge.
    pub tasks: usize,
    /// Diary entries after the merge.
    pub diary: usize,
    /// Decision worksheets after the merge.
    pub decisions: usize,
    /// Events across all days.
    pub events: usize,
}

/// Every service the application needs, wired together.
pub struct App {
    config: Config,
    store: SqliteStore,
    kv: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    session: SessionHandle,
    nudges: Option<mpsc::Receiver<()>>,
    /// Sign-in and session state.
    pub auth: AuthService,
    /// Pending remote writes.
    pub queue: SyncQueue,
    /// To-do list.
    pub tasks: Repository<Task>,
    /// Emotion journal.
    pub diary: Repository<DiaryEntry>,
    /// Decision worksheets.
    pub decisions: Repository<Decision>,
    /// Calendar events.
    pub events: Repository<CalendarEvent>,
}

impl App {
    /// Open the local database and build the services.
    pub async fn open(config: Config) -> AppResult<Self> {
        let store = SqliteStore::new(&config.database).await?;
        info!(path = %config.database.path.display(), "Database initialized");

        let client = BackendClient::new(&config.backend, config.request.clone())?;
        info!(url = %config.backend.url, "Backend client initialized");

        Ok(Self::from_parts(config, store, client))
    }

    /// Build the services over an existing store and client.
    pub fn from_parts(config: Config, store: SqliteStore, client: BackendClient) -> Self {
        let session: SessionHandle = Arc::new(RwLock::new(None));
        let remote: Arc<dyn RemoteStore> = Arc::new(SessionRemote::new(client.clone(), session.clone()));
        let kv: Arc<dyn KeyValueStore> = Arc::new(store.clone());
        let (queue, nudges) = SyncQueue::new(store.clone(), Some(remote.clone()), config.sync.clone());
        let ids = Arc::new(IdGenerator::new());

        let auth = AuthService::new(
            client,
            session.clone(),
            SessionVault::new(config.session.path.clone()),
            config.backend.signup_redirect_url.clone(),
        );

        Self {
            tasks: Repository::new(kv.clone(), Some(remote.clone()), queue.clone(), ids.clone()),
            diary: Repository::new(kv.clone(), Some(remote.clone()), queue.clone(), ids.clone()),
            decisions: Repository::new(kv.clone(), Some(remote.clone()), queue.clone(), ids.clone()),
            events: Repository::new(kv.clone(), Some(remote.clone()), queue.clone(), ids),
            config,
            store,
            kv,
            remote,
            session,
            nudges: Some(nudges),
            auth,
            queue,
        }
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The local key/value store.
    pub fn kv(&self) -> &dyn KeyValueStore {
        self.kv.as_ref()
    }

    /// The local database.
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Whether a session is installed.
    pub async fn is_signed_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Reconcile all four collections with the backend.
    pub async fn sync_all(&self) -> AppResult<SyncSummary> {
        let summary = SyncSummary {
            tasks: self.tasks.load().await?.len(),
            diary: self.diary.load().await?.len(),
            decisions: self.decisions.load().await?.len(),
            events: self.events.load().await?.len(),
        };
        info!(
            tasks = summary.tasks,
            diary = summary.diary,
            decisions = summary.decisions,
            events = summary.events,
            "Sync complete"
        );
        Ok(summary)
    }

    /// Deliver whatever the outbox holds right now.
    pub async fn flush(&self) -> AppResult<DrainReport> {
        Ok(self.queue.drain().await?)
    }

    /// Start the background sync worker. Only the first call spawns one.
    pub fn spawn_worker(&mut self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let nudges = self.nudges.take()?;
        Some(SyncWorker::spawn(self.queue.clone(), nudges, shutdown))
    }

    /// Whether the calendar shows holidays.
    pub async fn holidays_enabled(&self) -> bool {
        storage::holidays_enabled(self.kv()).await
    }

    /// Turn the holiday overlay on or off.
    pub async fn set_holidays_enabled(&self, enabled: bool) -> AppResult<()> {
        storage::set_holidays_enabled(self.kv(), enabled).await?;
        info!(enabled, "Holiday overlay preference saved");
        Ok(())
    }

    /// Month view over the local events.
    pub async fn month(&self, year: i32, month: u32) -> AppResult<Vec<CalendarDay>> {
        let events = self.events.list().await?;
        let enabled = self.holidays_enabled().await;
        calendar::month_overlay(&events, year, month, enabled)
    }

    /// Export the local collections to `path`.
    pub async fn export(&self, path: &Path) -> AppResult<()> {
        bundle::write_bundle(self.kv(), path).await
    }

    /// Import a backup from `path`.
    pub async fn import(&self, path: &Path) -> AppResult<Vec<&'static str>> {
        bundle::read_bundle(self.kv(), path).await
    }

    /// Delete the account with all its data, local and remote, and forget
    /// pending remote writes.
    pub async fn delete_account(&self) -> AppResult<()> {
        self.auth
            .delete_account(self.kv.as_ref(), self.remote.as_ref())
            .await?;
        self.queue.clear().await?;
        info!("Account deleted");
        Ok(())
    }
}
