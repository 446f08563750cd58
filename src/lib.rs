//! # Divergente
//!
//! Data layer of an offline-first personal organizer: a to-do list, an
//! emotion diary, decision worksheets and a calendar, cached on the device
//! and optionally mirrored to a hosted backend.
//!
//! ## Features
//!
//! - **Local-first storage**: every collection lives as one JSON document in
//!   a SQLite-backed key/value store
//! - **Reconciliation**: one generic merge of remote and local collections,
//!   remote copy wins by id
//! - **Durable outbox**: remote writes are queued, coalesced per row and
//!   retried with exponential backoff
//! - **Auth session**: email/password sign-in with a persisted, refreshable
//!   session
//! - **Backups**: JSON export/import of all collections
//! - **Holiday overlay**: national holidays (fixed and Easter-relative) in
//!   the month view
//!
//! ## Architecture
//!
//! ```text
//! CLI → App → Repository<E> → KeyValueStore (SQLite)
//!                  ↓
//!              SyncQueue (outbox) → SyncWorker → RemoteStore → Backend (HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use divergente::{App, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let app = App::open(config).await?;
//!     app.auth.restore().await?;
//!     let tasks = app.tasks.load().await?;
//!     println!("{} tasks", tasks.len());
//!     app.flush().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Application context wiring every service together.
pub mod app;
/// Authentication, session restore and account deletion.
pub mod auth;
/// Hosted backend client, wire types and the remote table interface.
pub mod backend;
/// JSON backup export and import.
pub mod bundle;
/// National holidays and the month view.
pub mod calendar;
/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Domain entities and their storage/row mappings.
pub mod entities;
/// Error types and result aliases for the application.
pub mod error;
/// SQLite-backed key/value store and outbox table.
pub mod storage;
/// Reconciliation, repositories and background delivery.
pub mod sync;

pub use app::App;
pub use config::Config;
pub use error::{AppError, AppResult};
