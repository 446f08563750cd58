//! Local/remote synchronisation.
//!
//! - [`reconcile`] merges a remote collection into the local cache.
//! - [`Repository`] is the CRUD surface over one collection.
//! - [`SyncQueue`] and [`SyncWorker`] deliver remote writes durably in the
//!   background.

mod outbox;
mod reconcile;
mod repository;

pub use outbox::{DrainReport, OutboxOp, SyncQueue, SyncWorker};
pub use reconcile::{reconcile, Reconciled};
pub use repository::{Repository, MAX_EVENT_RANGE_DAYS};
