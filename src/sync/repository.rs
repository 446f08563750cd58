use std::marker::PhantomData;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::outbox::SyncQueue;
use super::reconcile::{reconcile, Reconciled};
use crate::backend::{fetch_entities, RemoteStore};
use crate::entities::{
    sort_collection, CalendarEvent, Decision, DiaryEntry, Entity, EntityId, IdGenerator, PointSide,
    Task, TaskFilter, MAX_POINTS_PER_SIDE,
};
use crate::error::{AppError, AppResult};
use crate::storage::{load_collection, save_collection, KeyValueStore};

/// Longest date range accepted when adding events over several days.
pub const MAX_EVENT_RANGE_DAYS: i64 = 366;

/// CRUD over one entity collection.
///
/// The local collection is the source every screen reads. Mutations rewrite
/// it wholesale and queue the matching remote write in the outbox.
pub struct Repository<E: Entity> {
    store: Arc<dyn KeyValueStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    queue: SyncQueue,
    ids: Arc<IdGenerator>,
    lock: Mutex<()>,
    _kind: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    /// Create a repository. Without a remote, `load` is local-only.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        queue: SyncQueue,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            store,
            remote,
            queue,
            ids,
            lock: Mutex::new(()),
            _kind: PhantomData,
        }
    }

    /// Fetch the remote collection and reconcile it with the local one.
    ///
    /// The merged result replaces the local collection and local-only
    /// entities are queued for upload. When the remote is missing or fails,
    /// the local collection is returned untouched.
    pub async fn load(&self) -> AppResult<Vec<E>> {
        let _guard = self.lock.lock().await;
        let local = load_collection::<E>(self.store.as_ref()).await;

        let Some(remote) = self.remote.as_deref() else {
            return Ok(local);
        };

        let remote_items = match fetch_entities::<E>(remote).await {
            Ok(items) => items,
            Err(e) if e.is_unauthenticated() => {
                debug!(kind = E::KIND, error = %e, "Not signed in, using local collection");
                return Ok(local);
            }
            Err(e) => {
                warn!(kind = E::KIND, error = %e, "Remote fetch failed, using local collection");
                return Ok(local);
            }
        };

        let remote_count = remote_items.len();
        let Reconciled { merged, to_push } = reconcile(remote_items, local);
        save_collection(self.store.as_ref(), &merged).await?;
        for item in &to_push {
            self.queue.enqueue_upsert(item).await?;
        }

        info!(
            kind = E::KIND,
            remote = remote_count,
            local_only = to_push.len(),
            total = merged.len(),
            "Collection reconciled"
        );
        Ok(merged)
    }

    /// The local collection.
    pub async fn list(&self) -> AppResult<Vec<E>> {
        Ok(load_collection::<E>(self.store.as_ref()).await)
    }

    /// Look up one entity locally.
    pub async fn get(&self, id: &str) -> AppResult<E> {
        self.list()
            .await?
            .into_iter()
            .find(|e| e.id().as_str() == id)
            .ok_or_else(|| not_found::<E>(id))
    }

    /// Create an entity with a fresh id.
    pub async fn add<F>(&self, build: F) -> AppResult<E>
    where
        F: FnOnce(EntityId) -> E,
    {
        let item = build(self.ids.next_id());
        self.add_many(vec![item.clone()]).await?;
        Ok(item)
    }

    /// Insert already-built entities at the front of the collection.
    pub async fn add_many(&self, new_items: Vec<E>) -> AppResult<()> {
        if new_items.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut items = load_collection::<E>(self.store.as_ref()).await;
        items.splice(0..0, new_items.iter().cloned());
        sort_collection(&mut items);
        save_collection(self.store.as_ref(), &items).await?;

        for item in &new_items {
            self.queue.enqueue_upsert(item).await?;
        }
        debug!(kind = E::KIND, added = new_items.len(), "Entities added");
        Ok(())
    }

    /// Apply `patch` to the entity with `id`.
    pub async fn update<F>(&self, id: &str, patch: F) -> AppResult<E>
    where
        F: FnOnce(&mut E),
    {
        let _guard = self.lock.lock().await;
        let mut items = load_collection::<E>(self.store.as_ref()).await;
        let item = items
            .iter_mut()
            .find(|e| e.id().as_str() == id)
            .ok_or_else(|| not_found::<E>(id))?;

        patch(item);
        let updated = item.clone();
        if updated.id().as_str() != id {
            return Err(AppError::validation("id", "cannot change on update"));
        }

        sort_collection(&mut items);
        save_collection(self.store.as_ref(), &items).await?;
        self.queue.enqueue_upsert(&updated).await?;
        debug!(kind = E::KIND, id = %id, "Entity updated");
        Ok(updated)
    }

    /// Remove the entity with `id`.
    pub async fn remove(&self, id: &str) -> AppResult<E> {
        let _guard = self.lock.lock().await;
        let mut items = load_collection::<E>(self.store.as_ref()).await;
        let position = items
            .iter()
            .position(|e| e.id().as_str() == id)
            .ok_or_else(|| not_found::<E>(id))?;

        let removed = items.remove(position);
        save_collection(self.store.as_ref(), &items).await?;
        self.queue.enqueue_delete::<E>(id).await?;
        debug!(kind = E::KIND, id = %id, "Entity removed");
        Ok(removed)
    }
}

fn not_found<E: Entity>(id: &str) -> AppError {
    AppError::NotFound {
        kind: E::KIND.to_string(),
        id: id.to_string(),
    }
}

fn required_text(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(field, "cannot be empty"));
    }
    Ok(value.to_string())
}

impl Repository<Task> {
    /// Add an open task due on `due`.
    pub async fn add_task(&self, text: &str, due: NaiveDate) -> AppResult<Task> {
        let text = required_text("text", text)?;
        self.add(|id| Task::new(id, text, Some(due))).await
    }

    /// Flip completion of a task.
    pub async fn toggle(&self, id: &str) -> AppResult<Task> {
        self.update(id, Task::toggle).await
    }

    /// Open tasks due on or before `day`.
    pub async fn due_on_or_before(&self, day: NaiveDate) -> AppResult<Vec<Task>> {
        let tasks = self.list().await?;
        Ok(tasks.into_iter().filter(|t| t.is_due_by(day)).collect())
    }

    /// Tasks passing `filter`.
    pub async fn filtered(&self, filter: TaskFilter) -> AppResult<Vec<Task>> {
        let tasks = self.list().await?;
        Ok(tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }
}

impl Repository<DiaryEntry> {
    /// Write a diary entry.
    pub async fn add_entry(&self, text: &str, emotion: Option<String>) -> AppResult<DiaryEntry> {
        let text = required_text("text", text)?;
        self.add(|id| DiaryEntry::new(id, text, emotion)).await
    }
}

impl Repository<Decision> {
    /// Save a decision worksheet with its points.
    pub async fn add_decision(
        &self,
        problem: &str,
        positives: &[(String, u8)],
        negatives: &[(String, u8)],
        reflection: &str,
    ) -> AppResult<Decision> {
        let problem = required_text("problem", problem)?;
        for (field, points) in [("positive_points", positives), ("negative_points", negatives)] {
            if points.len() > MAX_POINTS_PER_SIDE {
                return Err(AppError::validation(
                    field,
                    format!("at most {} points per side", MAX_POINTS_PER_SIDE),
                ));
            }
            if points.iter().any(|(text, _)| text.trim().is_empty()) {
                return Err(AppError::validation(field, "point text cannot be empty"));
            }
        }

        let mut decision = Decision::new(self.ids.next_id(), problem).with_reflection(reflection.trim());
        for (side, points) in [(PointSide::Positive, positives), (PointSide::Negative, negatives)] {
            for (text, rating) in points {
                decision.add_point(side, self.ids.next_millis(), text, *rating);
            }
        }
        decision.overall_sentiment = decision.evaluate();

        self.add_many(vec![decision.clone()]).await?;
        Ok(decision)
    }

    /// Change one point's rating and re-evaluate the worksheet.
    pub async fn rate_point(&self, decision_id: &str, point_id: &str, rating: u8) -> AppResult<Decision> {
        let decision = self.get(decision_id).await?;
        let known = decision
            .positive_points
            .iter()
            .chain(decision.negative_points.iter())
            .any(|p| p.id == point_id);
        if !known {
            return Err(AppError::NotFound {
                kind: "Point".to_string(),
                id: point_id.to_string(),
            });
        }

        self.update(decision_id, |d| {
            d.rate_point(point_id, rating);
        })
        .await
    }
}

impl Repository<CalendarEvent> {
    /// Add one event per day from `start` to `end` inclusive.
    pub async fn add_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        text: &str,
        color: &str,
    ) -> AppResult<Vec<CalendarEvent>> {
        let text = required_text("text", text)?;
        if end < start {
            return Err(AppError::validation("end", "must not be before start"));
        }
        if (end - start).num_days() >= MAX_EVENT_RANGE_DAYS {
            return Err(AppError::validation(
                "end",
                format!("range is limited to {} days", MAX_EVENT_RANGE_DAYS),
            ));
        }

        let events: Vec<CalendarEvent> = start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|day| CalendarEvent::new(self.ids.next_millis(), day, text.as_str(), color))
            .collect();

        self.add_many(events.clone()).await?;
        Ok(events)
    }

    /// Events on `day`, in stored order.
    pub async fn on_date(&self, day: NaiveDate) -> AppResult<Vec<CalendarEvent>> {
        let events = self.list().await?;
        Ok(events.into_iter().filter(|e| e.day() == Some(day)).collect())
    }
}
