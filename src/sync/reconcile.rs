use std::collections::HashSet;

use crate::entities::{sort_collection, Entity, EntityId};

/// Outcome of merging a remote collection with the local cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<E> {
    /// Remote entities plus local-only ones, in display order.
    pub merged: Vec<E>,
    /// Local-only entities the remote has not seen yet.
    pub to_push: Vec<E>,
}

/// Merge `remote` and `local` by id.
///
/// Remote copies win. Local entities whose id is unknown remotely are kept
/// and reported for pushing. The result is stably sorted with
/// [`Entity::compare`], so ties keep remote-then-local insertion order.
pub fn reconcile<E: Entity>(remote: Vec<E>, local: Vec<E>) -> Reconciled<E> {
    let to_push: Vec<E> = {
        let remote_ids: HashSet<&EntityId> = remote.iter().map(|e| e.id()).collect();
        local
            .into_iter()
            .filter(|e| !remote_ids.contains(e.id()))
            .collect()
    };

    let mut merged = remote;
    merged.extend(to_push.iter().cloned());
    sort_collection(&mut merged);

    Reconciled { merged, to_push }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CalendarEvent, DiaryEntry, Task};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn entry(id: &str, text: &str, created_at: &str) -> DiaryEntry {
        let mut e = DiaryEntry::new(EntityId::from(id), text, None);
        e.created_at = created_at.to_string();
        e
    }

    fn ids<E: Entity>(items: &[E]) -> Vec<&str> {
        items.iter().map(|e| e.id().as_str()).collect()
    }

    #[test]
    fn test_remote_wins_and_local_only_is_pushed() {
        let remote = vec![entry("1", "A", "2024-01-01")];
        let local = vec![entry("1", "A-stale", ""), entry("2", "B", "2024-01-02")];

        let result = reconcile(remote, local);

        assert_eq!(ids(&result.merged), vec!["2", "1"]);
        assert_eq!(result.merged[1].text, "A");
        assert_eq!(ids(&result.to_push), vec!["2"]);
    }

    #[test]
    fn test_every_remote_entity_appears_once() {
        let remote = vec![
            entry("3", "c", "2024-03-01"),
            entry("2", "b", "2024-02-01"),
            entry("1", "a", "2024-01-01"),
        ];
        let local = vec![entry("2", "b-local", "2024-02-01"), entry("4", "d", "2023-12-01")];

        let result = reconcile(remote.clone(), local);

        for r in &remote {
            let count = result.merged.iter().filter(|m| m.id == r.id).count();
            assert_eq!(count, 1, "remote id {} appears {} times", r.id, count);
        }
        assert_eq!(result.merged.len(), 4);
        assert_eq!(ids(&result.to_push), vec!["4"]);
    }

    #[test]
    fn test_empty_local_is_identity_on_remote() {
        let remote = vec![entry("2", "b", "2024-02-01"), entry("1", "a", "2024-01-01")];

        let result = reconcile(remote.clone(), Vec::new());

        assert_eq!(result.merged, remote);
        assert!(result.to_push.is_empty());
    }

    #[test]
    fn test_empty_remote_keeps_local() {
        let local = vec![entry("2", "b", "2024-02-01"), entry("1", "a", "2024-01-01")];

        let result = reconcile(Vec::new(), local.clone());

        assert_eq!(result.merged, local);
        assert_eq!(result.to_push, local);
    }

    #[test]
    fn test_second_pass_with_empty_local_is_noop() {
        let remote = vec![entry("1", "a", "2024-01-01")];
        let local = vec![entry("2", "b", "2024-01-02"), entry("0", "z", "2023-01-01")];

        let first = reconcile(remote, local);
        let second = reconcile(first.merged.clone(), Vec::new());

        assert_eq!(second.merged, first.merged);
        assert!(second.to_push.is_empty());
    }

    #[test]
    fn test_unparsable_timestamps_keep_insertion_order() {
        let remote = vec![entry("r1", "x", "garbage"), entry("r2", "y", "")];
        let local = vec![entry("l1", "z", "nope"), entry("l2", "w", "")];

        let result = reconcile(remote, local);

        assert_eq!(ids(&result.merged), vec!["r1", "r2", "l1", "l2"]);
    }

    #[test]
    fn test_tasks_merge_keeps_open_first() {
        let mut done = Task::new(EntityId::from("1"), "done", None);
        done.completed = true;
        done.created_at = "2024-05-01T00:00:00Z".to_string();
        let mut open = Task::new(EntityId::from("2"), "open", None);
        open.created_at = "2024-01-01T00:00:00Z".to_string();

        let result = reconcile(vec![done], vec![open]);

        assert_eq!(ids(&result.merged), vec!["2", "1"]);
    }

    #[test]
    fn test_events_merge_is_chronological() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap();
        let remote = vec![CalendarEvent::new(1, day(10), "remote", "#1")];
        let local = vec![CalendarEvent::new(2, day(3), "local", "#1")];

        let result = reconcile(remote, local);

        let texts: Vec<&str> = result.merged.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["local", "remote"]);
        assert_eq!(result.to_push.len(), 1);
    }
}
