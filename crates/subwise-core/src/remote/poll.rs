//! Change feed by polling
//!
//! For backends without a push channel: re-read the owner's rows at a fixed
//! interval and turn the difference between two reads into INSERT, UPDATE
//! and DELETE events. Like a push feed, delivery is best-effort; a row that
//! changes twice between polls produces a single UPDATE.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{ChangeFeed, Query, RawChange, RemoteStore, Table};

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

/// Changes that turn `previous` into `current`
pub fn diff(table: Table, previous: &[Value], current: &[Value]) -> Vec<RawChange> {
    let before: HashMap<&str, &Value> = previous
        .iter()
        .filter_map(|row| row_id(row).map(|id| (id, row)))
        .collect();
    let after: HashMap<&str, &Value> = current
        .iter()
        .filter_map(|row| row_id(row).map(|id| (id, row)))
        .collect();

    let mut changes = Vec::new();
    for row in current {
        let Some(id) = row_id(row) else { continue };
        match before.get(id) {
            None => changes.push(RawChange::insert(table, row.clone())),
            Some(old) if *old != row => {
                changes.push(RawChange::update(table, Some((*old).clone()), row.clone()))
            }
            Some(_) => {}
        }
    }
    for row in previous {
        if let Some(id) = row_id(row) {
            if !after.contains_key(id) {
                changes.push(RawChange::delete(table, row.clone()));
            }
        }
    }
    changes
}

/// Start a polling feed for `query`
///
/// The first read happens before this returns, so only changes made after
/// the call are reported. The polling task stops when the feed is dropped.
pub async fn poll_feed(
    store: Arc<dyn RemoteStore>,
    query: Query,
    interval: Duration,
) -> ChangeFeed {
    let mut previous = match store.select(&query).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(table = %query.table, error = %e, "Initial poll failed; starting empty");
            Vec::new()
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if tx.is_closed() {
                break;
            }

            let current = match store.select(&query).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(table = %query.table, error = %e, "Change poll failed");
                    continue;
                }
            };

            let changes = diff(query.table, &previous, &current);
            if !changes.is_empty() {
                debug!(table = %query.table, count = changes.len(), "Polled changes");
            }
            for change in changes {
                if tx.send(change).is_err() {
                    return;
                }
            }
            previous = current;
        }
    });

    ChangeFeed::with_task(rx, task.abort_handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ChangeKind, MemoryStore};
    use serde_json::json;

    #[test]
    fn test_diff() {
        let previous = vec![
            json!({"id": "a", "name": "A"}),
            json!({"id": "b", "name": "B"}),
            json!({"id": "c", "name": "C"}),
        ];
        let current = vec![
            json!({"id": "a", "name": "A"}),
            json!({"id": "b", "name": "B2"}),
            json!({"id": "d", "name": "D"}),
        ];

        let changes = diff(Table::Categories, &previous, &current);
        let kinds: Vec<_> = changes.iter().map(|c| c.event_type).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Update, ChangeKind::Insert, ChangeKind::Delete]
        );
        assert_eq!(changes[0].old.as_ref().unwrap()["name"], "B");
        assert_eq!(changes[2].old.as_ref().unwrap()["id"], "c");
        assert!(diff(Table::Categories, &current, &current).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_feed_reports_new_rows() {
        let store = MemoryStore::new();
        store
            .insert(Table::Categories, "u1", json!({"name": "Existing"}))
            .await
            .unwrap();

        let shared: Arc<dyn RemoteStore> = Arc::new(store.clone());
        let mut feed = poll_feed(
            shared,
            Query::new(Table::Categories, "u1"),
            Duration::from_secs(5),
        )
        .await;

        store
            .insert(Table::Categories, "u1", json!({"name": "Fresh"}))
            .await
            .unwrap();

        let change = feed.recv().await.unwrap();
        assert_eq!(change.event_type, ChangeKind::Insert);
        assert_eq!(change.new.unwrap()["name"], "Fresh");
    }
}
