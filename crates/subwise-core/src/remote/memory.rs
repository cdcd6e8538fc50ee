//! In-memory backend
//!
//! Behaves like the hosted backend for one process: rows get ids and
//! timestamps on insert, every write fans out to change-feed subscribers of
//! the same table and owner, and the whole state can be saved to and loaded
//! from a JSON snapshot file (the CLI's local mode).
//!
//! Tests can make reads, writes or uploads fail and can push raw change
//! events directly to subscribers to simulate out-of-order delivery.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{BlobStore, ChangeFeed, Direction, Query, RawChange, RemoteStore, Table};
use crate::error::{Error, Result};

/// Serialized backend contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub subscriptions: Vec<Value>,
    #[serde(default)]
    pub categories: Vec<Value>,
    #[serde(default)]
    pub notifications: Vec<Value>,
    #[serde(default)]
    pub profiles: Vec<Value>,
}

impl Snapshot {
    fn rows(&self, table: Table) -> &Vec<Value> {
        match table {
            Table::Subscriptions => &self.subscriptions,
            Table::Categories => &self.categories,
            Table::Notifications => &self.notifications,
            Table::Profiles => &self.profiles,
        }
    }

    fn rows_mut(&mut self, table: Table) -> &mut Vec<Value> {
        match table {
            Table::Subscriptions => &mut self.subscriptions,
            Table::Categories => &mut self.categories,
            Table::Notifications => &mut self.notifications,
            Table::Profiles => &mut self.profiles,
        }
    }
}

struct Subscriber {
    table: Table,
    owner: String,
    tx: mpsc::UnboundedSender<RawChange>,
}

struct Blob {
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Default)]
struct Inner {
    data: Snapshot,
    blobs: HashMap<String, Blob>,
    subscribers: Vec<Subscriber>,
    failing_reads: HashSet<Table>,
    failing_writes: HashSet<Table>,
    failing_uploads: u32,
    upload_attempts: u32,
}

impl Inner {
    fn publish(&mut self, change: RawChange) {
        self.subscribers.retain(|s| !s.tx.is_closed());
        let owner = change.owner().map(str::to_string);
        for sub in &self.subscribers {
            if sub.table == change.table && owner.as_deref() == Some(sub.owner.as_str()) {
                let _ = sub.tx.send(change.clone());
            }
        }
    }

    fn check_write(&self, table: Table) -> Result<()> {
        if self.failing_writes.contains(&table) {
            return Err(Error::Remote(format!("write to {} rejected", table)));
        }
        Ok(())
    }
}

/// Process-local backend implementing both [`RemoteStore`] and [`BlobStore`]
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    bucket: String,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn belongs_to(row: &Value, owner: &str) -> bool {
    row.get("user_id").and_then(Value::as_str) == Some(owner)
}

fn has_id(row: &Value, id: &str) -> bool {
    row.get("id").and_then(Value::as_str) == Some(id)
}

fn compare_column(a: &Value, b: &Value, column: &str) -> Ordering {
    match (a.get(column), b.get(column)) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn as_object(value: Value, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidData(format!(
            "{} must be a JSON object, got {}",
            what, other
        ))),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: snapshot,
                ..Default::default()
            })),
            bucket: "profile-pictures".to_string(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Load a snapshot file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        debug!(path = %path.display(), "Loaded snapshot");
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the current state to `path`, atomically replacing it
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot()?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, &snapshot)?;
        file.write_all(b"\n")?;
        file.persist(path).map_err(|e| Error::Io(e.error))?;
        debug!(path = %path.display(), "Saved snapshot");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.lock()?.data.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".into()))
    }

    /// Make every read of `table` fail until [`MemoryStore::heal`]
    pub fn fail_reads(&self, table: Table) -> Result<()> {
        self.lock()?.failing_reads.insert(table);
        Ok(())
    }

    /// Make every write to `table` fail until [`MemoryStore::heal`]
    pub fn fail_writes(&self, table: Table) -> Result<()> {
        self.lock()?.failing_writes.insert(table);
        Ok(())
    }

    /// Make the next `count` uploads fail
    pub fn fail_next_uploads(&self, count: u32) -> Result<()> {
        self.lock()?.failing_uploads = count;
        Ok(())
    }

    pub fn heal(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.failing_reads.clear();
        inner.failing_writes.clear();
        inner.failing_uploads = 0;
        Ok(())
    }

    /// Number of upload calls seen so far
    pub fn upload_attempts(&self) -> Result<u32> {
        Ok(self.lock()?.upload_attempts)
    }

    /// Deliver a change to subscribers without touching stored rows
    pub fn emit_raw(&self, change: RawChange) -> Result<()> {
        self.lock()?.publish(change);
        Ok(())
    }

    /// Open change-feed subscriptions
    pub fn subscriber_count(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.subscribers.retain(|s| !s.tx.is_closed());
        Ok(inner.subscribers.len())
    }

    /// Content type of a stored object
    pub fn blob_content_type(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .blobs
            .get(path)
            .map(|b| b.content_type.clone()))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let inner = self.lock()?;
        if inner.failing_reads.contains(&query.table) {
            return Err(Error::Remote(format!("read of {} failed", query.table)));
        }

        let mut rows: Vec<Value> = inner
            .data
            .rows(query.table)
            .iter()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();

        if let Some(order) = query.order {
            rows.sort_by(|a, b| {
                let ord = compare_column(a, b, order.column);
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        Ok(rows)
    }

    async fn insert(&self, table: Table, owner: &str, row: Value) -> Result<Value> {
        let mut inner = self.lock()?;
        inner.check_write(table)?;

        let mut map = as_object(row, "inserted row")?;
        let now = now_stamp();
        map.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        map.insert("user_id".into(), Value::String(owner.to_string()));
        map.entry("created_at")
            .or_insert_with(|| Value::String(now.clone()));
        map.insert("updated_at".into(), Value::String(now));
        let row = Value::Object(map);

        inner.data.rows_mut(table).push(row.clone());
        inner.publish(RawChange::insert(table, row.clone()));
        Ok(row)
    }

    async fn update(&self, table: Table, owner: &str, id: &str, patch: Value) -> Result<Value> {
        let mut inner = self.lock()?;
        inner.check_write(table)?;

        let patch = as_object(patch, "update patch")?;
        let row = inner
            .data
            .rows_mut(table)
            .iter_mut()
            .find(|row| has_id(row, id) && belongs_to(row, owner))
            .ok_or_else(|| Error::NotFound(format!("{} row {}", table, id)))?;

        let old = row.clone();
        if let Value::Object(map) = row {
            for (key, value) in patch {
                if key != "id" && key != "user_id" {
                    map.insert(key, value);
                }
            }
            map.insert("updated_at".into(), Value::String(now_stamp()));
        }
        let updated = row.clone();

        inner.publish(RawChange::update(table, Some(old), updated.clone()));
        Ok(updated)
    }

    async fn update_all(&self, table: Table, owner: &str, patch: Value) -> Result<Vec<Value>> {
        let ids: Vec<String> = {
            let inner = self.lock()?;
            inner.check_write(table)?;
            inner
                .data
                .rows(table)
                .iter()
                .filter(|row| belongs_to(row, owner))
                .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
                .collect()
        };

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.update(table, owner, &id, patch.clone()).await?);
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, owner: &str, id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.check_write(table)?;

        let rows = inner.data.rows_mut(table);
        let index = rows
            .iter()
            .position(|row| has_id(row, id) && belongs_to(row, owner))
            .ok_or_else(|| Error::NotFound(format!("{} row {}", table, id)))?;
        let old = rows.remove(index);

        inner.publish(RawChange::delete(table, old));
        Ok(())
    }

    async fn delete_all(&self, table: Table, owner: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.check_write(table)?;

        let rows = inner.data.rows_mut(table);
        let (removed, kept): (Vec<Value>, Vec<Value>) =
            rows.drain(..).partition(|row| belongs_to(row, owner));
        *rows = kept;

        for old in removed {
            inner.publish(RawChange::delete(table, old));
        }
        Ok(())
    }

    async fn subscribe(&self, table: Table, owner: &str) -> Result<ChangeFeed> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()?.subscribers.push(Subscriber {
            table,
            owner: owner.to_string(),
            tx,
        });
        debug!(table = %table, user_id = owner, "Change feed opened");
        Ok(ChangeFeed::new(rx))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.upload_attempts += 1;
        if inner.failing_uploads > 0 {
            inner.failing_uploads -= 1;
            return Err(Error::Storage(format!("upload of {} failed", path)));
        }
        inner.blobs.insert(
            path.to_string(),
            Blob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.lock()?.blobs.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.lock()?.blobs.contains_key(path))
    }

    async fn signed_url(&self, path: &str, ttl_secs: u64) -> Result<String> {
        let inner = self.lock()?;
        let blob = inner
            .blobs
            .get(path)
            .ok_or_else(|| Error::NotFound(format!("object {}", path)))?;
        Ok(format!(
            "memory://storage/v1/object/sign/{}/{}?size={}&expires_in={}",
            self.bucket,
            path,
            blob.bytes.len(),
            ttl_secs
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ChangeKind, Order};
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_id_owner_and_timestamps() {
        let store = MemoryStore::new();
        let row = store
            .insert(Table::Categories, "u1", json!({"name": "Music", "budget": 20}))
            .await
            .unwrap();
        assert!(row["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(row["user_id"], "u1");
        assert!(row["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_select_is_owner_scoped_and_ordered() {
        let store = MemoryStore::new();
        for (owner, name) in [("u1", "Zoo"), ("u2", "Other"), ("u1", "Apple")] {
            store
                .insert(Table::Categories, owner, json!({"name": name}))
                .await
                .unwrap();
        }

        let query = Query::new(Table::Categories, "u1").order_by(Order::asc("name"));
        let rows = store.select(&query).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Apple", "Zoo"]);
    }

    #[tokio::test]
    async fn test_writes_fan_out_to_matching_subscribers() {
        let store = MemoryStore::new();
        let mut mine = store.subscribe(Table::Subscriptions, "u1").await.unwrap();
        let mut theirs = store.subscribe(Table::Subscriptions, "u2").await.unwrap();

        let row = store
            .insert(Table::Subscriptions, "u1", json!({"name": "Netflix"}))
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap().to_string();
        store
            .update(Table::Subscriptions, "u1", &id, json!({"name": "Netflix HD"}))
            .await
            .unwrap();
        store.delete(Table::Subscriptions, "u1", &id).await.unwrap();

        assert_eq!(mine.recv().await.unwrap().event_type, ChangeKind::Insert);
        let update = mine.recv().await.unwrap();
        assert_eq!(update.event_type, ChangeKind::Update);
        assert_eq!(update.new.unwrap()["name"], "Netflix HD");
        assert_eq!(mine.recv().await.unwrap().event_type, ChangeKind::Delete);
        assert!(theirs.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete_are_owner_scoped() {
        let store = MemoryStore::new();
        let row = store
            .insert(Table::Notifications, "u1", json!({"title": "t"}))
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap();

        let err = store
            .update(Table::Notifications, "u2", id, json!({"is_read": true}))
            .await;
        assert!(matches!(err, Err(Error::NotFound(_))));
        let err = store.delete(Table::Notifications, "u2", id).await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dropped_feed_is_pruned() {
        let store = MemoryStore::new();
        let feed = store.subscribe(Table::Categories, "u1").await.unwrap();
        assert_eq!(store.subscriber_count().unwrap(), 1);
        drop(feed);
        assert_eq!(store.subscriber_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.fail_reads(Table::Subscriptions).unwrap();
        store.fail_writes(Table::Categories).unwrap();

        assert!(store
            .select(&Query::new(Table::Subscriptions, "u1"))
            .await
            .is_err());
        assert!(store
            .insert(Table::Categories, "u1", json!({"name": "x"}))
            .await
            .is_err());

        store.heal().unwrap();
        assert!(store
            .select(&Query::new(Table::Subscriptions, "u1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subwise.json");

        let store = MemoryStore::new();
        store
            .insert(Table::Categories, "u1", json!({"name": "Music", "budget": 10}))
            .await
            .unwrap();
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        let rows = loaded
            .select(&Query::new(Table::Categories, "u1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Music");
    }

    #[tokio::test]
    async fn test_blob_upload_failures_then_success() {
        let store = MemoryStore::new();
        store.fail_next_uploads(1).unwrap();

        assert!(store.upload("u1/p.png", vec![1, 2], "image/png").await.is_err());
        store.upload("u1/p.png", vec![1, 2], "image/png").await.unwrap();

        assert_eq!(store.upload_attempts().unwrap(), 2);
        assert!(store.exists("u1/p.png").await.unwrap());
        let url = store.signed_url("u1/p.png", 60).await.unwrap();
        assert!(url.contains("profile-pictures/u1/p.png"));

        store.remove("u1/p.png").await.unwrap();
        assert!(!store.exists("u1/p.png").await.unwrap());
        assert!(store.signed_url("u1/p.png", 60).await.is_err());
    }
}
