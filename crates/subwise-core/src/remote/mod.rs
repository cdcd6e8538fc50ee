//! Hosted backend abstraction
//!
//! The client never owns data: every row lives in a hosted backend that
//! offers per-user bulk reads, single-row writes, a change feed and a blob
//! store for profile pictures. This module defines that contract.
//!
//! # Architecture
//!
//! - `RemoteStore` trait: JSON-row tables scoped by owner, plus change feeds
//! - `BlobStore` trait: object storage for profile pictures
//! - `Record` trait: binds a model type to its table, id and ordering
//! - Backends: `MemoryStore` (local snapshot / tests) and `RestStore`
//!   (PostgREST-compatible HTTP API, polled change feed)
//!
//! Both traits are object safe so a session can hold `Arc<dyn RemoteStore>`.

pub mod memory;
pub mod poll;
pub mod rest;

pub use memory::{MemoryStore, Snapshot};
pub use rest::RestStore;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::{Error, Result};
use crate::models::{Category, Notification, Profile, Subscription};

/// Backend tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Subscriptions,
    Categories,
    Notifications,
    Profiles,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Subscriptions,
        Table::Categories,
        Table::Notifications,
        Table::Profiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscriptions => "subscriptions",
            Self::Categories => "categories",
            Self::Notifications => "notifications",
            Self::Profiles => "profiles",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Sort order of a bulk read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub direction: Direction,
}

impl Order {
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            direction: Direction::Asc,
        }
    }

    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            direction: Direction::Desc,
        }
    }
}

/// `select * from <table> where user_id = <owner> [and col = value ...] order by ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub owner: String,
    pub filters: Vec<(String, String)>,
    pub order: Option<Order>,
}

impl Query {
    pub fn new(table: Table, owner: impl Into<String>) -> Self {
        Self {
            table,
            owner: owner.into(),
            filters: Vec::new(),
            order: None,
        }
    }

    /// Add an equality filter
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    /// Whether `row` passes the owner and equality filters
    pub fn matches(&self, row: &Value) -> bool {
        if row.get("user_id").and_then(Value::as_str) != Some(self.owner.as_str()) {
            return false;
        }
        self.filters.iter().all(|(column, expected)| {
            match row.get(column) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Bool(b)) => b.to_string() == *expected,
                Some(Value::Number(n)) => n.to_string() == *expected,
                Some(Value::Null) | None => expected == "null",
                Some(_) => false,
            }
        })
    }
}

/// Kind of row change, with the backend's wire names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change as delivered by the backend's change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    pub table: Table,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl RawChange {
    pub fn insert(table: Table, row: Value) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            table,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(table: Table, old: Option<Value>, row: Value) -> Self {
        Self {
            event_type: ChangeKind::Update,
            table,
            new: Some(row),
            old,
        }
    }

    pub fn delete(table: Table, old: Value) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            table,
            new: None,
            old: Some(old),
        }
    }

    /// Owner of the changed row, from whichever image carries it
    pub fn owner(&self) -> Option<&str> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .and_then(|row| row.get("user_id"))
            .and_then(Value::as_str)
    }
}

/// A typed change event
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    Delete(String),
}

impl<T: DeserializeOwned> ChangeEvent<T> {
    pub fn decode(raw: &RawChange) -> Result<Self> {
        match raw.event_type {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = raw.new.clone().ok_or_else(|| {
                    Error::InvalidData(format!(
                        "{:?} event on {} without a new row",
                        raw.event_type, raw.table
                    ))
                })?;
                let record: T = serde_json::from_value(row)?;
                Ok(if raw.event_type == ChangeKind::Insert {
                    ChangeEvent::Insert(record)
                } else {
                    ChangeEvent::Update(record)
                })
            }
            ChangeKind::Delete => raw
                .old
                .as_ref()
                .and_then(|old| old.get("id"))
                .and_then(Value::as_str)
                .map(|id| ChangeEvent::Delete(id.to_string()))
                .ok_or_else(|| {
                    Error::InvalidData(format!("DELETE event on {} without an old id", raw.table))
                }),
        }
    }
}

/// Receiving end of a change-feed subscription
///
/// Dropping the feed unsubscribes: the backend notices the closed channel,
/// and a polling task owned by the feed is aborted.
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<RawChange>,
    task: Option<AbortHandle>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<RawChange>) -> Self {
        Self { rx, task: None }
    }

    /// Feed backed by a task that should stop with it
    pub fn with_task(rx: mpsc::UnboundedReceiver<RawChange>, task: AbortHandle) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Next change, or `None` once the backend closes the feed
    pub async fn recv(&mut self) -> Option<RawChange> {
        self.rx.recv().await
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Row storage of the hosted backend
///
/// Every call is scoped to one owner; rows of other users are invisible.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Bulk read
    async fn select(&self, query: &Query) -> Result<Vec<Value>>;

    /// Insert one row and return it as stored (with id and timestamps)
    async fn insert(&self, table: Table, owner: &str, row: Value) -> Result<Value>;

    /// Patch one row by id; `NotFound` when no such row belongs to `owner`
    async fn update(&self, table: Table, owner: &str, id: &str, patch: Value) -> Result<Value>;

    /// Patch every row of `owner`
    async fn update_all(&self, table: Table, owner: &str, patch: Value) -> Result<Vec<Value>>;

    async fn delete(&self, table: Table, owner: &str, id: &str) -> Result<()>;

    async fn delete_all(&self, table: Table, owner: &str) -> Result<()>;

    /// Subscribe to row changes of `owner` in `table`
    async fn subscribe(&self, table: Table, owner: &str) -> Result<ChangeFeed>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Object storage for profile pictures
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path`, replacing any existing object
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn remove(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Time-limited URL for reading the object
    async fn signed_url(&self, path: &str, ttl_secs: u64) -> Result<String>;
}

/// A model stored in a backend table
pub trait Record:
    DeserializeOwned + Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static
{
    const TABLE: Table;

    fn id(&self) -> &str;

    /// Order used for bulk reads
    fn order() -> Option<Order>;

    /// Same ordering as [`Record::order`], for placing change events
    fn sort_cmp(a: &Self, b: &Self) -> Ordering;
}

impl Record for Subscription {
    const TABLE: Table = Table::Subscriptions;

    fn id(&self) -> &str {
        &self.id
    }

    fn order() -> Option<Order> {
        Some(Order::asc("name"))
    }

    fn sort_cmp(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name)
    }
}

impl Record for Category {
    const TABLE: Table = Table::Categories;

    fn id(&self) -> &str {
        &self.id
    }

    fn order() -> Option<Order> {
        Some(Order::asc("name"))
    }

    fn sort_cmp(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name)
    }
}

impl Record for Notification {
    const TABLE: Table = Table::Notifications;

    fn id(&self) -> &str {
        &self.id
    }

    fn order() -> Option<Order> {
        Some(Order::desc("created_at"))
    }

    fn sort_cmp(a: &Self, b: &Self) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }
}

impl Record for Profile {
    const TABLE: Table = Table::Profiles;

    fn id(&self) -> &str {
        &self.id
    }

    fn order() -> Option<Order> {
        None
    }

    fn sort_cmp(_: &Self, _: &Self) -> Ordering {
        Ordering::Equal
    }
}

fn decode_rows<T: Record>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}

/// Read every row of `owner` in `T`'s table, in `T`'s order
pub async fn fetch_all<T: Record>(store: &dyn RemoteStore, owner: &str) -> Result<Vec<T>> {
    let mut query = Query::new(T::TABLE, owner);
    if let Some(order) = T::order() {
        query = query.order_by(order);
    }
    decode_rows(store.select(&query).await?)
}

/// Read rows of `owner` matching extra equality filters
pub async fn fetch_where<T: Record>(
    store: &dyn RemoteStore,
    owner: &str,
    filters: &[(&str, &str)],
) -> Result<Vec<T>> {
    let mut query = Query::new(T::TABLE, owner);
    for (column, value) in filters {
        query = query.filter(*column, *value);
    }
    if let Some(order) = T::order() {
        query = query.order_by(order);
    }
    decode_rows(store.select(&query).await?)
}

pub async fn insert_record<T: Record, N: Serialize + Sync>(
    store: &dyn RemoteStore,
    owner: &str,
    draft: &N,
) -> Result<T> {
    let row = serde_json::to_value(draft)?;
    let stored = store.insert(T::TABLE, owner, row).await?;
    Ok(serde_json::from_value(stored)?)
}

pub async fn update_record<T: Record, P: Serialize + Sync>(
    store: &dyn RemoteStore,
    owner: &str,
    id: &str,
    patch: &P,
) -> Result<T> {
    let patch = serde_json::to_value(patch)?;
    let stored = store.update(T::TABLE, owner, id, patch).await?;
    Ok(serde_json::from_value(stored)?)
}

pub async fn update_all_records<T: Record, P: Serialize + Sync>(
    store: &dyn RemoteStore,
    owner: &str,
    patch: &P,
) -> Result<Vec<T>> {
    let patch = serde_json::to_value(patch)?;
    decode_rows(store.update_all(T::TABLE, owner, patch).await?)
}

pub async fn delete_record<T: Record>(store: &dyn RemoteStore, owner: &str, id: &str) -> Result<()> {
    store.delete(T::TABLE, owner, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_change_wire_format() {
        let raw: RawChange = serde_json::from_value(json!({
            "eventType": "DELETE",
            "table": "subscriptions",
            "old": {"id": "s1"}
        }))
        .unwrap();
        assert_eq!(raw.event_type, ChangeKind::Delete);
        let event = ChangeEvent::<Subscription>::decode(&raw).unwrap();
        assert_eq!(event, ChangeEvent::Delete("s1".into()));
    }

    #[test]
    fn test_decode_rejects_insert_without_row() {
        let raw = RawChange {
            event_type: ChangeKind::Insert,
            table: Table::Categories,
            new: None,
            old: None,
        };
        assert!(ChangeEvent::<Category>::decode(&raw).is_err());
    }

    #[test]
    fn test_decode_update() {
        let raw = RawChange::update(
            Table::Categories,
            None,
            json!({"id": "c1", "user_id": "u1", "name": "Music", "budget": 20, "color": "#fff"}),
        );
        match ChangeEvent::<Category>::decode(&raw).unwrap() {
            ChangeEvent::Update(c) => assert_eq!(c.budget, 20.0),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_query_matches_owner_and_filters() {
        let query = Query::new(Table::Notifications, "u1").filter("is_read", "false");
        assert!(query.matches(&json!({"user_id": "u1", "is_read": false})));
        assert!(!query.matches(&json!({"user_id": "u1", "is_read": true})));
        assert!(!query.matches(&json!({"user_id": "u2", "is_read": false})));
    }
}
