//! Test utilities for subwise-core
//!
//! Record fixtures plus a mock PostgREST + storage server that speaks the
//! subset of the wire protocol [`crate::remote::RestStore`] uses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::models::{
    BillingCycle, Category, NewNotification, Notification, Subscription, SubscriptionStatus,
    DEFAULT_REMINDER_DAYS,
};
use crate::remote::{MemoryStore, RemoteStore, Table};

pub const TEST_USER: &str = "user-1";

/// Active subscription owned by [`TEST_USER`], due 2024-03-15
pub fn subscription(id: &str, name: &str, amount: f64, cycle: BillingCycle) -> Subscription {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Subscription {
        id: id.to_string(),
        user_id: TEST_USER.to_string(),
        name: name.to_string(),
        amount,
        billing_cycle: cycle,
        category_id: None,
        status: SubscriptionStatus::Active,
        next_billing_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        reminder_days: DEFAULT_REMINDER_DAYS,
        description: None,
        created_at: created,
        updated_at: created,
    }
}

/// Builder-style tweaks for subscription fixtures
pub trait SubscriptionFixture {
    fn with_category(self, category_id: &str) -> Self;
    fn due(self, date: NaiveDate) -> Self;
    fn created(self, date: NaiveDate) -> Self;
    fn reminder(self, days: u32) -> Self;
    fn inactive(self) -> Self;
}

impl SubscriptionFixture for Subscription {
    fn with_category(mut self, category_id: &str) -> Self {
        self.category_id = Some(category_id.to_string());
        self
    }

    fn due(mut self, date: NaiveDate) -> Self {
        self.next_billing_date = date;
        self
    }

    fn created(mut self, date: NaiveDate) -> Self {
        self.created_at = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
        self
    }

    fn reminder(mut self, days: u32) -> Self {
        self.reminder_days = days;
        self
    }

    fn inactive(mut self) -> Self {
        self.status = SubscriptionStatus::Inactive;
        self
    }
}

pub fn category(id: &str, name: &str, budget: f64) -> Category {
    Category {
        id: id.to_string(),
        user_id: TEST_USER.to_string(),
        name: name.to_string(),
        budget,
        color: "#3b82f6".to_string(),
    }
}

/// A persisted copy of a notification draft
pub fn notification_from(draft: &NewNotification, id: &str) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: TEST_USER.to_string(),
        title: draft.title.clone(),
        message: draft.message.clone(),
        notification_type: draft.notification_type,
        is_read: draft.is_read,
        related_id: draft.related_id.clone(),
        dedup_key: draft.dedup_key.clone(),
        created_at: Utc::now(),
    }
}

/// Insert a category row straight into a memory backend
pub async fn seed_category(store: &MemoryStore, owner: &str, name: &str, budget: f64) -> Value {
    store
        .insert(
            Table::Categories,
            owner,
            json!({"name": name, "budget": budget, "color": "#10b981"}),
        )
        .await
        .unwrap()
}

/// Insert a subscription row straight into a memory backend
pub async fn seed_subscription(
    store: &MemoryStore,
    owner: &str,
    name: &str,
    amount: f64,
    cycle: BillingCycle,
    next_billing_date: NaiveDate,
    reminder_days: u32,
) -> Value {
    store
        .insert(
            Table::Subscriptions,
            owner,
            json!({
                "name": name,
                "amount": amount,
                "billing_cycle": cycle,
                "status": "active",
                "next_billing_date": next_billing_date,
                "reminder_days": reminder_days,
            }),
        )
        .await
        .unwrap()
}

#[derive(Default)]
struct MockState {
    tables: HashMap<String, Vec<Value>>,
    /// "bucket/path" -> (bytes, content type)
    objects: HashMap<String, (Vec<u8>, String)>,
}

type SharedState = Arc<Mutex<MockState>>;

/// Mock PostgREST + storage server for testing
pub struct MockRestServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockRestServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state: SharedState = Arc::new(Mutex::new(MockState::default()));
        let app = Router::new()
            .route(
                "/rest/v1/:table",
                get(handle_select)
                    .post(handle_insert)
                    .patch(handle_update)
                    .delete(handle_delete),
            )
            .route("/storage/v1/object/*rest", any(handle_object))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockRestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// Reject requests without a project api key
fn authorize(headers: &HeaderMap) -> Option<Response> {
    let key = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if key.is_empty() {
        return Some(error(StatusCode::UNAUTHORIZED, "Invalid API key"));
    }
    None
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `column=eq.value` filters; `select` and `order` are not filters
fn row_matches(row: &Value, params: &[(String, String)]) -> bool {
    params
        .iter()
        .filter(|(column, _)| column != "select" && column != "order")
        .all(|(column, value)| {
            let expected = value.strip_prefix("eq.").unwrap_or(value);
            row.get(column).map(cell).as_deref() == Some(expected)
        })
}

fn sort_rows(rows: &mut [Value], params: &[(String, String)]) {
    let Some((_, order)) = params.iter().find(|(column, _)| column == "order") else {
        return;
    };
    let (column, direction) = order.rsplit_once('.').unwrap_or((order.as_str(), "asc"));
    rows.sort_by(|a, b| {
        let a = a.get(column).map(cell).unwrap_or_default();
        let b = b.get(column).map(cell).unwrap_or_default();
        if direction == "desc" {
            b.cmp(&a)
        } else {
            a.cmp(&b)
        }
    });
}

async fn handle_select(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    if let Some(denied) = authorize(&headers) {
        return denied;
    }
    let state = state.lock().unwrap();
    let mut rows: Vec<Value> = state
        .tables
        .get(&table)
        .map(|rows| {
            rows.iter()
                .filter(|row| row_matches(row, &params))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    sort_rows(&mut rows, &params);
    Json(rows).into_response()
}

async fn handle_insert(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(mut row): Json<Value>,
) -> Response {
    if let Some(denied) = authorize(&headers) {
        return denied;
    }
    let now = Utc::now().to_rfc3339();
    if let Value::Object(map) = &mut row {
        map.entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        map.entry("created_at")
            .or_insert_with(|| Value::String(now.clone()));
        map.insert("updated_at".into(), Value::String(now));
    }
    let mut state = state.lock().unwrap();
    state.tables.entry(table).or_default().push(row.clone());
    (StatusCode::CREATED, Json(vec![row])).into_response()
}

async fn handle_update(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Response {
    if let Some(denied) = authorize(&headers) {
        return denied;
    }
    let now = Utc::now().to_rfc3339();
    let mut state = state.lock().unwrap();
    let mut updated = Vec::new();
    for row in state.tables.entry(table).or_default().iter_mut() {
        if !row_matches(row, &params) {
            continue;
        }
        if let (Value::Object(target), Value::Object(fields)) = (&mut *row, &patch) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
            target.insert("updated_at".into(), Value::String(now.clone()));
        }
        updated.push(row.clone());
    }
    Json(updated).into_response()
}

async fn handle_delete(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    if let Some(denied) = authorize(&headers) {
        return denied;
    }
    let mut state = state.lock().unwrap();
    let rows = state.tables.entry(table).or_default();
    let (removed, kept): (Vec<Value>, Vec<Value>) = rows
        .drain(..)
        .partition(|row| row_matches(row, &params));
    *rows = kept;
    Json(removed).into_response()
}

/// Storage object API: upload, bulk remove, list and sign
async fn handle_object(
    State(state): State<SharedState>,
    method: Method,
    Path(rest): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(denied) = authorize(&headers) {
        return denied;
    }
    let rest = rest.trim_start_matches('/');
    let mut state = state.lock().unwrap();

    if let Some(bucket) = rest.strip_prefix("list/") {
        let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let prefix = request["prefix"].as_str().unwrap_or("");
        let search = request["search"].as_str().unwrap_or("");
        let folder = if prefix.is_empty() {
            format!("{}/", bucket)
        } else {
            format!("{}/{}/", bucket, prefix.trim_end_matches('/'))
        };
        let listed: Vec<Value> = state
            .objects
            .keys()
            .filter_map(|key| key.strip_prefix(&folder))
            .filter(|name| !name.contains('/') && name.contains(search))
            .map(|name| json!({ "name": name }))
            .collect();
        return Json(listed).into_response();
    }

    if let Some(key) = rest.strip_prefix("sign/") {
        if !state.objects.contains_key(key) {
            return error(StatusCode::NOT_FOUND, "Object not found");
        }
        let url = format!("/object/sign/{}?token=mock-token", key);
        return Json(json!({ "signedURL": url })).into_response();
    }

    match method {
        Method::DELETE if !rest.contains('/') => {
            let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            let mut removed = Vec::new();
            for path in request["prefixes"].as_array().into_iter().flatten() {
                let key = format!("{}/{}", rest, path.as_str().unwrap_or(""));
                if state.objects.remove(&key).is_some() {
                    removed.push(json!({ "name": path }));
                }
            }
            Json(removed).into_response()
        }
        Method::POST | Method::PUT => {
            let content_type = headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            state
                .objects
                .insert(rest.to_string(), (body.to_vec(), content_type));
            Json(json!({ "Key": rest })).into_response()
        }
        _ => error(StatusCode::METHOD_NOT_ALLOWED, "Unsupported storage request"),
    }
}
