//! PostgREST-compatible backend
//!
//! Talks to a hosted database through its REST gateway and to its object
//! storage API:
//!
//! - rows: `GET|POST|PATCH|DELETE {url}/rest/v1/{table}` with `user_id=eq.{owner}`
//!   filters and `Prefer: return=representation` so writes echo the stored row
//! - objects: `{url}/storage/v1/object/{bucket}/{path}` plus the `list` and
//!   `sign` endpoints
//!
//! Every request carries the project `apikey` header and a bearer token (the
//! user's access token when configured, else the api key). The change feed is
//! emulated by polling, see [`super::poll`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::poll::poll_feed;
use super::{BlobStore, ChangeFeed, Query, RemoteStore, Table};
use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct RestStore {
    http_client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    bucket: String,
    poll_interval: Duration,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            bucket: "profile-pictures".to_string(),
            poll_interval: Duration::from_secs(15),
        }
    }

    /// Build from resolved configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.has_backend() {
            return Err(Error::Config(format!(
                "No backend URL configured (set backend.url or {})",
                crate::config::ENV_URL
            )));
        }
        let mut store = Self::new(&config.backend.url, &config.backend.api_key)
            .with_bucket(&config.storage.bucket)
            .with_poll_interval(config.backend.poll_interval);
        store.access_token = config.backend.access_token.clone();
        Ok(store)
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(crate::config::ENV_URL).ok()?;
        let api_key = std::env::var(crate::config::ENV_API_KEY).unwrap_or_default();
        let mut store = Self::new(&url, &api_key);
        store.access_token = std::env::var(crate::config::ENV_ACCESS_TOKEN).ok();
        Some(store)
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.http_client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.as_str())
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn rows(&self, builder: RequestBuilder) -> Result<Vec<Value>> {
        let response = check(builder.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-2xx response into `Error::Remote` with the backend's message
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);
    Err(Error::Remote(format!("{}: {}", status, message)))
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

fn owner_params(owner: &str) -> Vec<(String, String)> {
    vec![("user_id".to_string(), eq(owner))]
}

fn first_row(rows: Vec<Value>, table: Table, id: &str) -> Result<Value> {
    rows.into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("{} row {}", table, id)))
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(owner_params(&query.owner));
        for (column, value) in &query.filters {
            params.push((column.clone(), eq(value)));
        }
        if let Some(order) = query.order {
            params.push((
                "order".to_string(),
                format!("{}.{}", order.column, order.direction.as_str()),
            ));
        }

        debug!(table = %query.table, user_id = %query.owner, "Selecting rows");
        self.rows(
            self.request(Method::GET, self.table_url(query.table))
                .query(&params),
        )
        .await
    }

    async fn insert(&self, table: Table, owner: &str, mut row: Value) -> Result<Value> {
        if let Value::Object(map) = &mut row {
            map.insert("user_id".into(), Value::String(owner.to_string()));
        }
        let rows = self
            .rows(
                self.request(Method::POST, self.table_url(table))
                    .header("Prefer", "return=representation")
                    .json(&row),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::Remote(format!("insert into {} returned no row", table)))
    }

    async fn update(&self, table: Table, owner: &str, id: &str, patch: Value) -> Result<Value> {
        let mut params = owner_params(owner);
        params.push(("id".to_string(), eq(id)));
        let rows = self
            .rows(
                self.request(Method::PATCH, self.table_url(table))
                    .query(&params)
                    .header("Prefer", "return=representation")
                    .json(&patch),
            )
            .await?;
        first_row(rows, table, id)
    }

    async fn update_all(&self, table: Table, owner: &str, patch: Value) -> Result<Vec<Value>> {
        self.rows(
            self.request(Method::PATCH, self.table_url(table))
                .query(&owner_params(owner))
                .header("Prefer", "return=representation")
                .json(&patch),
        )
        .await
    }

    async fn delete(&self, table: Table, owner: &str, id: &str) -> Result<()> {
        let mut params = owner_params(owner);
        params.push(("id".to_string(), eq(id)));
        let rows = self
            .rows(
                self.request(Method::DELETE, self.table_url(table))
                    .query(&params)
                    .header("Prefer", "return=representation"),
            )
            .await?;
        first_row(rows, table, id).map(|_| ())
    }

    async fn delete_all(&self, table: Table, owner: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, self.table_url(table))
            .query(&owner_params(owner))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn subscribe(&self, table: Table, owner: &str) -> Result<ChangeFeed> {
        let store: Arc<dyn RemoteStore> = Arc::new(self.clone());
        Ok(poll_feed(store, Query::new(table, owner), self.poll_interval).await)
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}

#[async_trait]
impl BlobStore for RestStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let response = self
            .request(Method::POST, self.object_url(path))
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        check(response)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let response = self
            .request(
                Method::DELETE,
                format!("{}/storage/v1/object/{}", self.base_url, self.bucket),
            )
            .json(&json!({ "prefixes": [path] }))
            .send()
            .await?;
        check(response)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let (folder, file) = match path.rsplit_once('/') {
            Some((folder, file)) => (folder, file),
            None => ("", path),
        };
        let response = self
            .request(
                Method::POST,
                format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket),
            )
            .json(&json!({ "prefix": folder, "search": file }))
            .send()
            .await?;
        let listed: Vec<ListedObject> = check(response).await?.json().await?;
        Ok(listed.iter().any(|o| o.name == file))
    }

    async fn signed_url(&self, path: &str, ttl_secs: u64) -> Result<String> {
        let response = self
            .request(
                Method::POST,
                format!(
                    "{}/storage/v1/object/sign/{}/{}",
                    self.base_url, self.bucket, path
                ),
            )
            .json(&json!({ "expiresIn": ttl_secs }))
            .send()
            .await?;
        let signed: SignedUrl = check(response).await?.json().await?;
        if signed.signed_url.starts_with("http") {
            return Ok(signed.signed_url);
        }
        Ok(format!(
            "{}/storage/v1/{}",
            self.base_url,
            signed.signed_url.trim_start_matches('/')
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Order;
    use crate::test_utils::MockRestServer;

    fn store_for(server: &MockRestServer) -> RestStore {
        RestStore::new(&server.url(), "anon-key").with_access_token("user-token")
    }

    #[tokio::test]
    async fn test_insert_select_update_delete() {
        let server = MockRestServer::start().await;
        let store = store_for(&server);

        let row = store
            .insert(
                Table::Categories,
                "u1",
                json!({"name": "Music", "budget": 20, "color": "#f00"}),
            )
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap().to_string();
        assert_eq!(row["user_id"], "u1");

        let rows = store
            .select(&Query::new(Table::Categories, "u1").order_by(Order::asc("name")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let updated = store
            .update(Table::Categories, "u1", &id, json!({"budget": 25}))
            .await
            .unwrap();
        assert_eq!(updated["budget"], 25);

        store.delete(Table::Categories, "u1", &id).await.unwrap();
        let missing = store.delete(Table::Categories, "u1", &id).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_requests_are_owner_scoped() {
        let server = MockRestServer::start().await;
        let store = store_for(&server);

        store
            .insert(Table::Notifications, "u1", json!({"title": "a"}))
            .await
            .unwrap();
        store
            .insert(Table::Notifications, "u2", json!({"title": "b"}))
            .await
            .unwrap();

        let mine = store
            .select(&Query::new(Table::Notifications, "u1"))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);

        store.delete_all(Table::Notifications, "u1").await.unwrap();
        let theirs = store
            .select(&Query::new(Table::Notifications, "u2"))
            .await
            .unwrap();
        assert_eq!(theirs.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_auth_is_rejected() {
        let server = MockRestServer::start().await;
        let store = RestStore::new(&server.url(), "");
        let result = store.select(&Query::new(Table::Categories, "u1")).await;
        assert!(matches!(result, Err(Error::Remote(_))));
    }

    #[tokio::test]
    async fn test_storage_round_trip() {
        let server = MockRestServer::start().await;
        let store = store_for(&server);

        store
            .upload("u1/profile-picture.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert!(store.exists("u1/profile-picture.png").await.unwrap());

        let url = store.signed_url("u1/profile-picture.png", 60).await.unwrap();
        assert!(url.starts_with(&server.url()));
        assert!(url.contains("profile-pictures/u1/profile-picture.png"));

        store.remove("u1/profile-picture.png").await.unwrap();
        assert!(!store.exists("u1/profile-picture.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_requires_url() {
        let config = Config::default();
        assert!(matches!(
            RestStore::from_config(&config),
            Err(Error::Config(_))
        ));
    }
}
