//! HTTP remote for a PostgREST-style backend.
//!
//! Queued operations map onto table endpoints:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create | `POST {base}/rest/v1/{collection}` |
//! | update | `PATCH {base}/rest/v1/{collection}?id=eq.{id}` |
//! | delete | `DELETE {base}/rest/v1/{collection}?id=eq.{id}` |
//!
//! Import steps use the `stores`, `purchase_lines` and `sale_lines` tables
//! and the `recompute_daily_costs` RPC.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use larder_core::http::HttpRemote;
//!
//! # fn example() -> Result<(), larder_core::Error> {
//! let remote = HttpRemote::new("https://db.example.com", Duration::from_secs(15))?
//!     .with_api_key("service-key");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use time::Date;
use tracing::debug;

use larder_types::{PurchaseLine, SaleLine, Store, StoreDraft, StoreId};

use crate::error::{Error, RemoteError, Result};
use crate::traits::{ImportBackend, RemoteService};

const STORES: &str = "stores";
const PURCHASE_LINES: &str = "purchase_lines";
const SALE_LINES: &str = "sale_lines";

/// [`RemoteService`] and [`ImportBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct InsertedRow {
    id: Value,
}

impl HttpRemote {
    /// Create a remote for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::invalid_config(format!("failed to build HTTP client: {}", e)))?;
        Self::with_client(base_url, client)
    }

    /// Create a remote with a custom reqwest Client.
    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::invalid_config(format!(
                "remote URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            api_key: None,
        })
    }

    /// Send `key` as both `apikey` and bearer token.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), error_message(&body, status.as_str())))
    }

    async fn insert_rows<T: serde::Serialize>(
        &self,
        table: &str,
        rows: &[T],
    ) -> std::result::Result<Vec<String>, RemoteError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .query(&[("select", "id")])
            .json(rows);
        let inserted: Vec<InsertedRow> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::transient(format!("invalid insert response: {}", e)))?;

        debug!("Inserted {} row(s) into {}", inserted.len(), table);
        Ok(inserted.into_iter().map(|row| id_string(&row.id)).collect())
    }

    async fn delete_rows(&self, table: &str, ids: &[String]) -> std::result::Result<(), RemoteError> {
        if ids.is_empty() {
            return Ok(());
        }
        let filter = format!("in.({})", ids.join(","));
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", filter.as_str())]);
        self.send(request).await?;
        Ok(())
    }
}

/// Pull a message out of a PostgREST error body, falling back to the status.
fn error_message(body: &str, status: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            }
        })
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn record_id(payload: &Value) -> std::result::Result<String, RemoteError> {
    match payload.get("id") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RemoteError::validation("update payload has no id")),
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn create(&self, collection: &str, payload: &Value) -> std::result::Result<(), RemoteError> {
        let request = self.client.post(self.table_url(collection)).json(payload);
        self.send(request).await?;
        Ok(())
    }

    async fn update(&self, collection: &str, payload: &Value) -> std::result::Result<(), RemoteError> {
        let id = record_id(payload)?;
        let filter = format!("eq.{}", id);
        let request = self
            .client
            .patch(self.table_url(collection))
            .query(&[("id", filter.as_str())])
            .json(payload);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> std::result::Result<(), RemoteError> {
        let filter = format!("eq.{}", id);
        let request = self
            .client
            .delete(self.table_url(collection))
            .query(&[("id", filter.as_str())]);
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl ImportBackend for HttpRemote {
    async fn create_store(&self, draft: &StoreDraft, slug: &str) -> std::result::Result<Store, RemoteError> {
        let body = json!({
            "name": draft.name,
            "slug": slug,
            "address": draft.address,
            "currency": draft.currency,
        });
        let request = self
            .client
            .post(self.table_url(STORES))
            .header("Prefer", "return=representation")
            .json(&body);
        let mut created: Vec<Store> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::transient(format!("invalid store response: {}", e)))?;

        created
            .pop()
            .ok_or_else(|| RemoteError::transient("store insert returned no row"))
    }

    async fn delete_store(&self, id: &StoreId) -> std::result::Result<(), RemoteError> {
        self.delete(STORES, id.as_str()).await
    }

    async fn insert_purchase_lines(
        &self,
        lines: &[PurchaseLine],
    ) -> std::result::Result<Vec<String>, RemoteError> {
        self.insert_rows(PURCHASE_LINES, lines).await
    }

    async fn delete_purchase_lines(&self, ids: &[String]) -> std::result::Result<(), RemoteError> {
        self.delete_rows(PURCHASE_LINES, ids).await
    }

    async fn insert_sale_lines(&self, lines: &[SaleLine]) -> std::result::Result<Vec<String>, RemoteError> {
        self.insert_rows(SALE_LINES, lines).await
    }

    async fn delete_sale_lines(&self, ids: &[String]) -> std::result::Result<(), RemoteError> {
        self.delete_rows(SALE_LINES, ids).await
    }

    async fn recompute_daily_costs(
        &self,
        store_id: &StoreId,
        start: Date,
        end: Date,
    ) -> std::result::Result<(), RemoteError> {
        let request = self
            .client
            .post(format!("{}/rest/v1/rpc/recompute_daily_costs", self.base_url))
            .json(&json!({
                "store_id": store_id,
                "start_date": start.to_string(),
                "end_date": end.to_string(),
            }));
        self.send(request).await?;
        Ok(())
    }
}
