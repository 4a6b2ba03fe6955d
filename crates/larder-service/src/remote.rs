//! Remote backend selection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use time::Date;
use tracing::{info, warn};

use larder_core::{HttpRemote, ImportBackend, RemoteError, RemoteService};
use larder_types::{PurchaseLine, SaleLine, Store, StoreDraft, StoreId};

use crate::config::RemoteConfig;

/// The queue remote and import backend the engine talks to.
pub struct Backends {
    pub remote: Arc<dyn RemoteService>,
    pub import: Arc<dyn ImportBackend>,
}

/// Build backends from configuration.
///
/// Without a base URL every call fails as transient, so queued operations
/// stay pending until the service is restarted with a backend.
pub fn build(config: &RemoteConfig) -> larder_core::Result<Backends> {
    let Some(base_url) = &config.base_url else {
        warn!("No remote.base_url configured; operations will stay queued locally");
        let unconfigured = Arc::new(Unconfigured);
        return Ok(Backends {
            remote: unconfigured.clone(),
            import: unconfigured,
        });
    };

    let mut http = HttpRemote::new(base_url, config.request_timeout())?;
    if let Some(key) = &config.api_key {
        http = http.with_api_key(key);
    }
    info!("Syncing against {}", http.base_url());

    let http = Arc::new(http);
    Ok(Backends {
        remote: http.clone(),
        import: http,
    })
}

/// Backend used when no remote is configured.
#[derive(Debug, Default)]
pub struct Unconfigured;

fn unavailable() -> RemoteError {
    RemoteError::transient("no remote backend configured")
}

#[async_trait]
impl RemoteService for Unconfigured {
    async fn create(&self, _collection: &str, _payload: &Value) -> Result<(), RemoteError> {
        Err(unavailable())
    }

    async fn update(&self, _collection: &str, _payload: &Value) -> Result<(), RemoteError> {
        Err(unavailable())
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<(), RemoteError> {
        Err(unavailable())
    }
}

#[async_trait]
impl ImportBackend for Unconfigured {
    async fn create_store(&self, _draft: &StoreDraft, _slug: &str) -> Result<Store, RemoteError> {
        Err(unavailable())
    }

    async fn delete_store(&self, _id: &StoreId) -> Result<(), RemoteError> {
        Err(unavailable())
    }

    async fn insert_purchase_lines(&self, _lines: &[PurchaseLine]) -> Result<Vec<String>, RemoteError> {
        Err(unavailable())
    }

    async fn delete_purchase_lines(&self, _ids: &[String]) -> Result<(), RemoteError> {
        Err(unavailable())
    }

    async fn insert_sale_lines(&self, _lines: &[SaleLine]) -> Result<Vec<String>, RemoteError> {
        Err(unavailable())
    }

    async fn delete_sale_lines(&self, _ids: &[String]) -> Result<(), RemoteError> {
        Err(unavailable())
    }

    async fn recompute_daily_costs(
        &self,
        _store_id: &StoreId,
        _start: Date,
        _end: Date,
    ) -> Result<(), RemoteError> {
        Err(unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unconfigured_is_transient() {
        let backends = build(&RemoteConfig::default()).unwrap();
        let err = backends.remote.create("products", &json!({})).await.unwrap_err();
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_http_backend() {
        let config = RemoteConfig {
            base_url: Some("https://db.example.com/".to_string()),
            api_key: Some("key".to_string()),
            request_timeout_secs: 5,
        };
        assert!(build(&config).is_ok());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = RemoteConfig {
            base_url: Some("ftp://db.example.com".to_string()),
            ..RemoteConfig::default()
        };
        assert!(build(&config).is_err());
    }
}
