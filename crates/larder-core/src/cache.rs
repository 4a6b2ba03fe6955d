//! Freshness rules for offline reads.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

use larder_store::Store;
use larder_types::CachedEntry;

use crate::error::Result;

/// A cached snapshot together with its freshness at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRead {
    pub entry: CachedEntry,
    /// `true` if the snapshot is younger than the freshness window.
    pub fresh: bool,
}

impl CachedRead {
    /// Classify `entry` at `now`.
    ///
    /// Returns `None` once the entry is older than `retention`.
    pub fn evaluate(
        entry: CachedEntry,
        now: OffsetDateTime,
        freshness_window: Duration,
        retention: Duration,
    ) -> Option<Self> {
        if entry.age(now) >= to_time(retention) {
            return None;
        }
        let fresh = entry.is_fresh(now, to_time(freshness_window));
        Some(Self { entry, fresh })
    }
}

fn to_time(d: Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}

/// Delete cached snapshots and synced operations older than `retention`.
pub(crate) async fn purge_expired(log: &Mutex<Store>, retention: Duration) -> Result<()> {
    let cutoff = OffsetDateTime::now_utc().saturating_sub(to_time(retention));
    let log = log.lock().await;
    let cache_entries = log.purge_cache(cutoff)?;
    let operations = log.purge_synced(cutoff)?;
    if cache_entries > 0 || operations > 0 {
        debug!(
            "Purged {} cached snapshot(s) and {} synced operation(s) older than {}",
            cache_entries, operations, cutoff
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(age: time::Duration, now: OffsetDateTime) -> CachedEntry {
        CachedEntry {
            key: "products:all".to_string(),
            data: json!([{"id": 1}]),
            collection: "products".to_string(),
            cached_at: now - age,
        }
    }

    #[test]
    fn test_fresh_entry() {
        let now = OffsetDateTime::now_utc();
        let read = CachedRead::evaluate(
            entry(time::Duration::seconds(10), now),
            now,
            Duration::from_secs(300),
            Duration::from_secs(3600),
        )
        .unwrap();
        assert!(read.fresh);
    }

    #[test]
    fn test_stale_entry_is_still_served() {
        let now = OffsetDateTime::now_utc();
        let read = CachedRead::evaluate(
            entry(time::Duration::minutes(30), now),
            now,
            Duration::from_secs(300),
            Duration::from_secs(3600),
        )
        .unwrap();
        assert!(!read.fresh);
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let now = OffsetDateTime::now_utc();
        let read = CachedRead::evaluate(
            entry(time::Duration::hours(2), now),
            now,
            Duration::from_secs(300),
            Duration::from_secs(3600),
        );
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Store::open_in_memory().unwrap();
        store.put_cached("k", "products", &json!(1)).unwrap();
        let log = Mutex::new(store);

        purge_expired(&log, Duration::from_secs(3600)).await.unwrap();
        assert!(log.lock().await.get_cached("k").unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;
        purge_expired(&log, Duration::ZERO).await.unwrap();
        assert!(log.lock().await.get_cached("k").unwrap().is_none());
    }
}
