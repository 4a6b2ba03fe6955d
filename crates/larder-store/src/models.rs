//! Aggregate views over stored data.

use serde_json::Value;

/// Number of operations in each lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub pending: u64,
    pub synced: u64,
    pub failed: u64,
}

impl OperationCounts {
    /// Total number of operations ever enqueued and not yet purged.
    pub fn total(&self) -> u64 {
        self.pending + self.synced + self.failed
    }
}

/// Row shape of the `cached_data` table before JSON decoding.
pub(crate) struct CachedRow {
    pub key: String,
    pub collection: String,
    pub data: String,
    pub cached_at: i64,
}

impl CachedRow {
    pub(crate) fn decode(self) -> crate::Result<larder_types::CachedEntry> {
        let data: Value = serde_json::from_str(&self.data)?;
        Ok(larder_types::CachedEntry {
            key: self.key,
            data,
            collection: self.collection,
            cached_at: crate::store::from_millis(self.cached_at)?,
        })
    }
}
