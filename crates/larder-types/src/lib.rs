//! Shared domain types for the Larder offline sync engine.
//!
//! This crate holds the types exchanged between the durable operation log
//! (`larder-store`), the sync engine (`larder-core`) and the HTTP service
//! (`larder-service`).
//!
//! # Features
//!
//! - Queued mutations and their lifecycle status
//! - Derived sync status snapshots
//! - Offline read cache entries
//! - Import batches and the entities they persist
//!
//! # Example
//!
//! ```
//! use larder_types::{OperationKind, StoreDraft};
//!
//! assert_eq!(OperationKind::Create.as_str(), "create");
//! assert_eq!(StoreDraft::new("Café Rouge #2").slug(), "cafe-rouge-2");
//! ```

pub mod error;
pub mod import;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use import::{
    ImportBatch, ImportResult, ImportSummary, InvoiceLine, InvoiceRecord, Period, PurchaseLine,
    SaleLine, SaleRecord, Store, StoreDraft, StoreId, slugify,
};
pub use types::{
    CachedEntry, OperationId, OperationKind, OperationStatus, QueuedOperation, SyncStatus,
};
