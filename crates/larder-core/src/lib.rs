//! Offline-durable sync engine for the Larder cost dashboard.
//!
//! Writes made while the dashboard is offline are recorded as
//! [`QueuedOperation`](larder_types::QueuedOperation)s in a local
//! [`larder_store::Store`] and replayed against the remote backend once
//! connectivity returns. Multi-step onboarding imports run as a saga:
//! every completed step registers an undo action, and a failure part-way
//! through rolls the earlier steps back.
//!
//! # Features
//!
//! - **Durable queue**: operations survive restarts and drain in FIFO order
//! - **Connectivity-aware sync**: draining starts on the offline to online edge
//! - **Backoff**: transient failures are rescheduled with exponential backoff
//! - **Dead letters**: permanent failures and exhausted retries stop retrying
//!   until requeued by hand
//! - **Status snapshots**: subscribers see a monotonic stream of [`SyncStatus`](larder_types::SyncStatus)
//! - **Offline reads**: cached snapshots are served with a freshness flag
//! - **Import saga**: stores, purchase lines and sale lines with compensation
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use larder_core::{MockBackend, MockRemote, SyncEngine, SyncOptions};
//! use larder_store::Store;
//! use larder_types::OperationKind;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SyncEngine::new(
//!         Store::open_default()?,
//!         Arc::new(MockRemote::new()),
//!         Arc::new(MockBackend::new()),
//!         SyncOptions::default(),
//!     )?;
//!     engine.start();
//!
//!     engine
//!         .queue_operation(OperationKind::Create, "products", json!({"name": "Flour"}))
//!         .await?;
//!     println!("{:?}", engine.status());
//!
//!     engine.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! The `http-remote` feature adds `http::HttpRemote`, a reqwest-based
//! implementation of both [`RemoteService`] and [`ImportBackend`].

pub mod cache;
pub mod connectivity;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
#[cfg(feature = "http-remote")]
pub mod http;
pub mod import;
pub mod mock;
pub mod options;
pub mod retry;
pub mod saga;
pub mod status;
pub mod traits;

pub use cache::CachedRead;
pub use connectivity::{ConnectivityEvent, ConnectivityEvents, ConnectivityMonitor};
pub use coordinator::{DrainReport, SyncCoordinator};
pub use engine::SyncEngine;
pub use error::{CompensationFailure, Error, RemoteError, RemoteErrorKind, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, SyncEvent};
pub use guard::DrainGuard;
#[cfg(feature = "http-remote")]
pub use http::HttpRemote;
pub use import::ImportWorkflow;
pub use mock::{BackendStep, MockBackend, MockRemote, RecomputeCall, RemoteCall};
pub use options::SyncOptions;
pub use retry::{RetryPolicy, is_retryable, with_retry};
pub use saga::Saga;
pub use status::{StatusBroadcaster, Subscription};
pub use traits::{ImportBackend, RemoteService};

/// Shared handle to a remote service.
pub type SharedRemote = std::sync::Arc<dyn RemoteService>;
