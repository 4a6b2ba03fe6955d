//! Compensating-transaction log.
//!
//! A [`Saga`] records one undo action per completed step of a multi-step
//! remote write. If a later step fails, [`Saga::compensate`] runs the undo
//! actions newest first. Each action is retried with the saga's
//! [`RetryPolicy`]; one that still fails is logged for manual cleanup and
//! the rest keep running.

use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, error, info};

use crate::error::{CompensationFailure, Result};
use crate::retry::{RetryPolicy, with_retry};

type CompensationFn = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Compensation {
    label: String,
    action: CompensationFn,
}

/// Ordered list of compensating actions for completed steps.
///
/// # Example
///
/// ```
/// use larder_core::{Saga, RetryPolicy};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut saga = Saga::new("example").with_retry(RetryPolicy::none());
/// saga.register("undo step 1", || async { Ok(()) });
/// saga.register("undo step 2", || async { Ok(()) });
///
/// // Step 3 failed: undo step 2, then step 1.
/// let failures = saga.compensate().await;
/// assert!(failures.is_empty());
/// # }
/// ```
pub struct Saga {
    name: String,
    steps: Vec<Compensation>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Saga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Saga")
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.label.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Saga {
    /// Create an empty saga.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            retry: RetryPolicy::for_compensation(),
        }
    }

    /// Use `policy` when retrying compensating actions.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Record the undo action for a step that just completed.
    pub fn register<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        debug!("{}: registered compensation '{}'", self.name, label);
        self.steps.push(Compensation {
            label,
            action: Box::new(move || Box::pin(action())),
        });
    }

    /// Number of registered compensations.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no compensation is registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Labels of registered compensations, oldest first.
    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label.as_str()).collect()
    }

    /// Finish successfully, discarding every compensation.
    pub fn commit(self) {
        debug!("{}: committed {} step(s)", self.name, self.steps.len());
    }

    /// Undo every completed step, newest first.
    ///
    /// Returns the compensations that could not be applied.
    pub async fn compensate(self) -> Vec<CompensationFailure> {
        let Saga { name, steps, retry } = self;
        if steps.is_empty() {
            return Vec::new();
        }

        info!("{}: rolling back {} step(s)", name, steps.len());
        let mut failures = Vec::new();

        for step in steps.into_iter().rev() {
            let action = &step.action;
            match with_retry(&retry, &step.label, || action()).await {
                Ok(()) => debug!("{}: compensation '{}' applied", name, step.label),
                Err(e) => {
                    error!(
                        "{}: compensation '{}' failed, manual cleanup required: {}",
                        name, step.label, e
                    );
                    failures.push(CompensationFailure {
                        label: step.label,
                        message: e.to_string(),
                    });
                }
            }
        }

        failures
    }
}
