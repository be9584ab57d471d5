//! Request context
//!
//! Carries the caller's display name, a trace id and an optional deadline into
//! every operation. The deadline bounds remote issuer calls; a call cut short
//! after its intent record was written leaves that record for replay.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{BackendError, Phase, Result};

/// Request context for backend operations
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use faunakeys_engine::RequestContext;
///
/// let ctx = RequestContext::new("token-deployer")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(ctx.display_name, "token-deployer");
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Display name of the caller, embedded in key names for diagnosis
    pub display_name: String,

    /// Trace ID for distributed tracing
    pub trace_id: Uuid,

    /// Timestamp of the request
    pub timestamp: DateTime<Utc>,

    /// Point after which remote calls are abandoned
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// Create new context for a caller
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            trace_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            deadline: None,
        }
    }

    /// Context for work initiated by the host itself (rollback sweeps, lease
    /// callbacks)
    pub fn system() -> Self {
        Self::new("system")
    }

    /// Set trace ID for this context (builder pattern)
    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Set an absolute deadline (builder pattern)
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now (builder pattern)
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub(crate) async fn bounded<F, T>(&self, phase: Phase, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline.into(), fut)
                .await
                .map_err(|_| BackendError::DeadlineExceeded { phase }),
            None => Ok(fut.await),
        }
    }
}
