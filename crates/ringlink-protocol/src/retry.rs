//! # Connection Attempt Coordinator
//!
//! Bounded-retry connection establishment shared by every client role.
//! Attempts are strictly sequential: one attempt fully fails (and its
//! partial state is torn down) before the next begins. The inter-attempt
//! delay is a plain sleep, not a backoff curve.
//!
//! Cancellation is the usual async story — dropping the returned future
//! abandons the in-flight attempt without retrying.

use std::time::Duration;

use tracing::{info, warn};

// ─── Policy ─────────────────────────────────────────────────────────────────

/// Retry parameters for connection establishment.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt connect timeout, passed to the connector.
    pub timeout: Duration,
    /// Maximum attempts; values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Fixed sleep between failed attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            timeout: Duration::from_secs(20),
            max_attempts: 1,
            retry_delay: Duration::from_secs(2),
        }
    }
}

// ─── Connector ──────────────────────────────────────────────────────────────

/// One connectable target. The coordinator drives it; the implementation
/// owns addressing, adapter selection, and partial-state teardown.
pub trait Connector {
    type Handle;

    /// Make a single connection attempt.
    fn attempt(
        &mut self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = anyhow::Result<Self::Handle>>;

    /// Tear down whatever a failed attempt left half-open. Best effort.
    fn abort(&mut self) -> impl std::future::Future<Output = ()>;
}

/// A successfully established connection plus the attempt index that won,
/// surfaced into run metadata for correlation with throughput anomalies.
#[derive(Debug)]
pub struct Connected<H> {
    pub handle: H,
    pub attempts_used: u32,
}

/// Terminal failure after exhausting the retry budget.
#[derive(Debug, thiserror::Error)]
#[error("connection failed after {attempts} attempts: {source}")]
pub struct ConnectError {
    pub attempts: u32,
    #[source]
    pub source: anyhow::Error,
}

// ─── Coordinator ────────────────────────────────────────────────────────────

/// Attempt to connect up to `policy.max_attempts` times.
pub async fn connect_with_retries<C: Connector>(
    connector: &mut C,
    policy: &RetryPolicy,
) -> Result<Connected<C::Handle>, ConnectError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match connector.attempt(policy.timeout).await {
            Ok(handle) => {
                info!(attempt, attempts, "link connected");
                return Ok(Connected {
                    handle,
                    attempts_used: attempt,
                });
            }
            Err(err) => {
                connector.abort().await;
                warn!(attempt, attempts, error = %err, "connection attempt failed");
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }
    }

    Err(ConnectError {
        attempts,
        source: last_err.unwrap_or_else(|| anyhow::anyhow!("retries exhausted")),
    })
}
