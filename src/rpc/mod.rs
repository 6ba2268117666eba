//! Typed RPC wrappers over the inference and agent services.
//!
//! Both services are opaque HTTP collaborators. Failures are classified as
//! transient (5xx, timeouts, connection errors) or permanent (4xx, schema
//! mismatch); only transient failures are retried, with exponential backoff,
//! and every operation runs under an overall deadline.

pub mod agent;
pub mod science;

pub use agent::{AgentClient, EnrichRequest, EnrichResponse, ReasonMapping, ReasonRequest, ReasonResponse};
pub use science::{
    EmbedItem, EmbedResponse, RerankCandidate, RerankScore, RetrieveHit, ScienceClient,
};

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
}

impl RpcError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transient(_))
    }
}

pub(crate) fn classify_transport(error: reqwest::Error) -> RpcError {
    if error.is_timeout() || error.is_connect() {
        RpcError::Transient(error.to_string())
    } else if error.is_decode() {
        RpcError::Permanent(error.to_string())
    } else {
        RpcError::Transient(error.to_string())
    }
}

pub(crate) fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RpcError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_server_error() {
        Err(RpcError::Transient(format!("HTTP {status}")))
    } else {
        Err(RpcError::Permanent(format!("HTTP {status}")))
    }
}

/// Run `attempt` up to `1 + max_retries` times, sleeping
/// `base_backoff * 2^(n-1)` before the nth retry. Only transient failures
/// are retried.
pub(crate) async fn with_retries<T, Fut>(
    what: &'static str,
    max_retries: u32,
    base_backoff: Duration,
    mut attempt: impl FnMut() -> Fut,
) -> Result<T, RpcError>
where
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(what, attempts, "RPC succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if error.is_transient() && attempts <= max_retries => {
                let backoff = base_backoff * 2u32.pow(attempts - 1);
                warn!(what, attempts, error = %error, backoff_ms = backoff.as_millis() as u64, "RPC failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(error) => {
                warn!(what, attempts, error = %error, "RPC failed");
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RpcError> =
            with_retries("test", 3, Duration::from_millis(1), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RpcError::Transient("boom".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RpcError> =
            with_retries("test", 3, Duration::from_millis(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::Transient("still down".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RpcError> =
            with_retries("test", 3, Duration::from_millis(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::Permanent("bad request".into())) }
            })
            .await;

        assert!(matches!(result, Err(RpcError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
