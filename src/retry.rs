//! Timeout-bounded calls into blocking collaborators.
//!
//! The embedding service and the search engine are both driven through
//! synchronous traits. [`call_blocking`] runs one call on the blocking pool,
//! bounds it with the configured timeout and retries exactly once, after a
//! fixed backoff, when the failure is transient.
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::ExternalCallConfig;
use crate::embedder::EmbedderError;
use crate::store::StoreError;

/// Error types that can come out of a bounded external call.
pub trait ExternalError: std::error::Error + Send + 'static {
    fn is_transient(&self) -> bool;

    /// The error reported when the call exceeds its timeout.
    fn timed_out(after: Duration) -> Self;

    /// The error reported when the worker thread dies mid-call.
    fn interrupted(message: String) -> Self;
}

impl ExternalError for EmbedderError {
    fn is_transient(&self) -> bool {
        EmbedderError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        EmbedderError::Timeout(after)
    }

    fn interrupted(message: String) -> Self {
        EmbedderError::Unavailable(message)
    }
}

impl ExternalError for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        StoreError::Timeout(after)
    }

    fn interrupted(message: String) -> Self {
        StoreError::Unavailable(message)
    }
}

/// Run `f` on the blocking pool with a timeout and at most one retry.
///
/// A call that times out keeps running on its thread; its result is
/// discarded.
pub async fn call_blocking<T, E, F>(external: &ExternalCallConfig, label: &str, f: F) -> Result<T, E>
where
    T: Send + 'static,
    E: ExternalError,
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let timeout = external.timeout();
    let mut retried = false;

    loop {
        let call = Arc::clone(&f);
        let outcome = match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || call())).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(E::interrupted(join.to_string())),
            Err(_) => Err(E::timed_out(timeout)),
        };

        match outcome {
            Err(e) if !retried && e.is_transient() => {
                let backoff = external.backoff();
                warn!("{label} failed ({e}), retrying once in {}ms", backoff.as_millis());
                tokio::time::sleep(backoff).await;
                retried = true;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> ExternalCallConfig {
        ExternalCallConfig {
            timeout_ms: 100,
            retry_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_success_needs_one_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = call_blocking(&fast(), "embed", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, EmbedderError>(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = call_blocking(&fast(), "embed", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EmbedderError::RateLimited)
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_second_transient_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), StoreError> = call_blocking(&fast(), "search", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), StoreError> = call_blocking(&fast(), "search", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Rejected("bad query".into()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let external = ExternalCallConfig {
            timeout_ms: 20,
            retry_backoff_ms: 1,
        };
        let result: Result<(), EmbedderError> = call_blocking(&external, "embed", || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(EmbedderError::Timeout(_))));
    }
}
