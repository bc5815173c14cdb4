//! Bounded exponential backoff for stage work that calls an external
//! collaborator (LLM, graph store, chunk index). Generalizes the
//! doubling-with-cap shape already used by [`crate::embedding::embed_openai`]
//! and [`crate::llm::OpenAiLlmClient::complete`] into a single helper shared
//! by the orchestrator's stage runner.

use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Runs `attempt` up to `max_retries + 1` times, sleeping `1s, 2s, 4s, ...`
/// (capped at 32s) between attempts. Only retries when `should_retry`
/// returns `true` for the error; otherwise returns immediately. Exceeding
/// `max_retries` returns the last error observed.
pub async fn with_backoff<T, F, Fut>(
    max_retries: u32,
    should_retry: impl Fn(&CoreError) -> bool,
    mut attempt: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    let mut last_err = None;
    for n in 0..=max_retries {
        if n > 0 {
            let delay = Duration::from_secs(1 << (n - 1).min(5));
            tokio::time::sleep(delay).await;
        }
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| CoreError::internal("retry loop exited without an attempt")))
}

/// Default retry predicate for stage work: transient upstream failures are
/// retried, everything else (validation, not-found, security, internal bugs)
/// is not.
pub fn is_transient(err: &CoreError) -> bool {
    matches!(err.kind(), crate::error::ErrorKind::UpstreamUnavailable | crate::error::ErrorKind::ConflictingWrite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<i32> = with_backoff(3, is_transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<i32> = with_backoff(3, is_transient, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::UpstreamUnavailable("transient".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<i32> = with_backoff(3, is_transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::ValidationRejected("bad".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_cap() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<i32> = with_backoff(2, is_transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::UpstreamUnavailable("down".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
