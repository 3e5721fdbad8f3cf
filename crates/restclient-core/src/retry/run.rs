//! Retry loop: run an async closure until success or the policy says stop.

use std::future::Future;

use super::classify::classify;
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `f` until it succeeds or the retry policy says to stop. `f` receives
/// the 1-based attempt number. On retryable failure, sleeps for the backoff
/// duration then tries again.
pub async fn run_with_retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> anyhow::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match f(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        tracing::warn!(attempt, %kind, delay_ms = d.as_millis() as u64, "retrying: {e:#}");
                        tokio::time::sleep(d).await;
                        attempt += 1;
                    }
                }
            }
        }
    }
}
