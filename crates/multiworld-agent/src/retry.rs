use std::{future::Future, time::Duration};

/// Bounded retry: at most `attempts` tries, `interval` apart, optionally capped
/// by a wall-clock `timeout`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

/// Run `op` until it succeeds or the policy is exhausted, returning the last
/// error. `op` receives the 1-based attempt number.
///
/// The timeout is checked between attempts, so a slow attempt is never cut
/// short; it only prevents the next one from starting.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = policy.timeout.map(|t| tokio::time::Instant::now() + t);
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if attempt >= attempts {
            return Err(err);
        }
        if let Some(deadline) = deadline {
            let now = tokio::time::Instant::now();
            if now >= deadline || now + policy.interval > deadline {
                return Err(err);
            }
        }

        if !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
        attempt += 1;
    }
}
