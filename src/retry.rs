//! Retry/backoff as a structured policy object rather than decorators
//! (spec.md 9 Design Notes). No backoff crate appears anywhere in the
//! retrieval pack, so this is hand-rolled in the teacher's own idiom —
//! `services/twitter.rs::wait_for_processing` sleeps in a manual loop the
//! same way.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub const fn inference_default() -> Self {
        BackoffPolicy {
            max_attempts: 3,
            initial: Duration::from_secs(2),
            cap: Duration::from_secs(30),
        }
    }

    /// `YOUTUBE_API_KEY` quota/5xx retries (spec.md 4.6: "total 3, backoff 0.5").
    pub const fn youtube_default() -> Self {
        BackoffPolicy {
            max_attempts: 3,
            initial: Duration::from_millis(500),
            cap: Duration::from_secs(2),
        }
    }

    /// Delay before attempt number `attempt` (1-indexed), full jitter over
    /// `[0, min(cap, initial * 2^(attempt-1))]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.initial.as_millis().saturating_mul(1u128 << attempt.saturating_sub(1).min(20));
        let capped = exp.min(self.cap.as_millis());
        let jittered = rand::rng().random_range(0..=capped.max(1));
        Duration::from_millis(jittered as u64)
    }
}

/// Runs `f` up to `policy.max_attempts` times, sleeping with jittered
/// backoff between attempts. `is_retryable` decides whether a given error
/// should trigger another attempt at all (4xx-style errors should not).
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: BackoffPolicy,
    mut f: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_cap() {
        let policy = BackoffPolicy::inference_default();
        for attempt in 1..10 {
            assert!(policy.delay_for_attempt(attempt) <= policy.cap);
        }
    }
}
