//! Retry with exponential backoff for agent calls.
//!
//! Retries only transient errors (`Timeout`, `Unreachable`). Business
//! rejections and protocol errors are returned immediately. Callers
//! retrying a *mutating* command must confirm via a status query between
//! attempts — this helper only schedules the attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AgentError;

/// Retry schedule: total attempt cap and the base backoff delay, which
/// doubles per attempt (200ms → 400ms → 800ms with the defaults).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the attempt with the given zero-based index.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms * 2u64.pow(attempt.saturating_sub(1)))
    }
}

/// Run `f` up to `policy.max_attempts` times, sleeping with exponential
/// backoff between attempts. The closure receives the zero-based attempt
/// index. Only transient errors trigger another attempt.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, f: F) -> Result<T, AgentError>
where
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, AgentError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_before(attempt)).await;
        }
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %e,
                    "transient agent failure, will retry"
                );
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    // Unreachable unless every attempt was transient; surface the last.
    Err(last.unwrap_or(AgentError::Unreachable {
        reason: "no attempts were made".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_backoff(&fast_policy(), |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AgentError>(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_until_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_backoff(&fast_policy(), |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AgentError::Unreachable {
                    reason: "down".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(AgentError::Unreachable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_backoff(&fast_policy(), |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AgentError::Protocol {
                    reason: "bad reply".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(AgentError::Protocol { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_mid_schedule() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_backoff(&fast_policy(), |attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(AgentError::Timeout { elapsed_ms: 1 })
                } else {
                    Ok("authorized")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("authorized"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_double() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_before(1), Duration::from_millis(200));
        assert_eq!(p.delay_before(2), Duration::from_millis(400));
        assert_eq!(p.delay_before(3), Duration::from_millis(800));
    }
}
