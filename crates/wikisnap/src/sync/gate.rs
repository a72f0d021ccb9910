//! Every upstream request passes through the gate: it waits for the point
//! budget, makes the call, and applies the error policy on failure.

use std::future::Future;

use crate::api::{ApiError, Result};
use crate::rate_limit::{PointBudgetLimiter, RateLimitConfig};
use crate::retry::{Decision, ErrorContext, ErrorPolicy, ErrorPolicyConfig};

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{IssueKind, IssueTally};

pub struct RequestGate {
    limiter: PointBudgetLimiter,
    policy: ErrorPolicy,
    tally: IssueTally,
}

impl RequestGate {
    pub fn new(rate_limit: RateLimitConfig, error_policy: ErrorPolicyConfig) -> Self {
        Self {
            limiter: PointBudgetLimiter::new(rate_limit),
            policy: ErrorPolicy::new(error_policy),
            tally: IssueTally::default(),
        }
    }

    /// Retried failures seen so far, by kind.
    pub fn tally(&self) -> IssueTally {
        self.tally
    }

    /// Run `op` until it succeeds or the error policy gives up.
    ///
    /// On give-up the context's counters are reset so the next unit of work
    /// starts with a fresh budget, and the last error is returned.
    pub async fn run<T, F, Fut>(
        &mut self,
        ctx: ErrorContext,
        cost: u64,
        subject: &str,
        on_progress: Option<&ProgressCallback>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire(cost).await;
            let err = match op().await {
                Ok(value) => {
                    self.policy.on_success(ctx);
                    return Ok(value);
                }
                Err(err) => err,
            };

            attempt += 1;
            self.record(&err);
            match self.policy.on_error(ctx, &err) {
                Decision::Retry(wait) => {
                    emit(
                        on_progress,
                        SyncProgress::RetryBackoff {
                            context: ctx,
                            subject: subject.to_string(),
                            retry_after_ms: wait.as_millis() as u64,
                            attempt,
                            rate_limited: err.is_rate_limited(),
                        },
                    );
                    tokio::time::sleep(wait).await;
                }
                Decision::Fatal => {
                    self.policy.reset(ctx);
                    return Err(err);
                }
            }
        }
    }

    /// Run `op` once. Failures are tallied but never retried.
    pub async fn try_once<T, Fut>(&mut self, ctx: ErrorContext, cost: u64, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.limiter.acquire(cost).await;
        match fut.await {
            Ok(value) => {
                self.policy.on_success(ctx);
                Ok(value)
            }
            Err(err) => {
                self.record(&err);
                Err(err)
            }
        }
    }

    fn record(&mut self, err: &ApiError) {
        let kind = if err.is_rate_limited() {
            IssueKind::RateLimited
        } else {
            IssueKind::Transient
        };
        self.tally.record(kind);
    }
}

#[cfg(test)]
pub(crate) fn unthrottled() -> RateLimitConfig {
    RateLimitConfig {
        requests_per_second: 0.0,
        point_budget: u64::MAX,
        window: std::time::Duration::from_secs(300),
        minimal_delay: std::time::Duration::ZERO,
        moderate_delay: std::time::Duration::ZERO,
        large_delay: std::time::Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn gate() -> RequestGate {
        RequestGate::new(
            unthrottled(),
            ErrorPolicyConfig {
                max_rate_limit_retries: 2,
                max_other_retries: 2,
                rate_limit_backoff: Duration::from_secs(60),
                other_backoff: RetryConfig::new(Duration::from_secs(1), Duration::from_secs(5), 2)
                    .with_jitter(false),
                amnesty_window: Duration::from_secs(300),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_and_reports_backoff() {
        let mut gate = gate();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |e| sink.lock().unwrap().push(e));

        let started = tokio::time::Instant::now();
        let value = gate
            .run(ErrorContext::Votes, 10, "http://wiki/a", Some(&callback), move || async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(ApiError::RateLimited { retry_after: None }),
                    1 => Err(ApiError::GraphQl("hiccup".to_string())),
                    _ => Ok(7u32),
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(61));
        assert_eq!(gate.tally().rate_limited, 1);
        assert_eq!(gate.tally().transient, 1);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            SyncProgress::RetryBackoff { rate_limited: true, attempt: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget_and_resets_context() {
        let mut gate = gate();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let err = gate
            .run(ErrorContext::Votes, 1, "x", None, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::GraphQl("down".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::GraphQl(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // The next unit of work gets a fresh budget.
        let retried = AtomicU32::new(0);
        let counter = &retried;
        let ok = gate
            .run(ErrorContext::Votes, 1, "y", None, move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::GraphQl("down".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn try_once_does_not_retry() {
        let mut gate = gate();
        let err = gate
            .try_once(ErrorContext::Votes, 2, async {
                Err::<(), _>(ApiError::RateLimited { retry_after: None })
            })
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(gate.tally().rate_limited, 1);
    }
}
