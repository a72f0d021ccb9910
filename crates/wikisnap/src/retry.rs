//! Retry configuration and the per-context error policy.
//!
//! Rate-limit rejections and other failures are budgeted separately: the
//! first wait out a fixed (or server-suggested) delay, the second back off
//! exponentially. Each fetch context keeps its own counters so a burst of
//! vote failures does not exhaust the page-listing budget.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::time::Instant;

use crate::api::{ApiError, short_error_message};

/// Initial delay for non rate-limit retries.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Cap on the delay for non rate-limit retries.
pub const MAX_BACKOFF_MS: u64 = 10_000;

/// Default number of tolerated non rate-limit failures per context.
pub const MAX_OTHER_RETRIES: u32 = 3;

/// Default number of tolerated rate-limit hits within the amnesty window.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Default wait after a rate-limit rejection.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Rate-limit hits older than this are forgiven after a success.
pub const AMNESTY_WINDOW: Duration = Duration::from_secs(300);

/// Configuration for exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_OTHER_RETRIES as usize,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Which kind of request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorContext {
    Pages,
    Votes,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pages => f.write_str("pages"),
            Self::Votes => f.write_str("votes"),
        }
    }
}

/// Budgets for [`ErrorPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPolicyConfig {
    pub max_rate_limit_retries: u32,
    pub max_other_retries: u32,
    pub rate_limit_backoff: Duration,
    pub other_backoff: RetryConfig,
    pub amnesty_window: Duration,
}

impl Default for ErrorPolicyConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
            max_other_retries: MAX_OTHER_RETRIES,
            rate_limit_backoff: RATE_LIMIT_BACKOFF,
            other_backoff: RetryConfig::default(),
            amnesty_window: AMNESTY_WINDOW,
        }
    }
}

/// What to do after a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait this long, then retry the same request.
    Retry(Duration),
    /// Give up on this request.
    Fatal,
}

struct ContextState {
    rate_limit_hits: VecDeque<Instant>,
    other_errors: u32,
    other_backoff: ExponentialBackoff,
}

/// Classifies failures and decides between retrying and giving up.
pub struct ErrorPolicy {
    config: ErrorPolicyConfig,
    contexts: HashMap<ErrorContext, ContextState>,
}

impl ErrorPolicy {
    pub fn new(config: ErrorPolicyConfig) -> Self {
        Self {
            config,
            contexts: HashMap::new(),
        }
    }

    /// Record a failure and decide whether to retry.
    pub fn on_error(&mut self, ctx: ErrorContext, err: &ApiError) -> Decision {
        let now = Instant::now();
        let amnesty = self.config.amnesty_window;
        let max_rate_limit = self.config.max_rate_limit_retries as usize;
        let max_other = self.config.max_other_retries;
        let rate_limit_backoff = self.config.rate_limit_backoff;
        let state = self.state(ctx);

        if err.is_rate_limited() {
            prune_hits(&mut state.rate_limit_hits, now, amnesty);
            state.rate_limit_hits.push_back(now);
            let hits = state.rate_limit_hits.len();
            if hits > max_rate_limit {
                tracing::warn!(context = %ctx, hits, "Rate limit retries exhausted");
                return Decision::Fatal;
            }
            let wait = err
                .retry_after()
                .map_or(rate_limit_backoff, |ra| ra.max(rate_limit_backoff));
            tracing::debug!(
                context = %ctx,
                hits,
                wait_secs = wait.as_secs(),
                "Rate limited, backing off"
            );
            return Decision::Retry(wait);
        }

        state.other_errors += 1;
        let attempts = state.other_errors;
        if attempts > max_other {
            tracing::warn!(context = %ctx, attempts, error = %short_error_message(err), "Retries exhausted");
            return Decision::Fatal;
        }
        match state.other_backoff.next() {
            Some(wait) => {
                tracing::debug!(
                    context = %ctx,
                    attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %short_error_message(err),
                    "Request failed, retrying"
                );
                Decision::Retry(wait)
            }
            None => Decision::Fatal,
        }
    }

    /// Record a success: forgive old rate-limit hits and reset the
    /// other-error budget.
    pub fn on_success(&mut self, ctx: ErrorContext) {
        let now = Instant::now();
        let amnesty = self.config.amnesty_window;
        let fresh = self.config.other_backoff.clone().into_backoff().build();
        let state = self.state(ctx);
        prune_hits(&mut state.rate_limit_hits, now, amnesty);
        if state.other_errors > 0 {
            state.other_errors = 0;
            state.other_backoff = fresh;
        }
    }

    /// Forget everything recorded for a context.
    pub fn reset(&mut self, ctx: ErrorContext) {
        self.contexts.remove(&ctx);
    }

    pub fn rate_limit_hits(&self, ctx: ErrorContext) -> usize {
        self.contexts
            .get(&ctx)
            .map_or(0, |s| s.rate_limit_hits.len())
    }

    pub fn other_errors(&self, ctx: ErrorContext) -> u32 {
        self.contexts.get(&ctx).map_or(0, |s| s.other_errors)
    }

    fn state(&mut self, ctx: ErrorContext) -> &mut ContextState {
        let backoff = &self.config.other_backoff;
        self.contexts.entry(ctx).or_insert_with(|| ContextState {
            rate_limit_hits: VecDeque::new(),
            other_errors: 0,
            other_backoff: backoff.clone().into_backoff().build(),
        })
    }
}

fn prune_hits(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&at) = hits.front() {
        if now.duration_since(at) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}
