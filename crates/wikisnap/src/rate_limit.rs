//! Rolling point-budget rate limiter.
//!
//! Upstream charges every query a number of points and enforces a budget over
//! a rolling window. The remote limiter state is not observable in advance,
//! so this limiter only tracks what this process has spent and slows down as
//! the window fills. It never blocks indefinitely; occasional upstream
//! rejections are handled by the error policy.
//!
//! The limiter is owned by the single crawl worker. If fetches are ever
//! parallelized it must move behind a mutex so spends are recorded serially.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Usage ratio above which the large delay applies.
pub const HIGH_USAGE: f64 = 0.9;

/// Usage ratio from which the moderate delay applies.
pub const MODERATE_USAGE: f64 = 0.7;

/// Usage ratio below which the budget is considered plentiful.
pub const LOW_USAGE: f64 = 0.5;

/// Default budget: 300,000 points per five minutes.
pub const DEFAULT_POINT_BUDGET: u64 = 300_000;

/// Default rolling window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// Default target throughput.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;

/// Configuration for [`PointBudgetLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Target request rate; determines the baseline delay.
    pub requests_per_second: f64,
    /// Points allowed within one window.
    pub point_budget: u64,
    /// Length of the rolling window.
    pub window: Duration,
    /// Delay while most of the budget remains.
    pub minimal_delay: Duration,
    /// Delay once usage reaches [`MODERATE_USAGE`].
    pub moderate_delay: Duration,
    /// Delay once usage exceeds [`HIGH_USAGE`].
    pub large_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            point_budget: DEFAULT_POINT_BUDGET,
            window: DEFAULT_WINDOW,
            minimal_delay: Duration::from_millis(100),
            moderate_delay: Duration::from_secs(2),
            large_delay: Duration::from_secs(10),
        }
    }
}

impl RateLimitConfig {
    /// Delay between requests at the target rate.
    #[must_use]
    pub fn baseline_delay(&self) -> Duration {
        if self.requests_per_second.is_finite() && self.requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.requests_per_second)
        } else {
            Duration::ZERO
        }
    }

    /// Map a usage ratio to a delay.
    ///
    /// Tier delays are clamped so the result never decreases as the ratio
    /// grows: `minimal <= baseline <= moderate <= large`.
    #[must_use]
    pub fn delay_for_ratio(&self, usage_ratio: f64) -> Duration {
        let baseline = self.baseline_delay();
        let minimal = self.minimal_delay.min(baseline);
        let moderate = self.moderate_delay.max(baseline);
        let large = self.large_delay.max(moderate);

        if usage_ratio > HIGH_USAGE {
            large
        } else if usage_ratio >= MODERATE_USAGE {
            moderate
        } else if usage_ratio < LOW_USAGE {
            minimal
        } else {
            baseline
        }
    }
}

/// Tracks points spent within the rolling window.
#[derive(Debug)]
pub struct PointBudgetLimiter {
    config: RateLimitConfig,
    window: VecDeque<(Instant, u64)>,
}

impl PointBudgetLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Record a spend of `cost` points and return how long to wait first.
    pub fn reserve(&mut self, cost: u64) -> Duration {
        self.reserve_at(Instant::now(), cost)
    }

    /// [`reserve`](Self::reserve) with an explicit clock reading.
    pub fn reserve_at(&mut self, now: Instant, cost: u64) -> Duration {
        let ratio = self.usage_ratio_at(now);
        let delay = self.config.delay_for_ratio(ratio);
        self.window.push_back((now, cost));

        if ratio > HIGH_USAGE {
            tracing::debug!(
                usage_ratio = ratio,
                delay_ms = delay.as_millis() as u64,
                "Point budget nearly exhausted"
            );
        }

        delay
    }

    /// Reserve and sleep for the computed delay.
    pub async fn acquire(&mut self, cost: u64) -> Duration {
        let delay = self.reserve(cost);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }

    /// Fraction of the budget spent within the window ending at `now`.
    pub fn usage_ratio_at(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let budget = self.config.point_budget.max(1);
        self.used_points() as f64 / budget as f64
    }

    /// Points currently recorded in the window (as of the last prune).
    pub fn used_points(&self) -> u64 {
        self.window.iter().map(|(_, cost)| cost).sum()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.window.front() {
            if now.duration_since(at) >= self.config.window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}
