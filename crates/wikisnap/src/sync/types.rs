//! Sync options, outcome types and constants.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;
use crate::retry::ErrorPolicyConfig;

/// Default wiki whose pages are crawled.
pub const DEFAULT_BASE_URL: &str = "http://scp-wiki.wikidot.com/";

/// Default number of pages requested per listing query.
pub const DEFAULT_PAGE_BATCH_SIZE: u32 = 10;

/// Default number of votes requested per vote-history query.
pub const DEFAULT_VOTE_BATCH_SIZE: u32 = 100;

/// Default number of processed pages between checkpoint saves.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 100;

/// Default number of checkpoint files kept per stream.
pub const DEFAULT_CHECKPOINTS_KEPT: usize = crate::checkpoint::DEFAULT_KEEP;

/// Default age after which a page's vote snapshot is no longer trusted.
pub const DEFAULT_VOTE_RETENTION_DAYS: i64 = 30;

/// Which parts of the crawl to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Page listing from scratch, then votes.
    Full,
    /// Continue from the latest checkpoints.
    Resume,
    /// Votes only, over the last known page list.
    #[serde(rename = "votes")]
    VotesOnly,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Resume => "resume",
            Self::VotesOnly => "votes",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// URL prefix selecting the wiki's pages.
    pub base_url: String,
    pub page_batch_size: u32,
    pub vote_batch_size: u32,
    /// Pages processed between checkpoint saves (both streams).
    pub checkpoint_interval: usize,
    /// Checkpoint files kept per stream; older ones are deleted after a save.
    pub checkpoints_kept: usize,
    /// Allow skipping unchanged pages and short-circuiting grown ones.
    pub incremental: bool,
    /// Vote snapshots older than this are treated as absent.
    pub vote_retention: chrono::Duration,
    pub rate_limit: RateLimitConfig,
    pub error_policy: ErrorPolicyConfig,
    /// Root for checkpoints, snapshots and vote history.
    pub data_dir: PathBuf,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_batch_size: DEFAULT_PAGE_BATCH_SIZE,
            vote_batch_size: DEFAULT_VOTE_BATCH_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            checkpoints_kept: DEFAULT_CHECKPOINTS_KEPT,
            incremental: true,
            vote_retention: chrono::Duration::days(DEFAULT_VOTE_RETENTION_DAYS),
            rate_limit: RateLimitConfig::default(),
            error_policy: ErrorPolicyConfig::default(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl SyncOptions {
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }
}

/// Classification of a problem met during the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueKind {
    /// Upstream rejected a request for budget reasons.
    RateLimited,
    /// Any other failed request that was retried.
    Transient,
    /// Data that decoded but looks inconsistent.
    DataAnomaly,
    /// Retries exhausted; the affected unit of work was abandoned.
    Fatal,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate limited",
            Self::Transient => "transient",
            Self::DataAnomaly => "data anomaly",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// A recorded problem, surfaced in the snapshot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlIssue {
    pub kind: IssueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl CrawlIssue {
    pub fn new(kind: IssueKind, url: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.map(str::to_string),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Issue counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTally {
    pub rate_limited: usize,
    pub transient: usize,
    pub data_anomaly: usize,
    pub fatal: usize,
}

impl IssueTally {
    pub fn record(&mut self, kind: IssueKind) {
        match kind {
            IssueKind::RateLimited => self.rate_limited += 1,
            IssueKind::Transient => self.transient += 1,
            IssueKind::DataAnomaly => self.data_anomaly += 1,
            IssueKind::Fatal => self.fatal += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.rate_limited + self.transient + self.data_anomaly + self.fatal
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Completed,
    /// Stopped at a boundary after a shutdown request; checkpoints saved.
    Interrupted,
}

/// End-of-run summary.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub status: SyncStatus,
    pub duration: Duration,
    pub pages_total: usize,
    pub pages_with_votes: usize,
    pub pages_with_content: usize,
    /// Pages whose votes were fetched (fully or incrementally).
    pub vote_pages_fetched: usize,
    /// Pages skipped because nothing changed upstream.
    pub vote_pages_unchanged: usize,
    /// Pages with no votes; the collector was not invoked.
    pub vote_pages_empty: usize,
    /// Pages already completed in a restored checkpoint.
    pub vote_pages_restored: usize,
    pub vote_pages_failed: usize,
    pub votes_collected: usize,
    pub users_derived: usize,
    pub issues: IssueTally,
    pub snapshot_path: Option<PathBuf>,
}

impl SyncReport {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            status: SyncStatus::Completed,
            duration: Duration::ZERO,
            pages_total: 0,
            pages_with_votes: 0,
            pages_with_content: 0,
            vote_pages_fetched: 0,
            vote_pages_unchanged: 0,
            vote_pages_empty: 0,
            vote_pages_restored: 0,
            vote_pages_failed: 0,
            votes_collected: 0,
            users_derived: 0,
            issues: IssueTally::default(),
            snapshot_path: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == SyncStatus::Completed
    }

    /// Percentage of pages that have at least one vote.
    pub fn votes_coverage_pct(&self) -> f64 {
        percentage(self.pages_with_votes, self.pages_total)
    }

    /// Percentage of pages with revisions or attributions.
    pub fn content_coverage_pct(&self) -> f64 {
        percentage(self.pages_with_content, self.pages_total)
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}
