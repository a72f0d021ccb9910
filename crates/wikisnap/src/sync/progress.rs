//! Progress reporting types for sync runs.
//!
//! The engine emits these events through an optional callback; the CLI turns
//! them into progress bars or log lines.

use std::path::PathBuf;

use crate::checkpoint::CheckpointStream;
use crate::retry::ErrorContext;

use super::types::SyncMode;

/// How a page's vote history was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VotePageOutcome {
    /// Votes were fetched; `incremental` when only new votes were requested.
    Fetched { new_votes: usize, incremental: bool },
    /// Nothing changed upstream; prior votes were carried forward.
    Unchanged,
    /// The page has no votes.
    Empty,
    /// Already completed in the restored checkpoint.
    Restored,
    /// Fetch abandoned; the page is recorded as incomplete.
    Failed { error: String },
}

/// Progress events emitted during a sync run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A run is starting.
    Starting { mode: SyncMode, base_url: String },

    /// Starting (or continuing) the page listing.
    FetchingPages {
        /// Pages already known from a restored checkpoint.
        resumed_with: usize,
    },

    /// Received one batch of the page listing.
    FetchedPages {
        count: usize,
        total_so_far: usize,
    },

    /// Page listing finished.
    PagesComplete { total: usize },

    /// Page list taken from a checkpoint or snapshot instead of the network.
    PagesRestored { total: usize, source: &'static str },

    /// Starting the vote phase.
    FetchingVotes {
        /// Pages in the vote phase.
        pages: usize,
        /// Of those, already completed according to the checkpoint.
        already_completed: usize,
    },

    /// One page's votes were handled.
    VotePageDone {
        url: String,
        outcome: VotePageOutcome,
        processed: usize,
        total: usize,
    },

    /// Vote phase finished.
    VotesComplete { votes: usize, failed_pages: usize },

    /// A request failed and will be retried after a wait.
    RetryBackoff {
        context: ErrorContext,
        subject: String,
        retry_after_ms: u64,
        attempt: u32,
        rate_limited: bool,
    },

    /// A checkpoint artifact was written.
    CheckpointSaved { stream: CheckpointStream, path: PathBuf },

    /// The final snapshot was written.
    SnapshotWritten { path: PathBuf },

    /// Shutdown requested; stopping at the next boundary.
    Interrupted,

    /// Warning message (non-fatal).
    Warning { message: String },
}

/// Callback for progress updates during a sync run.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
