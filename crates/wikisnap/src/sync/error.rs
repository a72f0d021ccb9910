//! Errors that abort a sync run.

use thiserror::Error;

use crate::api::ApiError;
use crate::checkpoint::CheckpointError;
use crate::history::HistoryError;
use crate::retry::ErrorContext;
use crate::snapshot::SnapshotError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Retries exhausted in a phase that cannot continue without the request.
    #[error("{context} phase aborted: {source}")]
    Fatal {
        context: ErrorContext,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    History(#[from] HistoryError),

    /// `votes` mode found no page list to work from.
    #[error("no page list available; run a full sync first")]
    NoPageList,
}

impl SyncError {
    /// Whether the failure came from upstream rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Fatal { source, .. } if source.is_rate_limited())
    }
}
