use wikisnap::sync::{SyncProgress, VotePageOutcome};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::Starting { mode, base_url } => {
                tracing::info!(mode = %mode, base_url = %base_url, "Sync starting");
            }

            SyncProgress::FetchingPages { resumed_with } => {
                tracing::info!(resumed_with, "Fetching page listing");
            }

            SyncProgress::FetchedPages {
                count,
                total_so_far,
            } => {
                tracing::debug!(count, total_so_far, "Fetched pages");
            }

            SyncProgress::PagesComplete { total } => {
                tracing::info!(total, "Page listing complete");
            }

            SyncProgress::PagesRestored { total, source } => {
                tracing::info!(total, source, "Page list restored");
            }

            SyncProgress::FetchingVotes {
                pages,
                already_completed,
            } => {
                tracing::info!(pages, already_completed, "Fetching votes");
            }

            SyncProgress::VotePageDone {
                url,
                outcome,
                processed,
                total,
            } => match outcome {
                VotePageOutcome::Failed { error } => {
                    tracing::warn!(url = %url, processed, total, error = %error, "Vote fetch failed");
                }
                VotePageOutcome::Fetched {
                    new_votes,
                    incremental,
                } => {
                    tracing::debug!(url = %url, processed, total, new_votes, incremental, "Votes fetched");
                }
                other => {
                    tracing::trace!(url = %url, processed, total, outcome = ?other, "Vote page done");
                }
            },

            SyncProgress::VotesComplete {
                votes,
                failed_pages,
            } => {
                tracing::info!(votes, failed_pages, "Vote phase complete");
            }

            SyncProgress::RetryBackoff {
                context,
                subject,
                retry_after_ms,
                attempt,
                rate_limited,
            } => {
                if rate_limited {
                    tracing::warn!(
                        context = %context,
                        subject = %subject,
                        retry_after_ms,
                        attempt,
                        "Rate limited, backing off"
                    );
                } else {
                    tracing::info!(
                        context = %context,
                        subject = %subject,
                        retry_after_ms,
                        attempt,
                        "Request failed, retrying"
                    );
                }
            }

            SyncProgress::CheckpointSaved { stream, path } => {
                tracing::debug!(stream = %stream, path = %path.display(), "Checkpoint saved");
            }

            SyncProgress::SnapshotWritten { path } => {
                tracing::info!(path = %path.display(), "Snapshot written");
            }

            SyncProgress::Interrupted => {
                tracing::warn!("Interrupted, saving checkpoints");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
