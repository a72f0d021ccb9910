//! Two-phase sync engine: the page listing first, then each page's votes.
//!
//! # Data directory
//!
//! ```text
//! <data_dir>/checkpoints/pages/   page-listing checkpoints
//! <data_dir>/checkpoints/votes/   vote-phase checkpoints
//! <data_dir>/snapshots/           one snapshot file per completed run
//! <data_dir>/history.json         per-page vote snapshots
//! ```
//!
//! # Example
//!
//! ```ignore
//! use wikisnap::sync::{SyncEngine, SyncMode, SyncOptions};
//!
//! let engine = SyncEngine::new(client, SyncOptions::default());
//! let report = engine.run(SyncMode::Full, None).await?;
//! println!("{} votes from {} pages", report.votes_collected, report.pages_total);
//! ```

mod pages;
mod votes;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::api::WikiApi;
use crate::checkpoint::{CheckpointError, CheckpointStore, PageCheckpoint};
use crate::consolidate::consolidate;
use crate::history::VoteHistory;
use crate::model::VoteEvent;
use crate::snapshot::{RunInfo, Snapshot, SnapshotStore};

use super::error::SyncError;
use super::gate::RequestGate;
use super::progress::{ProgressCallback, SyncProgress, VotePageOutcome, emit};
use super::state::{PartialPage, WorkingSet};
use super::types::{CrawlIssue, IssueKind, SyncMode, SyncOptions, SyncReport, SyncStatus};

/// Drives a sync run against a [`WikiApi`].
pub struct SyncEngine<A> {
    api: A,
    options: SyncOptions,
    checkpoints: CheckpointStore,
    snapshots: SnapshotStore,
    shutdown: Arc<AtomicBool>,
}

impl<A: WikiApi> SyncEngine<A> {
    pub fn new(api: A, options: SyncOptions) -> Self {
        let checkpoints =
            CheckpointStore::new(options.checkpoint_dir()).with_retention(options.checkpoints_kept);
        let snapshots = SnapshotStore::new(options.snapshot_dir());
        Self {
            api,
            options,
            checkpoints,
            snapshots,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a shared flag to request a graceful stop.
    #[must_use]
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Run one sync.
    ///
    /// Returns `Ok` with [`SyncStatus::Interrupted`] when shutdown was
    /// requested; checkpoints for both streams are saved in that case. An
    /// `Err` means the page listing could not be completed.
    pub async fn run(
        &self,
        mode: SyncMode,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        emit(
            on_progress,
            SyncProgress::Starting {
                mode,
                base_url: self.options.base_url.clone(),
            },
        );
        tracing::info!(mode = %mode, base_url = %self.options.base_url, "Starting sync");

        let previous = match self.snapshots.load_latest() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable previous snapshot");
                emit(
                    on_progress,
                    SyncProgress::Warning {
                        message: format!("previous snapshot unreadable: {e}"),
                    },
                );
                None
            }
        };
        let history = VoteHistory::load(&self.options.history_path())?;
        let prior_votes = previous
            .as_ref()
            .map(Snapshot::votes_by_page)
            .unwrap_or_default();
        tracing::debug!(
            history_pages = history.len(),
            prior_pages = prior_votes.len(),
            "Loaded previous run state"
        );

        let mut run = Run {
            api: &self.api,
            options: &self.options,
            checkpoints: &self.checkpoints,
            shutdown: &self.shutdown,
            on_progress,
            mode,
            run_started_at: Utc::now(),
            gate: RequestGate::new(
                self.options.rate_limit.clone(),
                self.options.error_policy.clone(),
            ),
            working: WorkingSet::new(),
            history,
            prior_votes,
            report: SyncReport::new(mode),
        };

        let listing = match mode {
            SyncMode::Full => run.crawl_pages(None).await?,
            SyncMode::Resume => match self.latest_page_checkpoint()? {
                Some(cp) => {
                    run.run_started_at = cp.run_started_at;
                    if cp.listing_complete {
                        run.restore_pages(cp.pages, "page checkpoint");
                        Phase::Done
                    } else {
                        run.crawl_pages(Some(cp)).await?
                    }
                }
                None => {
                    tracing::info!("No page checkpoint found, starting the listing from scratch");
                    run.crawl_pages(None).await?
                }
            },
            SyncMode::VotesOnly => {
                if let Some(cp) = self.latest_page_checkpoint()? {
                    run.restore_pages(cp.pages, "page checkpoint");
                } else if let Some(snapshot) = previous.as_ref() {
                    run.restore_pages(snapshot.page_summaries(), "previous snapshot");
                } else {
                    return Err(SyncError::NoPageList);
                }
                Phase::Done
            }
        };
        drop(previous);

        if listing == Phase::Interrupted {
            return Ok(run.interrupted(started));
        }

        if mode == SyncMode::Resume {
            run.restore_vote_progress()?;
        }

        if run.collect_votes().await? == Phase::Interrupted {
            return Ok(run.interrupted(started));
        }

        run.finish(started, &self.snapshots)
    }

    fn latest_page_checkpoint(&self) -> Result<Option<PageCheckpoint>, CheckpointError> {
        let latest = self.checkpoints.load_latest::<PageCheckpoint>()?;
        Ok(latest.filter(|cp| {
            let matches = cp.base_url == self.options.base_url;
            if !matches {
                tracing::info!(
                    checkpoint_base_url = %cp.base_url,
                    "Ignoring page checkpoint for a different base URL"
                );
            }
            matches
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Done,
    Interrupted,
}

enum PageStep {
    Done(VotePageOutcome),
    Interrupted,
}

#[derive(Debug, Clone)]
enum FetchKind {
    /// Fetch the whole history, replacing anything held.
    Full,
    /// Fetch only votes newer than the recorded ones.
    Incremental,
    /// Continue an earlier partial fetch.
    Resume(PartialPage),
}

/// State of one run. Owned by the single worker.
struct Run<'e, A: ?Sized> {
    api: &'e A,
    options: &'e SyncOptions,
    checkpoints: &'e CheckpointStore,
    shutdown: &'e AtomicBool,
    on_progress: Option<&'e ProgressCallback>,
    mode: SyncMode,
    run_started_at: DateTime<Utc>,
    gate: RequestGate,
    working: WorkingSet,
    history: VoteHistory,
    /// Votes from the previous snapshot, newest first per page.
    prior_votes: HashMap<String, Vec<VoteEvent>>,
    report: SyncReport,
}

impl<'e, A: WikiApi + ?Sized> Run<'e, A> {
    fn stop_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn record_issue(&mut self, kind: IssueKind, url: Option<&str>, message: String) {
        self.working.issues.push(CrawlIssue::new(kind, url, message));
    }

    fn fill_report(&mut self, started: Instant, status: SyncStatus) {
        let pages = self.working.pages();
        self.report.status = status;
        self.report.duration = started.elapsed();
        self.report.pages_total = pages.len();
        self.report.pages_with_votes = pages.iter().filter(|p| p.needs_vote_data()).count();
        self.report.pages_with_content = pages.iter().filter(|p| p.has_content()).count();
        self.report.votes_collected = self.working.vote_count();

        let mut tally = self.gate.tally();
        for issue in &self.working.issues {
            tally.record(issue.kind);
        }
        self.report.issues = tally;
    }

    fn interrupted(mut self, started: Instant) -> SyncReport {
        self.fill_report(started, SyncStatus::Interrupted);
        tracing::info!(
            pages = self.report.pages_total,
            votes = self.report.votes_collected,
            "Sync interrupted; progress saved to checkpoints"
        );
        self.report
    }

    fn finish(mut self, started: Instant, snapshots: &SnapshotStore) -> Result<SyncReport, SyncError> {
        self.fill_report(started, SyncStatus::Completed);

        let pages = self.working.pages();
        let users = consolidate(pages, self.working.votes());
        let info = RunInfo {
            timestamp: Utc::now(),
            mode: self.mode,
            base_url: self.options.base_url.clone(),
            duration_secs: self.report.duration.as_secs_f64(),
            issue_tally: self.report.issues,
            issues: self.working.issues.clone(),
        };
        let snapshot = Snapshot::build(info, pages, self.working.votes().cloned().collect(), users);
        let path = snapshots.write(&snapshot)?;

        let mut history = std::mem::take(&mut self.history);
        history.extend(std::mem::take(&mut self.working.history_updates));
        history.save(&self.options.history_path())?;

        tracing::info!(
            path = %path.display(),
            pages = snapshot.metadata.counts.pages,
            votes = snapshot.metadata.counts.vote_records,
            users = snapshot.metadata.counts.users,
            "Snapshot written"
        );
        emit(
            self.on_progress,
            SyncProgress::SnapshotWritten { path: path.clone() },
        );

        self.report.users_derived = snapshot.users.len();
        self.report.snapshot_path = Some(path);
        Ok(self.report)
    }
}
