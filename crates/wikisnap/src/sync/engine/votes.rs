use std::collections::HashSet;

use chrono::Utc;

use crate::api::WikiApi;
use crate::checkpoint::{CheckpointError, CheckpointStream, VoteCheckpoint};
use crate::history::snapshot_of;
use crate::model::{PageSummary, VoteEvent, VoteKey};

use super::super::change::{ChangeDecision, ChangeDetector, ChangeReason};
use super::super::error::SyncError;
use super::super::progress::{SyncProgress, VotePageOutcome, emit};
use super::super::state::PartialPage;
use super::super::types::IssueKind;
use super::super::votes::{CollectRequest, VoteCollection, VoteCollector};
use super::{FetchKind, PageStep, Phase, Run};

impl<A: WikiApi + ?Sized> Run<'_, A> {
    /// Pick up completed and partial pages from this run's vote checkpoint.
    pub(super) fn restore_vote_progress(&mut self) -> Result<(), CheckpointError> {
        let Some(cp) = self.checkpoints.load_latest::<VoteCheckpoint>()? else {
            return Ok(());
        };
        if cp.run_started_at != self.run_started_at {
            tracing::info!("Latest vote checkpoint belongs to another run, starting votes fresh");
            return Ok(());
        }

        tracing::info!(
            completed = cp.progress.completed_pages.len(),
            partial = cp.progress.partial_pages.len(),
            votes = cp.votes.len(),
            "Restored vote progress"
        );
        self.working.restore_votes(cp.votes);
        self.working.progress = cp.progress;
        self.working.history_updates = cp.history_updates;
        Ok(())
    }

    pub(super) async fn collect_votes(&mut self) -> Result<Phase, SyncError> {
        let pages: Vec<PageSummary> = self.working.pages().to_vec();
        let total = pages.len();
        self.working.progress.total_votes_expected =
            pages.iter().map(|p| u64::from(p.vote_count)).sum();

        let already_completed = pages
            .iter()
            .filter(|p| self.working.progress.is_completed(&p.url))
            .count();
        emit(
            self.on_progress,
            SyncProgress::FetchingVotes {
                pages: total,
                already_completed,
            },
        );
        tracing::info!(pages = total, already_completed, "Fetching votes");

        let mut since_checkpoint = 0usize;
        for (i, page) in pages.iter().enumerate() {
            if self.stop_requested() {
                emit(self.on_progress, SyncProgress::Interrupted);
                self.save_vote_checkpoint()?;
                return Ok(Phase::Interrupted);
            }

            let outcome = if self.working.progress.is_completed(&page.url) {
                self.report.vote_pages_restored += 1;
                VotePageOutcome::Restored
            } else {
                since_checkpoint += 1;
                match self.process_page(page).await {
                    PageStep::Done(outcome) => outcome,
                    PageStep::Interrupted => {
                        emit(self.on_progress, SyncProgress::Interrupted);
                        self.save_vote_checkpoint()?;
                        return Ok(Phase::Interrupted);
                    }
                }
            };

            self.working.progress.total_votes_collected = self.working.vote_count() as u64;
            emit(
                self.on_progress,
                SyncProgress::VotePageDone {
                    url: page.url.clone(),
                    outcome,
                    processed: i + 1,
                    total,
                },
            );

            if since_checkpoint >= self.options.checkpoint_interval {
                self.save_vote_checkpoint()?;
                since_checkpoint = 0;
            }
        }

        self.save_vote_checkpoint()?;
        let votes = self.working.vote_count();
        tracing::info!(
            votes,
            failed_pages = self.report.vote_pages_failed,
            "Vote phase complete"
        );
        emit(
            self.on_progress,
            SyncProgress::VotesComplete {
                votes,
                failed_pages: self.report.vote_pages_failed,
            },
        );
        Ok(Phase::Done)
    }

    async fn process_page(&mut self, page: &PageSummary) -> PageStep {
        let url = page.url.as_str();

        if !page.needs_vote_data() {
            self.working.clear_page_votes(url);
            self.working
                .history_updates
                .insert(url.to_string(), snapshot_of(page, &[], Utc::now()));
            self.working.progress.mark_completed(url);
            self.report.vote_pages_empty += 1;
            return PageStep::Done(VotePageOutcome::Empty);
        }

        if let Some(partial) = self.working.progress.partial(url).cloned() {
            tracing::debug!(url, cursor = ?partial.cursor, "Continuing partial vote fetch");
            return self.fetch_page_votes(page, FetchKind::Resume(partial)).await;
        }

        let decision = if self.options.incremental {
            // A snapshot only vouches for the recorded votes when it describes
            // exactly that many.
            let snapshot = self.prior_votes.get(url).and_then(|prior| {
                self.history
                    .get(url)
                    .filter(|s| s.vote_count as usize == prior.len())
            });
            ChangeDetector::new(self.api, self.options.vote_retention)
                .detect(&mut self.gate, page, snapshot, Utc::now())
                .await
        } else {
            ChangeDecision::Fetch(ChangeReason::IncrementalDisabled)
        };

        match decision {
            ChangeDecision::Skip => {
                let prior = self.prior_votes.get(url).cloned().unwrap_or_default();
                self.working.replace_page_votes(url, prior);
                self.working.progress.mark_completed(url);
                self.report.vote_pages_unchanged += 1;
                tracing::debug!(url, "Votes unchanged");
                PageStep::Done(VotePageOutcome::Unchanged)
            }
            ChangeDecision::Fetch(ref reason) => {
                tracing::debug!(url, reason = %reason, "Fetching votes");
                let kind = if decision.allows_incremental() && self.prior_votes.contains_key(url) {
                    FetchKind::Incremental
                } else {
                    FetchKind::Full
                };
                self.fetch_page_votes(page, kind).await
            }
        }
    }

    async fn fetch_page_votes(&mut self, page: &PageSummary, mut kind: FetchKind) -> PageStep {
        loop {
            let collection = self.collect_page(page, &kind).await;

            if matches!(kind, FetchKind::Incremental) && collection.is_complete {
                let prior = self.prior_votes.get(&page.url).map_or(0, Vec::len);
                if prior + collection.votes.len() != page.vote_count as usize {
                    // Something besides new votes changed; only a full fetch
                    // can tell what.
                    tracing::info!(
                        url = %page.url,
                        prior,
                        new = collection.votes.len(),
                        expected = page.vote_count,
                        "Incremental votes do not add up, fetching full history"
                    );
                    kind = FetchKind::Full;
                    continue;
                }
            }

            return self.apply_collection(page, kind, collection);
        }
    }

    async fn collect_page(&mut self, page: &PageSummary, kind: &FetchKind) -> VoteCollection {
        let url = page.url.as_str();
        let known: Option<HashSet<VoteKey>> = match kind {
            FetchKind::Incremental => self
                .prior_votes
                .get(url)
                .map(|votes| votes.iter().map(VoteEvent::key).collect()),
            _ => None,
        };
        let resume = match kind {
            FetchKind::Resume(partial) => Some(partial),
            _ => None,
        };

        VoteCollector::new(self.api, self.options.vote_batch_size)
            .collect(
                &mut self.gate,
                CollectRequest {
                    page_url: url,
                    expected_count: page.vote_count,
                    resume,
                    known: known.as_ref(),
                },
                self.shutdown,
                self.on_progress,
            )
            .await
    }

    fn apply_collection(
        &mut self,
        page: &PageSummary,
        kind: FetchKind,
        collection: VoteCollection,
    ) -> PageStep {
        let url = page.url.as_str();
        let incremental = matches!(kind, FetchKind::Incremental);
        let already = match &kind {
            FetchKind::Resume(partial) => partial.votes_collected_so_far,
            _ => 0,
        };
        let fetched = collection.votes.len();

        for reason in &collection.rejected {
            self.record_issue(
                IssueKind::DataAnomaly,
                Some(url),
                format!("dropped invalid vote: {reason}"),
            );
        }

        if incremental && !collection.is_complete {
            // New votes cannot be placed without the rest of the gap; keep the
            // recorded list and leave the page for the next run.
            let prior = self.prior_votes.get(url).cloned().unwrap_or_default();
            self.working.replace_page_votes(url, prior);
        }

        let new_votes = match kind {
            FetchKind::Full => self.working.replace_page_votes(url, collection.votes),
            FetchKind::Resume(_) => self.working.append_page_votes(url, collection.votes),
            FetchKind::Incremental if collection.is_complete => {
                let prior = self.prior_votes.get(url).cloned().unwrap_or_default();
                self.working.replace_page_votes(url, prior);
                self.working.prepend_page_votes(url, collection.votes)
            }
            FetchKind::Incremental => 0,
        };

        if collection.is_complete {
            let collected = self.working.page_votes(url).len();
            if collected + collection.rejected.len() != page.vote_count as usize {
                tracing::warn!(
                    url,
                    expected = page.vote_count,
                    collected,
                    "Vote count mismatch"
                );
                self.record_issue(
                    IssueKind::DataAnomaly,
                    Some(url),
                    format!("expected {} votes, collected {collected}", page.vote_count),
                );
            }
            let snapshot = snapshot_of(page, self.working.page_votes(url), Utc::now());
            self.working.history_updates.insert(url.to_string(), snapshot);
            self.working.progress.mark_completed(url);
            self.report.vote_pages_fetched += 1;
            return PageStep::Done(VotePageOutcome::Fetched {
                new_votes,
                incremental,
            });
        }

        let partial = PartialPage {
            cursor: collection.next_cursor,
            votes_collected_so_far: already + fetched,
        };

        if collection.interrupted {
            if !incremental {
                self.working.progress.mark_partial(url, partial);
            }
            return PageStep::Interrupted;
        }

        let error = collection
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "vote fetch failed".to_string());
        self.record_issue(IssueKind::Fatal, Some(url), error.clone());
        if !incremental {
            // The page now holds a truncated list; nothing recorded about it
            // can be trusted on the next run.
            self.history.remove(url);
            self.working.history_updates.remove(url);
            self.working.progress.mark_partial(url, partial);
        }
        self.report.vote_pages_failed += 1;
        if let Err(e) = self.save_vote_checkpoint() {
            tracing::error!(error = %e, "Emergency vote checkpoint failed");
        }
        PageStep::Done(VotePageOutcome::Failed { error })
    }

    fn save_vote_checkpoint(&mut self) -> Result<(), CheckpointError> {
        let checkpoint = VoteCheckpoint {
            run_started_at: self.run_started_at,
            created_at: Utc::now(),
            progress: self.working.progress.clone(),
            votes: self.working.votes_snapshot(),
            history_updates: self.working.history_updates.clone(),
        };
        let path = self.checkpoints.save(&checkpoint)?;
        emit(
            self.on_progress,
            SyncProgress::CheckpointSaved {
                stream: CheckpointStream::Votes,
                path,
            },
        );
        Ok(())
    }
}
