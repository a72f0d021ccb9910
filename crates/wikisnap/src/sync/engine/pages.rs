use chrono::Utc;

use crate::api::{WikiApi, page_query_cost};
use crate::checkpoint::{CheckpointError, CheckpointStream, PageCheckpoint};
use crate::model::PageSummary;
use crate::retry::ErrorContext;

use super::super::error::SyncError;
use super::super::progress::{SyncProgress, emit};
use super::super::types::IssueKind;
use super::{Phase, Run};

impl<A: WikiApi + ?Sized> Run<'_, A> {
    /// Take the page list from a checkpoint or snapshot instead of the network.
    pub(super) fn restore_pages(&mut self, pages: Vec<PageSummary>, source: &'static str) {
        for page in pages {
            self.working.upsert_page(page);
        }
        let total = self.working.page_count();
        tracing::info!(pages = total, source, "Using stored page list");
        emit(self.on_progress, SyncProgress::PagesRestored { total, source });
    }

    /// List pages in cursor order, continuing from `resume` when given.
    ///
    /// A page-phase failure that exhausts the retry budget saves an emergency
    /// checkpoint and aborts the run.
    pub(super) async fn crawl_pages(
        &mut self,
        resume: Option<PageCheckpoint>,
    ) -> Result<Phase, SyncError> {
        let api = self.api;
        let options = self.options;
        let base_url = options.base_url.as_str();
        let first = options.page_batch_size.max(1);

        let (mut cursor, mut processed) = match resume {
            Some(cp) => {
                for page in cp.pages {
                    self.working.upsert_page(page);
                }
                (cp.next_cursor, cp.pages_processed)
            }
            None => (None, 0),
        };

        emit(
            self.on_progress,
            SyncProgress::FetchingPages {
                resumed_with: self.working.page_count(),
            },
        );
        tracing::info!(resumed_with = self.working.page_count(), "Fetching page listing");

        let mut since_checkpoint = 0usize;
        loop {
            if self.stop_requested() {
                emit(self.on_progress, SyncProgress::Interrupted);
                self.save_page_checkpoint(cursor, processed, false)?;
                return Ok(Phase::Interrupted);
            }

            let after = cursor.as_deref();
            let result = self
                .gate
                .run(
                    ErrorContext::Pages,
                    page_query_cost(first),
                    base_url,
                    self.on_progress,
                    move || api.fetch_pages(base_url, after, first),
                )
                .await;

            let batch = match result {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, processed, "Page listing aborted");
                    self.record_issue(
                        IssueKind::Fatal,
                        None,
                        format!("page listing aborted after {processed} pages: {e}"),
                    );
                    if let Err(save_err) = self.save_page_checkpoint(cursor, processed, false) {
                        tracing::error!(error = %save_err, "Emergency page checkpoint failed");
                    }
                    return Err(SyncError::Fatal {
                        context: ErrorContext::Pages,
                        source: e,
                    });
                }
            };

            let count = batch.items.len();
            let more = count > 0 && batch.continues();
            for page in batch.items {
                self.working.upsert_page(page);
            }
            processed += count;
            since_checkpoint += count;
            emit(
                self.on_progress,
                SyncProgress::FetchedPages {
                    count,
                    total_so_far: self.working.page_count(),
                },
            );

            if !more {
                break;
            }
            cursor = batch.next_cursor;

            if since_checkpoint >= options.checkpoint_interval {
                self.save_page_checkpoint(cursor.clone(), processed, false)?;
                since_checkpoint = 0;
            }
        }

        self.save_page_checkpoint(None, processed, true)?;
        let total = self.working.page_count();
        tracing::info!(pages = total, "Page listing complete");
        emit(self.on_progress, SyncProgress::PagesComplete { total });
        Ok(Phase::Done)
    }

    fn save_page_checkpoint(
        &mut self,
        cursor: Option<String>,
        processed: usize,
        complete: bool,
    ) -> Result<(), CheckpointError> {
        let checkpoint = PageCheckpoint {
            run_started_at: self.run_started_at,
            created_at: Utc::now(),
            base_url: self.options.base_url.clone(),
            pages_processed: processed,
            next_cursor: cursor,
            listing_complete: complete,
            pages: self.working.pages().to_vec(),
        };
        let path = self.checkpoints.save(&checkpoint)?;
        emit(
            self.on_progress,
            SyncProgress::CheckpointSaved {
                stream: CheckpointStream::Pages,
                path,
            },
        );
        Ok(())
    }
}
