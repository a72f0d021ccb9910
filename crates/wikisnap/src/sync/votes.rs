//! Collect one page's vote history, newest first.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::{ApiError, WikiApi, vote_query_cost};
use crate::model::{VoteEvent, VoteKey};
use crate::retry::ErrorContext;

use super::gate::RequestGate;
use super::progress::ProgressCallback;
use super::state::PartialPage;

/// What one `collect` call produced.
#[derive(Debug)]
pub struct VoteCollection {
    /// Votes fetched by this call, newest first.
    pub votes: Vec<VoteEvent>,
    pub is_complete: bool,
    /// Where to continue when incomplete.
    pub next_cursor: Option<String>,
    pub error: Option<ApiError>,
    /// Stopped because shutdown was requested.
    pub interrupted: bool,
    /// Upstream votes dropped as invalid.
    pub rejected: Vec<String>,
}

impl VoteCollection {
    fn complete(votes: Vec<VoteEvent>, rejected: Vec<String>) -> Self {
        Self {
            votes,
            is_complete: true,
            next_cursor: None,
            error: None,
            interrupted: false,
            rejected,
        }
    }

    fn incomplete(
        votes: Vec<VoteEvent>,
        rejected: Vec<String>,
        cursor: Option<String>,
        error: Option<ApiError>,
    ) -> Self {
        Self {
            votes,
            is_complete: false,
            next_cursor: cursor,
            interrupted: error.is_none(),
            error,
            rejected,
        }
    }
}

/// Parameters for one page.
#[derive(Debug, Clone, Copy)]
pub struct CollectRequest<'r> {
    pub page_url: &'r str,
    /// Upper bound on votes to collect, across resumes.
    pub expected_count: u32,
    /// Continue from a stored position instead of the newest vote.
    pub resume: Option<&'r PartialPage>,
    /// Stop at the first vote whose identity is in this set.
    pub known: Option<&'r HashSet<VoteKey>>,
}

pub struct VoteCollector<'a, A: ?Sized> {
    api: &'a A,
    batch_size: u32,
}

impl<'a, A: WikiApi + ?Sized> VoteCollector<'a, A> {
    pub fn new(api: &'a A, batch_size: u32) -> Self {
        Self {
            api,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn collect(
        &self,
        gate: &mut RequestGate,
        request: CollectRequest<'_>,
        shutdown: &AtomicBool,
        on_progress: Option<&ProgressCallback>,
    ) -> VoteCollection {
        let url = request.page_url;
        let already = request.resume.map_or(0, |p| p.votes_collected_so_far);
        let mut cursor = request.resume.and_then(|p| p.cursor.clone());
        let mut votes: Vec<VoteEvent> = Vec::new();
        let mut rejected: Vec<String> = Vec::new();

        loop {
            let wanted = (request.expected_count as usize).saturating_sub(already + votes.len());
            if wanted == 0 {
                return VoteCollection::complete(votes, rejected);
            }
            if shutdown.load(Ordering::SeqCst) {
                return VoteCollection::incomplete(votes, rejected, cursor, None);
            }

            let first = self.batch_size.min(u32::try_from(wanted).unwrap_or(u32::MAX));
            let api = self.api;
            let after = cursor.as_deref();
            let result = gate
                .run(
                    ErrorContext::Votes,
                    vote_query_cost(first),
                    url,
                    on_progress,
                    move || api.fetch_votes(url, after, first),
                )
                .await;

            let batch = match result {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(url = %url, collected = votes.len(), error = %e, "Vote fetch abandoned");
                    return VoteCollection::incomplete(votes, rejected, cursor, Some(e));
                }
            };

            let received = batch.items.len() + batch.rejected.len();
            rejected.extend(batch.rejected);
            for vote in batch.items {
                if request.known.is_some_and(|k| k.contains(&vote.key())) {
                    tracing::debug!(url = %url, new = votes.len(), "Reached recorded vote");
                    return VoteCollection::complete(votes, rejected);
                }
                votes.push(vote);
            }

            if received == 0 || !(batch.has_more && batch.next_cursor.is_some()) {
                return VoteCollection::complete(votes, rejected);
            }
            cursor = batch.next_cursor;
        }
    }
}
