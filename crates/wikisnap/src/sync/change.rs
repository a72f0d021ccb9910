//! Decide whether a page's vote history needs re-fetching.
//!
//! Vote count and rating comparisons are free. Only pages where both match
//! the last snapshot pay for a one-vote probe of the newest vote.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::api::{WikiApi, vote_query_cost};
use crate::model::{PageSummary, PageVoteSnapshot};
use crate::retry::ErrorContext;

use super::gate::RequestGate;

/// Why a page's votes are being fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason {
    /// No usable snapshot for this page.
    NewPage,
    CountChanged { previous: u32, current: u32 },
    RatingChanged { previous: i64, current: i64 },
    /// The newest vote belongs to a different voter than recorded.
    TopVoteChanged,
    /// The probe failed; fetch rather than risk missing a change.
    ProbeFailed,
    /// The snapshot is older than the retention window.
    SnapshotExpired,
    /// Incremental updates are disabled.
    IncrementalDisabled,
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewPage => f.write_str("new page"),
            Self::CountChanged { previous, current } => {
                write!(f, "vote count {previous} -> {current}")
            }
            Self::RatingChanged { previous, current } => {
                write!(f, "rating {previous} -> {current}")
            }
            Self::TopVoteChanged => f.write_str("newest vote changed"),
            Self::ProbeFailed => f.write_str("probe failed"),
            Self::SnapshotExpired => f.write_str("snapshot expired"),
            Self::IncrementalDisabled => f.write_str("incremental disabled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    Skip,
    Fetch(ChangeReason),
}

impl ChangeDecision {
    /// Only a grown vote count means new votes were purely prepended, so
    /// only then may a fetch stop at the first already-recorded vote.
    pub fn allows_incremental(&self) -> bool {
        matches!(
            self,
            Self::Fetch(ChangeReason::CountChanged { previous, current }) if current > previous
        )
    }
}

/// Outcome of the free checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QuickCheck {
    Decided(ChangeDecision),
    /// Counts match; compare the newest voter.
    NeedsProbe,
}

/// Compare a page against its snapshot without touching the network.
pub(crate) fn quick_check(
    page: &PageSummary,
    snapshot: Option<&PageVoteSnapshot>,
    now: DateTime<Utc>,
    retention: chrono::Duration,
) -> QuickCheck {
    let Some(snapshot) = snapshot else {
        return QuickCheck::Decided(ChangeDecision::Fetch(ChangeReason::NewPage));
    };
    if now - snapshot.last_updated > retention {
        return QuickCheck::Decided(ChangeDecision::Fetch(ChangeReason::SnapshotExpired));
    }
    if page.vote_count != snapshot.vote_count {
        return QuickCheck::Decided(ChangeDecision::Fetch(ChangeReason::CountChanged {
            previous: snapshot.vote_count,
            current: page.vote_count,
        }));
    }
    if page.rating != snapshot.rating {
        return QuickCheck::Decided(ChangeDecision::Fetch(ChangeReason::RatingChanged {
            previous: snapshot.rating,
            current: page.rating,
        }));
    }
    QuickCheck::NeedsProbe
}

pub struct ChangeDetector<'a, A: ?Sized> {
    api: &'a A,
    retention: chrono::Duration,
}

impl<'a, A: WikiApi + ?Sized> ChangeDetector<'a, A> {
    pub fn new(api: &'a A, retention: chrono::Duration) -> Self {
        Self { api, retention }
    }

    pub async fn detect(
        &self,
        gate: &mut RequestGate,
        page: &PageSummary,
        snapshot: Option<&PageVoteSnapshot>,
        now: DateTime<Utc>,
    ) -> ChangeDecision {
        match quick_check(page, snapshot, now, self.retention) {
            QuickCheck::Decided(decision) => decision,
            QuickCheck::NeedsProbe => {
                let recorded = snapshot.and_then(|s| s.first_vote_id.as_deref());
                self.probe(gate, page, recorded).await
            }
        }
    }

    async fn probe(
        &self,
        gate: &mut RequestGate,
        page: &PageSummary,
        recorded: Option<&str>,
    ) -> ChangeDecision {
        let probe = self.api.fetch_votes(&page.url, None, 1);
        match gate
            .try_once(ErrorContext::Votes, vote_query_cost(1), probe)
            .await
        {
            Ok(batch) => {
                let newest = batch.items.first().map(|v| v.voter_id.as_str());
                if newest == recorded {
                    ChangeDecision::Skip
                } else {
                    tracing::debug!(url = %page.url, ?recorded, ?newest, "Newest vote changed");
                    ChangeDecision::Fetch(ChangeReason::TopVoteChanged)
                }
            }
            Err(e) => {
                tracing::debug!(url = %page.url, error = %e, "Probe failed, fetching votes");
                ChangeDecision::Fetch(ChangeReason::ProbeFailed)
            }
        }
    }
}
