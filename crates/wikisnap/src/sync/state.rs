//! In-memory crawl state owned by the sync worker.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{PageSummary, PageVoteSnapshot, VoteEvent, VoteKey};

use super::types::CrawlIssue;

/// Where an unfinished vote fetch left off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPage {
    pub cursor: Option<String>,
    pub votes_collected_so_far: usize,
}

/// Vote-phase progress.
///
/// A url is in at most one of `completed_pages` and `partial_pages`, and only
/// ever moves absent -> partial -> completed within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteProgress {
    pub completed_pages: BTreeSet<String>,
    pub partial_pages: BTreeMap<String, PartialPage>,
    pub total_votes_expected: u64,
    pub total_votes_collected: u64,
}

impl VoteProgress {
    pub fn is_completed(&self, url: &str) -> bool {
        self.completed_pages.contains(url)
    }

    pub fn partial(&self, url: &str) -> Option<&PartialPage> {
        self.partial_pages.get(url)
    }

    /// Record a resumable position. Ignored for completed pages.
    pub fn mark_partial(&mut self, url: &str, partial: PartialPage) {
        if self.completed_pages.contains(url) {
            return;
        }
        self.partial_pages.insert(url.to_string(), partial);
    }

    pub fn mark_completed(&mut self, url: &str) {
        self.partial_pages.remove(url);
        self.completed_pages.insert(url.to_string());
    }
}

/// Everything the current run has collected so far.
///
/// Pages keep upstream cursor order; each page's votes are kept newest-first
/// and deduplicated across the whole set by [`VoteKey`].
#[derive(Debug, Default)]
pub struct WorkingSet {
    pages: Vec<PageSummary>,
    page_index: HashMap<String, usize>,
    votes: BTreeMap<String, Vec<VoteEvent>>,
    vote_keys: HashSet<VoteKey>,
    pub progress: VoteProgress,
    /// History entries for pages whose votes were (re)fetched this run.
    pub history_updates: BTreeMap<String, PageVoteSnapshot>,
    pub issues: Vec<CrawlIssue>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a page, keeping its original position.
    pub fn upsert_page(&mut self, page: PageSummary) {
        match self.page_index.get(&page.url) {
            Some(&i) => self.pages[i] = page,
            None => {
                self.page_index.insert(page.url.clone(), self.pages.len());
                self.pages.push(page);
            }
        }
    }

    pub fn pages(&self) -> &[PageSummary] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_votes(&self, url: &str) -> &[VoteEvent] {
        self.votes.get(url).map_or(&[], Vec::as_slice)
    }

    pub fn vote_count(&self) -> usize {
        self.vote_keys.len()
    }

    /// All votes, grouped by page in page order, newest-first within a page.
    pub fn votes(&self) -> impl Iterator<Item = &VoteEvent> {
        self.pages
            .iter()
            .filter_map(|p| self.votes.get(&p.url))
            .flatten()
    }

    /// Append votes after the ones already held for `url`.
    ///
    /// Returns how many were new.
    pub fn append_page_votes(&mut self, url: &str, votes: Vec<VoteEvent>) -> usize {
        let mut added = Vec::with_capacity(votes.len());
        for vote in votes {
            if self.vote_keys.insert(vote.key()) {
                added.push(vote);
            }
        }
        let n = added.len();
        self.votes.entry(url.to_string()).or_default().extend(added);
        n
    }

    /// Place newer votes in front of the ones already held for `url`.
    pub fn prepend_page_votes(&mut self, url: &str, newer: Vec<VoteEvent>) -> usize {
        let mut added: Vec<VoteEvent> = newer
            .into_iter()
            .filter(|v| self.vote_keys.insert(v.key()))
            .collect();
        let n = added.len();
        let existing = self.votes.remove(url).unwrap_or_default();
        added.extend(existing);
        self.votes.insert(url.to_string(), added);
        n
    }

    /// Drop whatever is held for `url` and store `votes` instead.
    pub fn replace_page_votes(&mut self, url: &str, votes: Vec<VoteEvent>) -> usize {
        self.clear_page_votes(url);
        self.append_page_votes(url, votes)
    }

    pub fn clear_page_votes(&mut self, url: &str) {
        if let Some(old) = self.votes.remove(url) {
            for vote in &old {
                self.vote_keys.remove(&vote.key());
            }
        }
    }

    /// Rebuild the vote map from a flat list (checkpoint restore).
    pub fn restore_votes(&mut self, votes: Vec<VoteEvent>) {
        self.votes.clear();
        self.vote_keys.clear();
        for vote in votes {
            let url = vote.page_url.clone();
            self.append_page_votes(&url, vec![vote]);
        }
    }

    /// All votes as a flat list in storage order.
    pub fn votes_snapshot(&self) -> Vec<VoteEvent> {
        self.votes.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{page, vote};

    const A: &str = "http://wiki/a";

    #[test]
    fn progress_moves_partial_to_completed() {
        let mut progress = VoteProgress::default();
        progress.mark_partial(
            A,
            PartialPage {
                cursor: Some("c2".into()),
                votes_collected_so_far: 200,
            },
        );
        assert_eq!(progress.partial(A).unwrap().votes_collected_so_far, 200);

        progress.mark_completed(A);
        assert!(progress.is_completed(A));
        assert!(progress.partial(A).is_none());

        // Completed pages never move back.
        progress.mark_partial(
            A,
            PartialPage {
                cursor: None,
                votes_collected_so_far: 0,
            },
        );
        assert!(progress.partial(A).is_none());
    }

    #[test]
    fn upsert_page_keeps_first_position() {
        let mut ws = WorkingSet::new();
        ws.upsert_page(page(A, 1, 1));
        ws.upsert_page(page("http://wiki/b", 2, 2));
        ws.upsert_page(page(A, 9, 9));

        assert_eq!(ws.page_count(), 2);
        assert_eq!(ws.pages()[0].url, A);
        assert_eq!(ws.pages()[0].rating, 9);
    }

    #[test]
    fn duplicate_votes_are_ignored() {
        let mut ws = WorkingSet::new();
        let added = ws.append_page_votes(A, vec![vote(A, "1", 10, 1), vote(A, "1", 10, -1)]);
        assert_eq!(added, 1);
        assert_eq!(ws.append_page_votes(A, vec![vote(A, "1", 10, 1)]), 0);
        assert_eq!(ws.vote_count(), 1);
        assert_eq!(ws.page_votes(A).len(), 1);
    }

    #[test]
    fn prepend_keeps_newest_first_order() {
        let mut ws = WorkingSet::new();
        ws.upsert_page(page(A, 0, 4));
        ws.append_page_votes(A, vec![vote(A, "2", 2, 1), vote(A, "1", 1, 1)]);
        ws.prepend_page_votes(A, vec![vote(A, "4", 4, 1), vote(A, "3", 3, 1)]);

        let voters: Vec<&str> = ws.page_votes(A).iter().map(|v| v.voter_id.as_str()).collect();
        assert_eq!(voters, ["4", "3", "2", "1"]);
        assert_eq!(ws.votes().count(), 4);
    }

    #[test]
    fn replace_frees_old_keys() {
        let mut ws = WorkingSet::new();
        ws.append_page_votes(A, vec![vote(A, "1", 1, 1), vote(A, "2", 2, 1)]);
        ws.replace_page_votes(A, vec![vote(A, "2", 2, 1)]);
        assert_eq!(ws.vote_count(), 1);

        // The dropped key can be inserted again.
        assert_eq!(ws.append_page_votes(A, vec![vote(A, "1", 1, 1)]), 1);
    }

    #[test]
    fn restore_votes_groups_by_page() {
        let mut ws = WorkingSet::new();
        ws.restore_votes(vec![
            vote(A, "1", 1, 1),
            vote("http://wiki/b", "1", 1, 1),
            vote(A, "2", 2, -1),
        ]);
        assert_eq!(ws.page_votes(A).len(), 2);
        assert_eq!(ws.page_votes("http://wiki/b").len(), 1);
        assert_eq!(ws.votes_snapshot().len(), 3);
    }
}
