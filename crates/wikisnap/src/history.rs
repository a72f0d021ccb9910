//! Per-page vote snapshots carried between runs.
//!
//! Stored as one JSON object keyed by page url. The file is replaced
//! atomically at the end of a completed run.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{PageSummary, PageVoteSnapshot, VoteEvent};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("vote history I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid vote history {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Last-known vote state per page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteHistory {
    pages: BTreeMap<String, PageVoteSnapshot>,
}

impl VoteHistory {
    pub fn get(&self, url: &str) -> Option<&PageVoteSnapshot> {
        self.pages.get(url)
    }

    pub fn insert(&mut self, url: impl Into<String>, snapshot: PageVoteSnapshot) {
        self.pages.insert(url.into(), snapshot);
    }

    /// Forget a page, so the next run treats it as never fetched.
    pub fn remove(&mut self, url: &str) -> Option<PageVoteSnapshot> {
        self.pages.remove(url)
    }

    pub fn extend(&mut self, updates: impl IntoIterator<Item = (String, PageVoteSnapshot)>) {
        self.pages.extend(updates);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Load from `path`; a missing file is an empty history.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(HistoryError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| HistoryError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replace the file at `path` with this history.
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        let io_err = |source| HistoryError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;

        let body = serde_json::to_vec_pretty(self).map_err(|source| HistoryError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&body).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

/// Snapshot of a page after its votes were (re)fetched.
///
/// `votes` is the page's full vote list, newest first.
pub fn snapshot_of(page: &PageSummary, votes: &[VoteEvent], now: DateTime<Utc>) -> PageVoteSnapshot {
    PageVoteSnapshot {
        vote_count: page.vote_count,
        rating: page.rating,
        first_vote_id: votes.first().map(|v| v.voter_id.clone()),
        last_updated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{page, ts, vote};
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty_history() {
        let dir = TempDir::new().unwrap();
        let history = VoteHistory::load(&dir.path().join("history.json")).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn save_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut history = VoteHistory::default();
        let a = page("http://wiki/a", 7, 24);
        history.insert(&a.url, snapshot_of(&a, &[vote(&a.url, "9", 5, 1)], ts(100)));
        history.save(&path).unwrap();

        history.insert("http://wiki/b", snapshot_of(&page("http://wiki/b", 0, 0), &[], ts(100)));
        history.save(&path).unwrap();

        let loaded = VoteHistory::load(&path).unwrap();
        assert_eq!(loaded, history);
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get("http://wiki/a").unwrap().first_vote_id.as_deref(),
            Some("9")
        );
        assert!(loaded.get("http://wiki/b").unwrap().first_vote_id.is_none());

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["http://wiki/a"]["voteCount"], 24);
    }

    #[test]
    fn removed_page_is_gone_after_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let a = page("http://wiki/a", 1, 1);

        let mut history = VoteHistory::default();
        history.insert(&a.url, snapshot_of(&a, &[vote(&a.url, "1", 1, 1)], ts(0)));
        assert!(history.remove(&a.url).is_some());
        assert!(history.remove(&a.url).is_none());
        history.save(&path).unwrap();

        assert!(VoteHistory::load(&path).unwrap().get(&a.url).is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            VoteHistory::load(&path),
            Err(HistoryError::Json { .. })
        ));
    }
}
