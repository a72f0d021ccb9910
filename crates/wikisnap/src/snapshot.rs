//! The snapshot output file: one JSON artifact per completed run.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    AlternateTitle, Attribution, DerivedUser, PageSummary, Revision, UserRef, VoteEvent,
};
use crate::sync::{CrawlIssue, IssueTally, SyncMode};

/// Caveats written into every snapshot.
pub const KNOWN_LIMITATIONS: &[&str] = &[
    "Vote records come from the upstream fuzzy vote history, which is eventually consistent and may omit or retain superseded votes.",
    "Votes for pages detected as unchanged are carried forward from the previous snapshot.",
    "Vote collection per page is bounded by the page's reported vote count.",
];

const FILE_PREFIX: &str = "snapshot_";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid snapshot {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCounts {
    pub pages: usize,
    pub vote_records: usize,
    pub users: usize,
    pub attributions: usize,
    pub revisions: usize,
    pub alternate_titles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub timestamp: DateTime<Utc>,
    pub mode: SyncMode,
    pub base_url: String,
    pub duration_secs: f64,
    pub counts: SnapshotCounts,
    pub known_limitations: Vec<String>,
    pub issue_tally: IssueTally,
    pub issues: Vec<CrawlIssue>,
}

/// A page row without its embedded collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub url: String,
    #[serde(default)]
    pub wikidot_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub rating: i64,
    pub vote_count: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<UserRef>,
    pub revision_count: u32,
    pub needs_vote_data: bool,
}

impl From<&PageSummary> for PageRecord {
    fn from(page: &PageSummary) -> Self {
        Self {
            url: page.url.clone(),
            wikidot_id: page.wikidot_id.clone(),
            title: page.title.clone(),
            rating: page.rating,
            vote_count: page.vote_count,
            tags: page.tags.clone(),
            created_at: page.created_at,
            created_by: page.created_by.clone(),
            revision_count: page.revision_count,
            needs_vote_data: page.needs_vote_data(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub pages: Vec<PageRecord>,
    pub vote_records: Vec<VoteEvent>,
    pub users: Vec<DerivedUser>,
    pub attributions: Vec<Attribution>,
    pub revisions: Vec<Revision>,
    pub alternate_titles: Vec<AlternateTitle>,
}

/// Everything needed to describe a run in the metadata block.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub timestamp: DateTime<Utc>,
    pub mode: SyncMode,
    pub base_url: String,
    pub duration_secs: f64,
    pub issue_tally: IssueTally,
    pub issues: Vec<CrawlIssue>,
}

impl Snapshot {
    /// Flatten pages into the output shape.
    pub fn build(
        info: RunInfo,
        pages: &[PageSummary],
        vote_records: Vec<VoteEvent>,
        users: Vec<DerivedUser>,
    ) -> Self {
        let attributions: Vec<Attribution> = pages
            .iter()
            .flat_map(|p| p.attributions.iter().cloned())
            .collect();
        let revisions: Vec<Revision> = pages
            .iter()
            .flat_map(|p| p.revisions.iter().cloned())
            .collect();
        let alternate_titles: Vec<AlternateTitle> = pages
            .iter()
            .flat_map(|p| p.alternate_titles.iter().cloned())
            .collect();

        let counts = SnapshotCounts {
            pages: pages.len(),
            vote_records: vote_records.len(),
            users: users.len(),
            attributions: attributions.len(),
            revisions: revisions.len(),
            alternate_titles: alternate_titles.len(),
        };

        Self {
            metadata: SnapshotMetadata {
                timestamp: info.timestamp,
                mode: info.mode,
                base_url: info.base_url,
                duration_secs: info.duration_secs,
                counts,
                known_limitations: KNOWN_LIMITATIONS.iter().map(|s| s.to_string()).collect(),
                issue_tally: info.issue_tally,
                issues: info.issues,
            },
            pages: pages.iter().map(PageRecord::from).collect(),
            vote_records,
            users,
            attributions,
            revisions,
            alternate_titles,
        }
    }

    /// Reassemble page summaries with their embedded collections.
    pub fn page_summaries(&self) -> Vec<PageSummary> {
        let mut revisions: HashMap<&str, Vec<Revision>> = HashMap::new();
        for r in &self.revisions {
            revisions.entry(r.page_url.as_str()).or_default().push(r.clone());
        }
        let mut attributions: HashMap<&str, Vec<Attribution>> = HashMap::new();
        for a in &self.attributions {
            attributions.entry(a.page_url.as_str()).or_default().push(a.clone());
        }
        let mut titles: HashMap<&str, Vec<AlternateTitle>> = HashMap::new();
        for t in &self.alternate_titles {
            titles.entry(t.page_url.as_str()).or_default().push(t.clone());
        }

        self.pages
            .iter()
            .map(|p| PageSummary {
                url: p.url.clone(),
                wikidot_id: p.wikidot_id.clone(),
                title: p.title.clone(),
                rating: p.rating,
                vote_count: p.vote_count,
                tags: p.tags.clone(),
                created_at: p.created_at,
                created_by: p.created_by.clone(),
                revision_count: p.revision_count,
                revisions: revisions.remove(p.url.as_str()).unwrap_or_default(),
                attributions: attributions.remove(p.url.as_str()).unwrap_or_default(),
                alternate_titles: titles.remove(p.url.as_str()).unwrap_or_default(),
            })
            .collect()
    }

    /// Vote records grouped by page, keeping file order (newest first).
    pub fn votes_by_page(&self) -> HashMap<String, Vec<VoteEvent>> {
        let mut by_page: HashMap<String, Vec<VoteEvent>> = HashMap::new();
        for vote in &self.vote_records {
            by_page
                .entry(vote.page_url.clone())
                .or_default()
                .push(vote.clone());
        }
        by_page
    }
}

/// Directory of snapshot files named `snapshot_<millis>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a new snapshot file and return its path.
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let io_err = |path: &Path, source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let body = serde_json::to_vec(snapshot).map_err(|source| SnapshotError::Json {
            path: self.dir.clone(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        tmp.write_all(&body).map_err(|e| io_err(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| io_err(&self.dir, e))?;

        // Runs finishing within the same millisecond get the next free name.
        let mut ms = snapshot.metadata.timestamp.timestamp_millis();
        loop {
            let path = self.dir.join(format!("{FILE_PREFIX}{ms:013}.json"));
            match tmp.persist_noclobber(&path) {
                Ok(_) => return Ok(path),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    ms += 1;
                }
                Err(e) => return Err(io_err(&path, e.error)),
            }
        }
    }

    /// Newest snapshot file, if any.
    pub fn latest_path(&self) -> Result<Option<PathBuf>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut newest: Option<(i64, PathBuf)> = None;
        for item in read_dir {
            let item = item.map_err(|source| SnapshotError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = item.path();
            let Some(ms) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(FILE_PREFIX))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<i64>().ok())
            else {
                continue;
            };
            if newest.as_ref().is_none_or(|(best, _)| ms > *best) {
                newest = Some((ms, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    /// Load the newest snapshot, if any.
    pub fn load_latest(&self) -> Result<Option<Snapshot>> {
        match self.latest_path()? {
            Some(path) => load(&path).map(Some),
            None => Ok(None),
        }
    }
}

/// Load a snapshot file.
pub fn load(path: &Path) -> Result<Snapshot> {
    let bytes = fs::read(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })
}
