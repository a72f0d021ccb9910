//! Append-only checkpoint streams.
//!
//! Each stream lives in its own directory. Every save writes a new file whose
//! name carries a millisecond timestamp; nothing is ever overwritten, and the
//! newest file is authoritative. After a save, files beyond the newest
//! [`DEFAULT_KEEP`] (or the configured count) are deleted. Payloads carry a `schema` tag and are
//! rejected with [`CheckpointError::UnsupportedSchema`] when it does not
//! match.
//!
//! Layout under the checkpoint root:
//!
//! ```text
//! pages/pages_<ts>_<processed>.json
//! votes/votes_<ts>.json
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{PageSummary, PageVoteSnapshot, VoteEvent};
use crate::sync::VoteProgress;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid checkpoint {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported checkpoint schema {found:?} in {} (expected {expected})", path.display())]
    UnsupportedSchema {
        path: PathBuf,
        found: String,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpoint files kept per stream by default.
pub const DEFAULT_KEEP: usize = 3;

/// The two independent progress streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointStream {
    Pages,
    Votes,
}

impl CheckpointStream {
    /// Directory name and file prefix.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Votes => "votes",
        }
    }
}

impl fmt::Display for CheckpointStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A payload that can be stored in a checkpoint stream.
pub trait Checkpoint: Serialize + DeserializeOwned {
    const STREAM: CheckpointStream;
    const SCHEMA: &'static str;

    /// Extra file-name component after the timestamp.
    fn file_key(&self) -> Option<String> {
        None
    }
}

/// Page-listing progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCheckpoint {
    /// Identifies the run that produced this checkpoint.
    pub run_started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub base_url: String,
    pub pages_processed: usize,
    pub next_cursor: Option<String>,
    pub listing_complete: bool,
    pub pages: Vec<PageSummary>,
}

impl Checkpoint for PageCheckpoint {
    const STREAM: CheckpointStream = CheckpointStream::Pages;
    const SCHEMA: &'static str = "page-checkpoint/v1";

    fn file_key(&self) -> Option<String> {
        Some(self.pages_processed.to_string())
    }
}

/// Vote-phase progress together with the votes collected so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCheckpoint {
    pub run_started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub progress: VoteProgress,
    pub votes: Vec<VoteEvent>,
    #[serde(default)]
    pub history_updates: BTreeMap<String, PageVoteSnapshot>,
}

impl Checkpoint for VoteCheckpoint {
    const STREAM: CheckpointStream = CheckpointStream::Votes;
    const SCHEMA: &'static str = "vote-checkpoint/v1";
}

/// A checkpoint file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub timestamp_ms: i64,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    schema: &'static str,
    #[serde(flatten)]
    payload: &'a T,
}

/// Reads and writes checkpoint streams under a root directory.
#[derive(Debug)]
pub struct CheckpointStore {
    root: PathBuf,
    keep: usize,
    last_ts: AtomicI64,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep: DEFAULT_KEEP,
            last_ts: AtomicI64::new(0),
        }
    }

    /// Keep at most `keep` files per stream (at least one).
    #[must_use]
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    pub fn stream_dir(&self, stream: CheckpointStream) -> PathBuf {
        self.root.join(stream.name())
    }

    /// Write a new checkpoint artifact and return its path.
    pub fn save<C: Checkpoint>(&self, checkpoint: &C) -> Result<PathBuf> {
        let dir = self.stream_dir(C::STREAM);
        fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            path: dir.clone(),
            source,
        })?;

        let ts = self.next_timestamp();
        let name = match checkpoint.file_key() {
            Some(key) => format!("{}_{ts:013}_{key}.json", C::STREAM.name()),
            None => format!("{}_{ts:013}.json", C::STREAM.name()),
        };
        let path = dir.join(name);

        let body = serde_json::to_vec(&Envelope {
            schema: C::SCHEMA,
            payload: checkpoint,
        })
        .map_err(|source| CheckpointError::Json {
            path: path.clone(),
            source,
        })?;

        write_new_file(&dir, &path, &body)?;
        tracing::debug!(stream = %C::STREAM, path = %path.display(), bytes = body.len(), "Checkpoint saved");
        self.prune(C::STREAM)?;
        Ok(path)
    }

    /// Delete all but the newest `keep` files of a stream.
    ///
    /// A file that cannot be removed is left for the next save to retry.
    pub fn prune(&self, stream: CheckpointStream) -> Result<usize> {
        let mut removed = 0;
        for entry in self.list(stream)?.into_iter().skip(self.keep) {
            match fs::remove_file(&entry.path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path.display(), error = %e, "Could not remove old checkpoint");
                }
            }
        }
        if removed > 0 {
            tracing::debug!(stream = %stream, removed, "Pruned superseded checkpoints");
        }
        Ok(removed)
    }

    /// Load the newest checkpoint of a stream, if any.
    pub fn load_latest<C: Checkpoint>(&self) -> Result<Option<C>> {
        let Some(entry) = self.list(C::STREAM)?.into_iter().next() else {
            return Ok(None);
        };
        self.load(&entry.path).map(Some)
    }

    /// Load one checkpoint file, checking its schema tag.
    pub fn load<C: Checkpoint>(&self, path: &Path) -> Result<C> {
        let bytes = fs::read(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let found = value.get("schema").and_then(|s| s.as_str()).unwrap_or("");
        if found != C::SCHEMA {
            return Err(CheckpointError::UnsupportedSchema {
                path: path.to_path_buf(),
                found: found.to_string(),
                expected: C::SCHEMA,
            });
        }

        serde_json::from_value(value).map_err(|source| CheckpointError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// List a stream's artifacts, newest first. A missing directory is empty.
    pub fn list(&self, stream: CheckpointStream) -> Result<Vec<CheckpointEntry>> {
        let dir = self.stream_dir(stream);
        let read_dir = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(CheckpointError::Io { path: dir, source }),
        };

        let mut entries = Vec::new();
        for item in read_dir {
            let item = item.map_err(|source| CheckpointError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(timestamp_ms) = parse_timestamp(stream, name) {
                entries.push(CheckpointEntry { path, timestamp_ms });
            }
        }

        entries.sort_by(|a, b| {
            b.timestamp_ms
                .cmp(&a.timestamp_ms)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(entries)
    }

    /// Millisecond timestamp, strictly increasing within this store.
    fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_ts.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_ts
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

fn parse_timestamp(stream: CheckpointStream, file_name: &str) -> Option<i64> {
    let rest = file_name
        .strip_prefix(stream.name())?
        .strip_prefix('_')?
        .strip_suffix(".json")?;
    let ts = rest.split('_').next()?;
    ts.parse().ok()
}

/// Write `body` to a temp file in `dir` and move it to `path`, refusing to
/// replace an existing file.
fn write_new_file(dir: &Path, path: &Path, body: &[u8]) -> Result<()> {
    let io_err = |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(body).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist_noclobber(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{page, ts, vote};
    use crate::sync::PartialPage;
    use tempfile::TempDir;

    fn page_checkpoint(processed: usize, complete: bool) -> PageCheckpoint {
        PageCheckpoint {
            run_started_at: ts(0),
            created_at: ts(processed as i64),
            base_url: "http://wiki/".to_string(),
            pages_processed: processed,
            next_cursor: (!complete).then(|| format!("cursor-{processed}")),
            listing_complete: complete,
            pages: (0..processed)
                .map(|i| page(&format!("http://wiki/p{i}"), 1, 1))
                .collect(),
        }
    }

    #[test]
    fn missing_stream_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"));
        assert!(store.load_latest::<PageCheckpoint>().unwrap().is_none());
        assert!(store.list(CheckpointStream::Votes).unwrap().is_empty());
    }

    #[test]
    fn saves_never_overwrite_and_latest_wins() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());

        let first = store.save(&page_checkpoint(2, false)).unwrap();
        let second = store.save(&page_checkpoint(4, false)).unwrap();
        let third = store.save(&page_checkpoint(5, true)).unwrap();
        assert_ne!(first, second);
        assert!(third.file_name().unwrap().to_str().unwrap().ends_with("_5.json"));

        let entries = store.list(CheckpointStream::Pages).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].timestamp_ms > entries[1].timestamp_ms);
        assert_eq!(entries[0].path, third);

        let latest: PageCheckpoint = store.load_latest().unwrap().unwrap();
        assert_eq!(latest, page_checkpoint(5, true));
    }

    #[test]
    fn saving_prunes_beyond_retention() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).with_retention(2);
        let votes = VoteCheckpoint {
            run_started_at: ts(0),
            created_at: ts(1),
            progress: VoteProgress::default(),
            votes: Vec::new(),
            history_updates: BTreeMap::new(),
        };
        store.save(&votes).unwrap();

        let saved: Vec<PathBuf> = (1..=5)
            .map(|n| store.save(&page_checkpoint(n, n == 5)).unwrap())
            .collect();

        let entries = store.list(CheckpointStream::Pages).unwrap();
        let kept: Vec<&PathBuf> = entries.iter().map(|e| &e.path).collect();
        assert_eq!(kept, [&saved[4], &saved[3]]);
        assert!(!saved[0].exists());
        assert_eq!(store.list(CheckpointStream::Votes).unwrap().len(), 1);

        let latest: PageCheckpoint = store.load_latest().unwrap().unwrap();
        assert!(latest.listing_complete);
    }

    #[test]
    fn zero_retention_still_keeps_the_latest() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).with_retention(0);
        store.save(&page_checkpoint(1, false)).unwrap();
        let last = store.save(&page_checkpoint(2, false)).unwrap();

        let entries = store.list(CheckpointStream::Pages).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, last);
    }

    #[test]
    fn vote_progress_round_trips_through_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut progress = VoteProgress::default();
        progress.mark_completed("http://wiki/a");
        progress.mark_completed("http://wiki/b");
        progress.mark_partial(
            "http://wiki/c",
            PartialPage {
                cursor: Some("after-200".to_string()),
                votes_collected_so_far: 200,
            },
        );
        progress.total_votes_expected = 1_000;
        progress.total_votes_collected = 400;

        let checkpoint = VoteCheckpoint {
            run_started_at: ts(0),
            created_at: ts(60),
            progress: progress.clone(),
            votes: vec![vote("http://wiki/a", "1", 5, 1)],
            history_updates: BTreeMap::new(),
        };
        store.save(&checkpoint).unwrap();

        let restored: VoteCheckpoint = store.load_latest().unwrap().unwrap();
        assert_eq!(restored.progress.completed_pages, progress.completed_pages);
        assert_eq!(restored.progress.partial_pages, progress.partial_pages);
        assert_eq!(restored.votes.len(), 1);
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let stream_dir = store.stream_dir(CheckpointStream::Votes);
        fs::create_dir_all(&stream_dir).unwrap();
        fs::write(
            stream_dir.join("votes_9999999999999.json"),
            br#"{"schema":"vote-checkpoint/v9","progress":{}}"#,
        )
        .unwrap();

        let err = store.load_latest::<VoteCheckpoint>().unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::UnsupportedSchema { ref found, .. } if found == "vote-checkpoint/v9"
        ));
    }

    #[test]
    fn stray_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&page_checkpoint(1, false)).unwrap();
        let stream_dir = store.stream_dir(CheckpointStream::Pages);
        fs::write(stream_dir.join("notes.txt"), b"hello").unwrap();
        fs::write(stream_dir.join(".tmpabc"), b"partial").unwrap();

        assert_eq!(store.list(CheckpointStream::Pages).unwrap().len(), 1);
    }

    #[test]
    fn parse_timestamp_reads_prefix_and_key() {
        assert_eq!(
            parse_timestamp(CheckpointStream::Pages, "pages_0001700000000000_500.json"),
            Some(1_700_000_000_000)
        );
        assert_eq!(
            parse_timestamp(CheckpointStream::Votes, "votes_0001700000000001.json"),
            Some(1_700_000_000_001)
        );
        assert_eq!(parse_timestamp(CheckpointStream::Votes, "pages_1.json"), None);
    }
}
