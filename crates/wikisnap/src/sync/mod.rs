//! Crawl orchestration: page listing, vote collection, checkpoints.
//!
//! # Module Structure
//!
//! - [`types`] - Core types: `SyncOptions`, `SyncReport`, `CrawlIssue`, constants
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`engine`] - The two-phase sync engine: `SyncEngine::run()`
//!
//! Change detection ([`ChangeDetector`]) and vote collection
//! ([`VoteCollector`]) are usable on their own with a [`RequestGate`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use wikisnap::api::CromClient;
//! use wikisnap::sync::{SyncEngine, SyncMode, SyncOptions, SyncProgress};
//!
//! let shutdown = Arc::new(AtomicBool::new(false));
//! let engine = SyncEngine::new(client, SyncOptions::default()).with_shutdown(shutdown);
//! let callback: wikisnap::sync::ProgressCallback = Box::new(|event| {
//!     if let SyncProgress::PagesComplete { total } = event {
//!         println!("{total} pages listed");
//!     }
//! });
//! let report = engine.run(SyncMode::Resume, Some(&callback)).await?;
//! ```

mod change;
pub mod engine;
mod error;
mod gate;
mod progress;
mod state;
mod types;
mod votes;

pub use engine::SyncEngine;
pub use error::SyncError;
pub use gate::RequestGate;

// Re-export types
pub use types::{
    CrawlIssue, IssueKind, IssueTally, SyncMode, SyncOptions, SyncReport, SyncStatus,
};

// Re-export constants
pub use types::{
    DEFAULT_BASE_URL, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CHECKPOINTS_KEPT,
    DEFAULT_PAGE_BATCH_SIZE, DEFAULT_VOTE_BATCH_SIZE, DEFAULT_VOTE_RETENTION_DAYS,
};

// Re-export progress types
pub use progress::{ProgressCallback, SyncProgress, VotePageOutcome, emit};

// Re-export working state
pub use state::{PartialPage, VoteProgress, WorkingSet};

pub use change::{ChangeDecision, ChangeDetector, ChangeReason};
pub use votes::{CollectRequest, VoteCollection, VoteCollector};
