//! Wikisnap - incremental snapshots of a wiki's pages and vote history.
//!
//! This library crawls a GraphQL index of a wiki in two phases (the page
//! listing, then each page's votes) under a rolling point budget, saves
//! resumable checkpoints along the way, and writes one consolidated snapshot
//! per completed run.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wikisnap::api::{CromClient, DEFAULT_ENDPOINT};
//! use wikisnap::http::reqwest_transport::ReqwestTransport;
//! use wikisnap::sync::{SyncEngine, SyncMode, SyncOptions};
//!
//! let transport = ReqwestTransport::with_timeout(Duration::from_secs(30), "wikisnap")?;
//! let client = CromClient::new(transport, DEFAULT_ENDPOINT);
//! let engine = SyncEngine::new(client, SyncOptions::default());
//!
//! let report = engine.run(SyncMode::Full, None).await?;
//! println!("{} pages, {} votes", report.pages_total, report.votes_collected);
//! ```

pub mod api;
pub mod checkpoint;
pub mod consolidate;
pub mod history;
pub mod http;
pub mod model;
pub mod rate_limit;
pub mod retry;
pub mod snapshot;
pub mod sync;

pub use api::{ApiError, CromClient, WikiApi};
pub use model::{DerivedUser, PageSummary, PageVoteSnapshot, UserRole, VoteEvent};
pub use rate_limit::{PointBudgetLimiter, RateLimitConfig};
pub use retry::{ErrorPolicy, ErrorPolicyConfig, RetryConfig};
pub use snapshot::{Snapshot, SnapshotStore};
pub use sync::{SyncEngine, SyncError, SyncMode, SyncOptions, SyncReport, SyncStatus};
