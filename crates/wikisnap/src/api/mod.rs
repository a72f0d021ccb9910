//! Upstream query API.
//!
//! [`WikiApi`] is the paged-fetch contract the engine is written against:
//! given a cursor and a page size it returns one decoded batch plus the
//! continuation. All continuation state lives in the caller.
//!
//! [`CromClient`] implements it over a GraphQL endpoint.

mod client;
mod error;
mod types;

use async_trait::async_trait;

use crate::model::{PageSummary, VoteEvent};

pub use client::{CromClient, DEFAULT_ENDPOINT};
pub use error::{ApiError, Result, short_error_message};

/// Estimated point cost of one page item (embedded revisions and
/// attributions make page items expensive).
pub const PAGE_ITEM_COST: u64 = 5;

/// One decoded batch of a cursor-paginated resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Items upstream returned that failed validation and were dropped.
    pub rejected: Vec<String>,
}

impl<T> Batch<T> {
    /// A final batch with no continuation.
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            has_more: false,
            rejected: Vec::new(),
        }
    }

    /// Whether the caller should request another batch.
    #[inline]
    #[must_use]
    pub fn continues(&self) -> bool {
        self.has_more && self.next_cursor.is_some()
    }
}

/// Paged access to the two upstream resources the crawler needs.
#[async_trait]
pub trait WikiApi: Send + Sync {
    /// List pages whose URL starts with `base_url`, in upstream cursor order.
    async fn fetch_pages(
        &self,
        base_url: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Batch<PageSummary>>;

    /// Fetch one page's vote history, newest vote first.
    async fn fetch_votes(
        &self,
        page_url: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Batch<VoteEvent>>;
}

/// Point cost of a page-listing query.
#[inline]
#[must_use]
pub fn page_query_cost(first: u32) -> u64 {
    1 + u64::from(first) * PAGE_ITEM_COST
}

/// Point cost of a vote-history query.
#[inline]
#[must_use]
pub fn vote_query_cost(first: u32) -> u64 {
    1 + u64::from(first)
}
