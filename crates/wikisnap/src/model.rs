//! Domain entities shared by the crawler, the checkpoint streams and the
//! snapshot output.
//!
//! All types serialize in camelCase because the snapshot file is consumed by
//! downstream collaborators that expect that shape.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reference to a wiki user as embedded in page metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub wikidot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// One revision of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub page_url: String,
    pub wikidot_id: String,
    pub revision_number: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Credit for a page (author, translator, rewrite, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribution {
    pub page_url: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub order: u32,
}

/// An alternate title shown for a page (e.g. series listings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternateTitle {
    pub page_url: String,
    pub title: String,
}

/// Page metadata as returned by one page-listing pass.
///
/// Immutable once built; a later pass produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
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
    #[serde(default)]
    pub revisions: Vec<Revision>,
    #[serde(default)]
    pub attributions: Vec<Attribution>,
    #[serde(default)]
    pub alternate_titles: Vec<AlternateTitle>,
}

impl PageSummary {
    /// Whether this page has any vote history worth collecting.
    #[inline]
    #[must_use]
    pub fn needs_vote_data(&self) -> bool {
        self.vote_count > 0
    }

    /// Whether the listing returned any content beyond the bare summary.
    #[inline]
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.revisions.is_empty() || !self.attributions.is_empty()
    }
}

/// Logical identity of a vote: unique within a collected set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoteKey {
    pub page_url: String,
    pub voter_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A single vote event from the (fuzzy) vote history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEvent {
    pub page_url: String,
    pub voter_id: String,
    pub timestamp: DateTime<Utc>,
    /// One of -1, 0 or +1.
    pub direction: i8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voter_display_name: Option<String>,
}

impl VoteEvent {
    #[must_use]
    pub fn key(&self) -> VoteKey {
        VoteKey {
            page_url: self.page_url.clone(),
            voter_id: self.voter_id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// What a prior run knew about a page's votes.
///
/// Upstream vote history is eventually consistent, so this records what was
/// observed at `last_updated`, not a ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVoteSnapshot {
    pub vote_count: u32,
    pub rating: i64,
    /// Voter of the newest vote at snapshot time.
    #[serde(default)]
    pub first_vote_id: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Author,
    Voter,
    Contributor,
}

/// A user aggregated from pages, votes and attributions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedUser {
    pub wikidot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub roles: BTreeSet<UserRole>,
    pub pages_created: u32,
    pub total_votes_given: u32,
    pub total_votes_received: u32,
}

impl DerivedUser {
    #[must_use]
    pub fn new(wikidot_id: impl Into<String>) -> Self {
        Self {
            wikidot_id: wikidot_id.into(),
            display_name: None,
            roles: BTreeSet::new(),
            pages_created: 0,
            total_votes_given: 0,
            total_votes_received: 0,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn needs_vote_data_follows_vote_count() {
        assert!(!page("http://wiki/a", 0, 0).needs_vote_data());
        assert!(page("http://wiki/a", -3, 5).needs_vote_data());
    }

    #[test]
    fn vote_key_ignores_direction_and_display_name() {
        let a = vote("http://wiki/a", "7", 10, 1);
        let mut b = a.clone();
        b.direction = -1;
        b.voter_display_name = None;
        assert_eq!(a.key(), b.key());

        let c = vote("http://wiki/a", "7", 11, 1);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn page_summary_serializes_camel_case() {
        let json = serde_json::to_value(page("http://wiki/a", 4, 2)).unwrap();
        assert_eq!(json["voteCount"], 2);
        assert_eq!(json["wikidotId"], "id-http://wiki/a");
        assert!(json.get("alternateTitles").is_some());
    }

    #[test]
    fn user_roles_serialize_lowercase() {
        let mut user = DerivedUser::new("42");
        user.roles.insert(UserRole::Contributor);
        user.roles.insert(UserRole::Author);
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["roles"], serde_json::json!(["author", "contributor"]));
    }
}
