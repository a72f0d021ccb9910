//! Wire types for the GraphQL endpoint and their conversion into domain
//! entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AlternateTitle, Attribution, PageSummary, Revision, UserRef, VoteEvent};

use super::error::{ApiError, Result};

#[derive(Debug, Serialize)]
pub(crate) struct GraphQlRequest<'a, V> {
    pub query: &'a str,
    pub variables: V,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse<D> {
    pub data: Option<D>,
    #[serde(default)]
    pub errors: Vec<GraphQlErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlErrorBody {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<GraphQlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
}

impl GraphQlErrorBody {
    pub fn is_rate_limit(&self) -> bool {
        let by_code = self
            .extensions
            .as_ref()
            .and_then(|e| e.code.as_deref())
            .is_some_and(|c| c.eq_ignore_ascii_case("RATE_LIMITED"));
        by_code || self.message.to_ascii_lowercase().contains("rate limit")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Connection<N> {
    pub edges: Vec<Edge<N>>,
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Edge<N> {
    pub node: N,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

// ---------- page listing ----------

#[derive(Debug, Deserialize)]
pub(crate) struct PagesData {
    pub pages: Connection<PageNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageNode {
    pub url: String,
    pub wikidot_info: Option<WikidotInfo>,
    #[serde(default)]
    pub attributions: Vec<AttributionNode>,
    #[serde(default)]
    pub alternate_titles: Vec<AlternateTitleNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WikidotInfo {
    pub wikidot_id: Option<String>,
    pub title: Option<String>,
    pub rating: Option<i64>,
    pub vote_count: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserNode>,
    pub revision_count: Option<u32>,
    #[serde(default)]
    pub revisions: Vec<RevisionNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserNode {
    pub wikidot_id: Option<String>,
    pub display_name: Option<String>,
}

impl UserNode {
    fn into_ref(self) -> Option<UserRef> {
        let display_name = self.display_name;
        self.wikidot_id.map(|wikidot_id| UserRef {
            wikidot_id,
            display_name,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RevisionNode {
    pub wikidot_id: String,
    pub revision_number: u32,
    pub timestamp: DateTime<Utc>,
    pub user: Option<UserNode>,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttributionNode {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: Option<UserNode>,
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AlternateTitleNode {
    pub title: String,
}

impl PageNode {
    /// Convert into a [`PageSummary`].
    ///
    /// Pages without wikidot metadata are kept with zeroed counters so the
    /// listing stays complete.
    pub fn into_summary(self) -> PageSummary {
        let url = self.url;
        let info = self.wikidot_info;

        let attributions = self
            .attributions
            .into_iter()
            .map(|a| Attribution {
                page_url: url.clone(),
                kind: a.kind,
                user: a.user.and_then(UserNode::into_ref),
                date: a.date,
                order: a.order,
            })
            .collect();

        let alternate_titles = self
            .alternate_titles
            .into_iter()
            .map(|t| AlternateTitle {
                page_url: url.clone(),
                title: t.title,
            })
            .collect();

        match info {
            Some(info) => {
                let revisions: Vec<Revision> = info
                    .revisions
                    .into_iter()
                    .map(|r| Revision {
                        page_url: url.clone(),
                        wikidot_id: r.wikidot_id,
                        revision_number: r.revision_number,
                        timestamp: r.timestamp,
                        user: r.user.and_then(UserNode::into_ref),
                        comment: r.comment,
                    })
                    .collect();
                let revision_count = info
                    .revision_count
                    .unwrap_or_else(|| u32::try_from(revisions.len()).unwrap_or(u32::MAX));

                PageSummary {
                    url,
                    wikidot_id: info.wikidot_id,
                    title: info.title,
                    rating: info.rating.unwrap_or(0),
                    vote_count: info.vote_count.unwrap_or(0),
                    tags: info.tags,
                    created_at: info.created_at,
                    created_by: info.created_by.and_then(UserNode::into_ref),
                    revision_count,
                    revisions,
                    attributions,
                    alternate_titles,
                }
            }
            None => PageSummary {
                url,
                wikidot_id: None,
                title: None,
                rating: 0,
                vote_count: 0,
                tags: Vec::new(),
                created_at: None,
                created_by: None,
                revision_count: 0,
                revisions: Vec::new(),
                attributions,
                alternate_titles,
            },
        }
    }
}

// ---------- vote history ----------

#[derive(Debug, Deserialize)]
pub(crate) struct VotesData {
    pub page: Option<VotePage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VotePage {
    pub wikidot_info: Option<VoteInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VoteInfo {
    pub fuzzy_vote_records: Connection<VoteNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VoteNode {
    pub user_wikidot_id: String,
    pub direction: i8,
    pub timestamp: DateTime<Utc>,
    pub user: Option<UserNode>,
}

impl VoteNode {
    pub fn into_event(self, page_url: &str) -> Result<VoteEvent> {
        if !(-1..=1).contains(&self.direction) {
            return Err(ApiError::InvalidData(format!(
                "vote direction {} on {} by {}",
                self.direction, page_url, self.user_wikidot_id
            )));
        }
        Ok(VoteEvent {
            page_url: page_url.to_string(),
            voter_id: self.user_wikidot_id,
            timestamp: self.timestamp,
            direction: self.direction,
            voter_display_name: self.user.and_then(|u| u.display_name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_without_wikidot_info_keeps_url_and_attributions() {
        let node: PageNode = serde_json::from_value(serde_json::json!({
            "url": "http://wiki/orphan",
            "wikidotInfo": null,
            "attributions": [{"type": "AUTHOR", "user": {"wikidotId": "9", "displayName": "Nine"}, "order": 0}],
            "alternateTitles": []
        }))
        .unwrap();

        let page = node.into_summary();
        assert_eq!(page.url, "http://wiki/orphan");
        assert_eq!(page.vote_count, 0);
        assert_eq!(page.attributions.len(), 1);
        assert_eq!(page.attributions[0].page_url, "http://wiki/orphan");
        assert_eq!(page.attributions[0].user.as_ref().unwrap().wikidot_id, "9");
    }

    #[test]
    fn user_without_id_is_dropped() {
        let node = UserNode {
            wikidot_id: None,
            display_name: Some("ghost".to_string()),
        };
        assert!(node.into_ref().is_none());
    }

    #[test]
    fn vote_direction_out_of_range_is_invalid() {
        let node = VoteNode {
            user_wikidot_id: "3".to_string(),
            direction: 2,
            timestamp: Utc::now(),
            user: None,
        };
        let err = node.into_event("http://wiki/a").unwrap_err();
        assert!(matches!(err, ApiError::InvalidData(_)));
    }

    #[test]
    fn graphql_rate_limit_detected_by_code_or_message() {
        let by_code: GraphQlErrorBody = serde_json::from_value(serde_json::json!({
            "message": "Too many points",
            "extensions": {"code": "RATE_LIMITED"}
        }))
        .unwrap();
        assert!(by_code.is_rate_limit());

        let by_message: GraphQlErrorBody =
            serde_json::from_value(serde_json::json!({"message": "Rate limit exceeded"})).unwrap();
        assert!(by_message.is_rate_limit());

        let other: GraphQlErrorBody =
            serde_json::from_value(serde_json::json!({"message": "Syntax error"})).unwrap();
        assert!(!other.is_rate_limit());
    }
}
