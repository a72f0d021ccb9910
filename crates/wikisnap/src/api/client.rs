//! GraphQL client for the upstream wiki index.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::http::{HttpRequest, HttpTransport};
use crate::model::{PageSummary, VoteEvent};

use super::error::{ApiError, Result};
use super::types::{GraphQlRequest, GraphQlResponse, PagesData, VotesData};
use super::{Batch, WikiApi};

/// Default public endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://apiv2.crom.avn.sh/graphql";

/// Maximum number of body bytes kept in an HTTP error message.
const ERROR_BODY_PREVIEW: usize = 200;

const PAGES_QUERY: &str = r#"
query Pages($filter: String!, $first: Int!, $after: ID) {
  pages(filter: { url: { startsWith: $filter } }, sort: { key: CREATED_AT, order: ASC }, first: $first, after: $after) {
    edges {
      node {
        url
        wikidotInfo {
          wikidotId
          title
          rating
          voteCount
          tags
          createdAt
          createdBy { ... on WikidotUser { wikidotId displayName } }
          revisionCount
          revisions { wikidotId revisionNumber timestamp comment user { ... on WikidotUser { wikidotId displayName } } }
        }
        attributions { type date order user { ... on WikidotUser { wikidotId displayName } } }
        alternateTitles { title }
      }
    }
    pageInfo { hasNextPage endCursor }
  }
}
"#;

const VOTES_QUERY: &str = r#"
query Votes($url: URL!, $first: Int!, $after: ID) {
  page(url: $url) {
    wikidotInfo {
      fuzzyVoteRecords(first: $first, after: $after) {
        edges {
          node {
            userWikidotId
            direction
            timestamp
            user { ... on WikidotUser { displayName } }
          }
        }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}
"#;

#[derive(Debug, Serialize)]
struct PagesVariables<'a> {
    filter: &'a str,
    first: u32,
    after: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct VotesVariables<'a> {
    url: &'a str,
    first: u32,
    after: Option<&'a str>,
}

/// Client for the GraphQL query endpoint.
///
/// Stateless across calls; pagination state is owned by the caller.
pub struct CromClient<T> {
    transport: T,
    endpoint: String,
}

impl<T: HttpTransport> CromClient<T> {
    pub fn new(transport: T, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute<V: Serialize, D: DeserializeOwned>(&self, query: &str, variables: V) -> Result<D> {
        let body = serde_json::to_vec(&GraphQlRequest { query, variables })?;
        let response = self
            .transport
            .send(HttpRequest::post_json(&self.endpoint, body))
            .await?;

        if response.status == 429 {
            return Err(ApiError::RateLimited {
                retry_after: response.retry_after(),
            });
        }

        if !response.is_success() {
            let text = String::from_utf8_lossy(&response.body);
            return Err(ApiError::Http {
                status: response.status,
                message: text.chars().take(ERROR_BODY_PREVIEW).collect(),
            });
        }

        let parsed: GraphQlResponse<D> = serde_json::from_slice(&response.body)?;

        if !parsed.errors.is_empty() {
            if parsed.errors.iter().any(|e| e.is_rate_limit()) {
                return Err(ApiError::RateLimited {
                    retry_after: response.retry_after(),
                });
            }
            let messages: Vec<&str> = parsed.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(ApiError::GraphQl(messages.join("; ")));
        }

        parsed
            .data
            .ok_or_else(|| ApiError::GraphQl("response contained no data".to_string()))
    }
}

#[async_trait::async_trait]
impl<T: HttpTransport> WikiApi for CromClient<T> {
    async fn fetch_pages(
        &self,
        base_url: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Batch<PageSummary>> {
        let data: PagesData = self
            .execute(
                PAGES_QUERY,
                PagesVariables {
                    filter: base_url,
                    first,
                    after: cursor,
                },
            )
            .await?;

        let connection = data.pages;
        Ok(Batch {
            items: connection
                .edges
                .into_iter()
                .map(|edge| edge.node.into_summary())
                .collect(),
            next_cursor: connection.page_info.end_cursor,
            has_more: connection.page_info.has_next_page,
            rejected: Vec::new(),
        })
    }

    async fn fetch_votes(
        &self,
        page_url: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<Batch<VoteEvent>> {
        let data: VotesData = self
            .execute(
                VOTES_QUERY,
                VotesVariables {
                    url: page_url,
                    first,
                    after: cursor,
                },
            )
            .await?;

        // A page that vanished upstream has no votes to collect.
        let Some(connection) = data
            .page
            .and_then(|p| p.wikidot_info)
            .map(|info| info.fuzzy_vote_records)
        else {
            tracing::debug!(url = %page_url, "Page has no vote history upstream");
            return Ok(Batch::last(Vec::new()));
        };

        // A malformed vote is dropped on its own; the rest of the batch and
        // the cursor are still good.
        let mut items = Vec::with_capacity(connection.edges.len());
        let mut rejected = Vec::new();
        for edge in connection.edges {
            match edge.node.into_event(page_url) {
                Ok(vote) => items.push(vote),
                Err(e) => {
                    tracing::warn!(url = %page_url, error = %e, "Dropping invalid vote");
                    rejected.push(e.to_string());
                }
            }
        }

        Ok(Batch {
            items,
            next_cursor: connection.page_info.end_cursor,
            has_more: connection.page_info.has_next_page,
            rejected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockTransport};
    use serde_json::json;

    const URL: &str = "https://api.test/graphql";

    fn client(transport: &MockTransport) -> CromClient<MockTransport> {
        CromClient::new(transport.clone(), URL)
    }

    #[tokio::test]
    async fn fetch_pages_decodes_listing_and_sends_variables() {
        let transport = MockTransport::new();
        transport.push_json(
            URL,
            200,
            json!({
                "data": {
                    "pages": {
                        "edges": [{
                            "node": {
                                "url": "http://wiki/scp-173",
                                "wikidotInfo": {
                                    "wikidotId": "1956234",
                                    "title": "SCP-173",
                                    "rating": 5000,
                                    "voteCount": 5400,
                                    "tags": ["euclid", "scp"],
                                    "createdAt": "2008-07-25T20:49:00Z",
                                    "createdBy": {"wikidotId": "4", "displayName": "Moto42"},
                                    "revisionCount": 2,
                                    "revisions": [{
                                        "wikidotId": "r1",
                                        "revisionNumber": 0,
                                        "timestamp": "2008-07-25T20:49:00Z",
                                        "comment": null,
                                        "user": {"wikidotId": "4", "displayName": "Moto42"}
                                    }]
                                },
                                "attributions": [],
                                "alternateTitles": [{"title": "The Sculpture"}]
                            }
                        }],
                        "pageInfo": {"hasNextPage": true, "endCursor": "c-1"}
                    }
                }
            }),
        );

        let batch = client(&transport)
            .fetch_pages("http://wiki/", Some("c-0"), 25)
            .await
            .expect("listing should decode");

        assert!(batch.has_more);
        assert_eq!(batch.next_cursor.as_deref(), Some("c-1"));
        let page = &batch.items[0];
        assert_eq!(page.vote_count, 5400);
        assert_eq!(page.revision_count, 2);
        assert_eq!(page.revisions.len(), 1);
        assert_eq!(page.created_by.as_ref().unwrap().wikidot_id, "4");
        assert_eq!(page.alternate_titles[0].title, "The Sculpture");

        let sent: serde_json::Value =
            serde_json::from_slice(&transport.requests()[0].body).unwrap();
        assert_eq!(sent["variables"]["filter"], "http://wiki/");
        assert_eq!(sent["variables"]["first"], 25);
        assert_eq!(sent["variables"]["after"], "c-0");
    }

    #[tokio::test]
    async fn fetch_votes_decodes_newest_first_batch() {
        let transport = MockTransport::new();
        transport.push_json(
            URL,
            200,
            json!({
                "data": {
                    "page": {
                        "wikidotInfo": {
                            "fuzzyVoteRecords": {
                                "edges": [
                                    {"node": {"userWikidotId": "10", "direction": 1, "timestamp": "2024-05-02T00:00:00Z", "user": {"displayName": "Ten"}}},
                                    {"node": {"userWikidotId": "9", "direction": -1, "timestamp": "2024-05-01T00:00:00Z", "user": null}}
                                ],
                                "pageInfo": {"hasNextPage": false, "endCursor": null}
                            }
                        }
                    }
                }
            }),
        );

        let batch = client(&transport)
            .fetch_votes("http://wiki/a", None, 2)
            .await
            .unwrap();

        assert!(!batch.continues());
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[0].voter_id, "10");
        assert_eq!(batch.items[0].voter_display_name.as_deref(), Some("Ten"));
        assert_eq!(batch.items[1].direction, -1);
        assert_eq!(batch.items[1].page_url, "http://wiki/a");
    }

    #[tokio::test]
    async fn invalid_vote_is_dropped_and_reported() {
        let transport = MockTransport::new();
        transport.push_json(
            URL,
            200,
            json!({
                "data": {
                    "page": {
                        "wikidotInfo": {
                            "fuzzyVoteRecords": {
                                "edges": [
                                    {"node": {"userWikidotId": "10", "direction": 1, "timestamp": "2024-05-03T00:00:00Z", "user": null}},
                                    {"node": {"userWikidotId": "9", "direction": 7, "timestamp": "2024-05-02T00:00:00Z", "user": null}},
                                    {"node": {"userWikidotId": "8", "direction": -1, "timestamp": "2024-05-01T00:00:00Z", "user": null}}
                                ],
                                "pageInfo": {"hasNextPage": true, "endCursor": "c-3"}
                            }
                        }
                    }
                }
            }),
        );

        let batch = client(&transport)
            .fetch_votes("http://wiki/a", None, 3)
            .await
            .unwrap();

        let voters: Vec<&str> = batch.items.iter().map(|v| v.voter_id.as_str()).collect();
        assert_eq!(voters, ["10", "8"]);
        assert_eq!(batch.rejected.len(), 1);
        assert!(batch.rejected[0].contains("direction 7"));
        assert_eq!(batch.next_cursor.as_deref(), Some("c-3"));
    }

    #[tokio::test]
    async fn fetch_votes_for_missing_page_is_empty() {
        let transport = MockTransport::new();
        transport.push_json(URL, 200, json!({"data": {"page": null}}));

        let batch = client(&transport)
            .fetch_votes("http://wiki/gone", None, 10)
            .await
            .unwrap();
        assert!(batch.items.is_empty());
        assert!(!batch.has_more);
    }

    #[tokio::test]
    async fn status_429_maps_to_rate_limited_with_retry_after() {
        let transport = MockTransport::new();
        transport.push_response(
            URL,
            HttpResponse {
                status: 429,
                headers: vec![("Retry-After".to_string(), "42".to_string())],
                body: Vec::new(),
            },
        );

        let err = client(&transport)
            .fetch_votes("http://wiki/a", None, 10)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(42)));
    }

    #[tokio::test]
    async fn graphql_rate_limit_error_is_classified() {
        let transport = MockTransport::new();
        transport.push_json(
            URL,
            200,
            json!({"data": null, "errors": [{"message": "Rate limit exceeded, try later"}]}),
        );

        let err = client(&transport)
            .fetch_pages("http://wiki/", None, 10)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn other_failures_are_not_rate_limits() {
        let transport = MockTransport::new();
        transport.push_json(URL, 502, json!({"error": "upstream down"}));
        transport.push_json(URL, 200, json!({"errors": [{"message": "Cannot query field"}]}));
        transport.push_failure(URL, "connection reset");
        let client = client(&transport);

        let http = client.fetch_pages("http://wiki/", None, 10).await.unwrap_err();
        assert!(matches!(http, ApiError::Http { status: 502, .. }));

        let gql = client.fetch_pages("http://wiki/", None, 10).await.unwrap_err();
        assert!(matches!(gql, ApiError::GraphQl(ref m) if m == "Cannot query field"));

        let transport_err = client.fetch_pages("http://wiki/", None, 10).await.unwrap_err();
        assert!(matches!(transport_err, ApiError::Transport(_)));
        assert!(!transport_err.is_rate_limited());
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let transport = MockTransport::new();
        transport.push_response(
            URL,
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"<html>oops</html>".to_vec(),
            },
        );

        let err = client(&transport)
            .fetch_pages("http://wiki/", None, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
