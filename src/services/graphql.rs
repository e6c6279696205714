//! GraphQL operations. Issues can only be deleted through GraphQL.

use super::GitHubApi;
use crate::client::GitHubClient;
use crate::engine::{CancellationFlag, ItemFailure};
use crate::errors::{item_target, repo_target, GitHubError, GitHubErrorKind, GitHubResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const ISSUE_NODES_QUERY: &str = r#"
query IssueNodes($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    issues(first: $first, after: $after, states: [OPEN, CLOSED]) {
      nodes { id number title }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

const ISSUE_ID_QUERY: &str = r#"
query IssueId($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    issue(number: $number) { id }
  }
}"#;

const DELETE_ISSUE_MUTATION: &str = r#"
mutation DeleteIssue($issueId: ID!) {
  deleteIssue(input: {issueId: $issueId}) { clientMutationId }
}"#;

/// GraphQL client for GitHub's GraphQL API.
pub struct GraphQLService<'a> {
    client: &'a GitHubClient,
}

impl<'a> GraphQLService<'a> {
    /// Creates a new GraphQL service.
    pub fn new(client: &'a GitHubClient) -> Self {
        Self { client }
    }

    /// Executes a query and returns its `data`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> GitHubResult<T> {
        self.execute(query, variables).await
    }

    /// Executes a mutation and returns its `data`.
    pub async fn mutation<T: DeserializeOwned>(
        &self,
        mutation: &str,
        variables: Option<serde_json::Value>,
    ) -> GitHubResult<T> {
        self.execute(mutation, variables).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> GitHubResult<T> {
        let request = GraphQLRequest {
            query: query.to_string(),
            variables,
        };

        let url = self.client.config().graphql_url();
        let raw = self
            .client
            .post::<GraphQLRawResponse, _>(&url, &request)
            .await?;
        parse_graphql_response(raw)
    }

    /// Fetches one page of issue node ids (open and closed).
    pub async fn list_issue_nodes(
        &self,
        owner: &str,
        repo: &str,
        after: Option<String>,
    ) -> GitHubResult<IssueNodePage> {
        let pagination = GraphQLPagination {
            first: self.client.config().bulk.page_size,
            after,
        };
        let mut variables = pagination.to_variables();
        variables["owner"] = json!(owner);
        variables["name"] = json!(repo);

        let data: RepositoryData<IssuesConnection> = self
            .query(ISSUE_NODES_QUERY, Some(variables))
            .await
            .map_err(|e| e.with_context("list_issue_nodes", repo_target(owner, repo)))?;

        let repository = data.repository.ok_or_else(|| {
            GitHubError::new(GitHubErrorKind::QueryError, "Repository not found")
                .with_context("list_issue_nodes", repo_target(owner, repo))
        })?;

        Ok(IssueNodePage {
            nodes: repository.issues.nodes.into_iter().flatten().collect(),
            page_info: repository.issues.page_info,
        })
    }

    /// Resolves an issue number to its node id.
    pub async fn issue_node_id(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<String> {
        let variables = json!({ "owner": owner, "name": repo, "number": number });
        let target = item_target(owner, repo, number);

        let data: RepositoryData<IssueIdData> = self
            .query(ISSUE_ID_QUERY, Some(variables))
            .await
            .map_err(|e| e.with_context("issue_node_id", target.clone()))?;

        data.repository
            .and_then(|r| r.issue)
            .map(|issue| issue.id)
            .ok_or_else(|| {
                GitHubError::new(GitHubErrorKind::QueryError, "Issue not found")
                    .with_context("issue_node_id", target)
            })
    }

    /// Deletes an issue by node id.
    pub async fn delete_issue(&self, node_id: &str) -> GitHubResult<()> {
        let variables = json!({ "issueId": node_id });
        self.mutation::<serde_json::Value>(DELETE_ISSUE_MUTATION, Some(variables))
            .await
            .map(|_| ())
            .map_err(|e| e.with_context("delete_issue", node_id))
    }

    /// Deletes an issue by number.
    pub async fn delete_issue_by_number(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<()> {
        let node_id = self.issue_node_id(owner, repo, number).await?;
        self.delete_issue(&node_id)
            .await
            .map_err(|e| e.with_context("delete_issue", item_target(owner, repo, number)))
    }

    /// Deletes every issue in the repository using this client's delete delay.
    pub async fn bulk_delete_issues(&self, owner: &str, repo: &str) -> GitHubResult<BulkDeleteReport> {
        let options = BulkDeleteOptions {
            delay: self.client.config().bulk.delete_delay,
        };
        bulk_delete_issues(
            self.client,
            owner,
            repo,
            &options,
            &CancellationFlag::new(),
            |_, _| {},
        )
        .await
    }
}

fn parse_graphql_response<T: DeserializeOwned>(raw: GraphQLRawResponse) -> GitHubResult<T> {
    if let Some(errors) = raw.errors.filter(|e| !e.is_empty()) {
        if let Some(limited) = errors
            .iter()
            .find(|e| e.error_type.as_deref() == Some("RATE_LIMITED"))
        {
            return Err(GitHubError::new(
                GitHubErrorKind::RateLimitExceeded,
                format!("GraphQL rate limit exceeded: {}", limited.message),
            ));
        }

        let message = errors
            .iter()
            .map(|e| match &e.error_type {
                Some(kind) => format!("{}: {}", kind, e.message),
                None => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(GitHubError::new(GitHubErrorKind::QueryError, message));
    }

    let data = raw.data.ok_or_else(|| {
        GitHubError::new(GitHubErrorKind::QueryError, "GraphQL response contains no data")
    })?;
    serde_json::from_value(data).map_err(|e| {
        GitHubError::deserialization(format!("Failed to deserialize GraphQL data: {}", e))
    })
}

/// Options for [`bulk_delete_issues`].
#[derive(Debug, Clone)]
pub struct BulkDeleteOptions {
    /// Pause between consecutive deletions.
    pub delay: Duration,
}

/// Outcome of a bulk deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDeleteReport {
    /// GraphQL list pages fetched.
    pub pages: u32,
    /// Issues found.
    pub found: usize,
    /// Issues deleted.
    pub deleted: usize,
    /// Per-issue failures.
    pub failures: Vec<ItemFailure>,
}

/// Deletes every issue in a repository.
///
/// All pages are listed first, then issues are deleted one at a time with
/// `options.delay` between deletions. A failed deletion is recorded and the
/// batch continues; `AuthenticationExpired` and cancellation stop it. A
/// failure while listing stops it before anything is deleted.
pub async fn bulk_delete_issues<A, F>(
    api: &A,
    owner: &str,
    repo: &str,
    options: &BulkDeleteOptions,
    cancel: &CancellationFlag,
    on_result: F,
) -> GitHubResult<BulkDeleteReport>
where
    A: GitHubApi + ?Sized,
    F: FnMut(&IssueNode, Option<&GitHubError>) + Send,
{
    let (nodes, pages) = collect_issue_nodes(api, owner, repo, cancel).await?;
    let mut report = delete_issue_nodes(api, owner, repo, &nodes, options, cancel, on_result).await?;
    report.pages = pages;
    Ok(report)
}

/// Lists every issue node, following cursors while `hasNextPage`.
///
/// Returns the nodes and the number of pages fetched.
pub async fn collect_issue_nodes<A>(
    api: &A,
    owner: &str,
    repo: &str,
    cancel: &CancellationFlag,
) -> GitHubResult<(Vec<IssueNode>, u32)>
where
    A: GitHubApi + ?Sized,
{
    let mut nodes = Vec::new();
    let mut pages = 0;
    let mut after = None;

    loop {
        cancel.check()?;
        let page = api.list_issue_nodes(owner, repo, after.take()).await?;
        pages += 1;
        nodes.extend(page.nodes);

        match (page.page_info.has_next_page, page.page_info.end_cursor) {
            (true, Some(cursor)) => after = Some(cursor),
            _ => break,
        }
    }

    tracing::debug!(owner, repo, issues = nodes.len(), pages, "Collected issue nodes");
    Ok((nodes, pages))
}

/// Deletes the given issues one by one, best effort.
pub async fn delete_issue_nodes<A, F>(
    api: &A,
    owner: &str,
    repo: &str,
    nodes: &[IssueNode],
    options: &BulkDeleteOptions,
    cancel: &CancellationFlag,
    mut on_result: F,
) -> GitHubResult<BulkDeleteReport>
where
    A: GitHubApi + ?Sized,
    F: FnMut(&IssueNode, Option<&GitHubError>) + Send,
{
    let mut report = BulkDeleteReport {
        found: nodes.len(),
        ..Default::default()
    };
    tracing::info!(owner, repo, issues = report.found, "Deleting issues");

    for (index, node) in nodes.iter().enumerate() {
        cancel.check()?;
        if index > 0 && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }

        match api.delete_issue(&node.id).await {
            Ok(()) => {
                report.deleted += 1;
                tracing::debug!(owner, repo, number = node.number, "Issue deleted");
                on_result(node, None);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(owner, repo, number = node.number, error = %e, "Failed to delete issue");
                on_result(node, Some(&e));
                report.failures.push(ItemFailure::new(
                    "delete_issue",
                    item_target(owner, repo, node.number),
                    &e,
                ));
            }
        }
    }

    Ok(report)
}

/// GraphQL request payload.
#[derive(Debug, Clone, Serialize)]
struct GraphQLRequest {
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<serde_json::Value>,
}

/// Raw GraphQL response from GitHub.
#[derive(Debug, Clone, Deserialize)]
struct GraphQLRawResponse {
    data: Option<serde_json::Value>,
    errors: Option<Vec<GraphQLError>>,
}

/// GraphQL error item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Error message.
    pub message: String,
    /// Error type (e.g., "RATE_LIMITED", "NOT_FOUND").
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

/// Forward cursor pagination variables.
#[derive(Debug, Clone)]
pub struct GraphQLPagination {
    /// Number of items per page.
    pub first: u32,
    /// Cursor for fetching items after this point.
    pub after: Option<String>,
}

impl GraphQLPagination {
    /// Converts pagination to JSON value for GraphQL variables.
    pub fn to_variables(&self) -> serde_json::Value {
        json!({ "first": self.first, "after": self.after })
    }
}

/// Common PageInfo type for GraphQL pagination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Whether there are more items when paginating forward.
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
    /// Cursor for the last item in this page.
    #[serde(rename = "endCursor", default)]
    pub end_cursor: Option<String>,
}

/// Issue identity as returned by GraphQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueNode {
    /// Node id.
    pub id: String,
    /// Issue number.
    pub number: u64,
    /// Issue title.
    #[serde(default)]
    pub title: Option<String>,
}

/// One page of issue nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueNodePage {
    /// Issues in this page.
    pub nodes: Vec<IssueNode>,
    /// Cursor state.
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct RepositoryData<T> {
    repository: Option<T>,
}

#[derive(Debug, Deserialize)]
struct IssuesConnection {
    issues: IssueConnectionBody,
}

#[derive(Debug, Deserialize)]
struct IssueConnectionBody {
    #[serde(default)]
    nodes: Vec<Option<IssueNode>>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct IssueIdData {
    issue: Option<IssueId>,
}

#[derive(Debug, Deserialize)]
struct IssueId {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockGitHubApi;
    use mockall::{predicate::*, Sequence};
    use pretty_assertions::assert_eq;

    fn node(number: u64) -> IssueNode {
        IssueNode {
            id: format!("I_{}", number),
            number,
            title: None,
        }
    }

    fn page(numbers: &[u64], next: Option<&str>) -> IssueNodePage {
        IssueNodePage {
            nodes: numbers.iter().copied().map(node).collect(),
            page_info: PageInfo {
                has_next_page: next.is_some(),
                end_cursor: next.map(String::from),
            },
        }
    }

    fn options() -> BulkDeleteOptions {
        BulkDeleteOptions {
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_pagination_variables() {
        let vars = GraphQLPagination {
            first: 100,
            after: Some("cursor123".to_string()),
        }
        .to_variables();

        assert_eq!(vars["first"], 100);
        assert_eq!(vars["after"], "cursor123");
    }

    #[test]
    fn test_rate_limited_error() {
        let raw: GraphQLRawResponse = serde_json::from_value(json!({
            "data": null,
            "errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded"}]
        }))
        .unwrap();

        let err = parse_graphql_response::<serde_json::Value>(raw).unwrap_err();
        assert_eq!(err.kind(), GitHubErrorKind::RateLimitExceeded);
    }

    #[test]
    fn test_errors_with_partial_data_fail() {
        let raw: GraphQLRawResponse = serde_json::from_value(json!({
            "data": {"deleteIssue": null},
            "errors": [{"type": "NOT_FOUND", "message": "Could not resolve to a node"}]
        }))
        .unwrap();

        let err = parse_graphql_response::<serde_json::Value>(raw).unwrap_err();
        assert_eq!(err.kind(), GitHubErrorKind::QueryError);
        assert!(err.message().contains("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_bulk_delete_lists_every_page_then_deletes() {
        let mut api = MockGitHubApi::new();
        let mut seq = Sequence::new();

        api.expect_list_issue_nodes()
            .with(eq("octo"), eq("demo"), eq(None::<String>))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(page(&[1, 2], Some("c1"))));
        api.expect_list_issue_nodes()
            .with(eq("octo"), eq("demo"), eq(Some("c1".to_string())))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(page(&[3], None)));
        for number in 1..=3u64 {
            api.expect_delete_issue()
                .with(eq(format!("I_{}", number)))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let mut seen = Vec::new();
        let report = bulk_delete_issues(
            &api,
            "octo",
            "demo",
            &options(),
            &CancellationFlag::new(),
            |node, err| seen.push((node.number, err.is_some())),
        )
        .await
        .unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.found, 3);
        assert_eq!(report.deleted, 3);
        assert!(report.failures.is_empty());
        assert_eq!(seen, vec![(1, false), (2, false), (3, false)]);
    }

    #[tokio::test]
    async fn test_bulk_delete_continues_after_failure() {
        let mut api = MockGitHubApi::new();
        api.expect_list_issue_nodes()
            .times(1)
            .returning(|_, _, _| Ok(page(&[1, 2, 3], None)));
        api.expect_delete_issue()
            .times(3)
            .returning(|id| {
                if id == "I_2" {
                    Err(GitHubError::new(GitHubErrorKind::QueryError, "forbidden"))
                } else {
                    Ok(())
                }
            });

        let report = bulk_delete_issues(
            &api,
            "octo",
            "demo",
            &options(),
            &CancellationFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, "octo/demo#2");
    }

    #[tokio::test]
    async fn test_bulk_delete_stops_on_expired_auth() {
        let mut api = MockGitHubApi::new();
        api.expect_list_issue_nodes()
            .times(1)
            .returning(|_, _, _| Ok(page(&[1, 2, 3], None)));
        api.expect_delete_issue()
            .times(1)
            .returning(|_| Err(GitHubError::authentication_expired("refresh failed")));

        let err = bulk_delete_issues(
            &api,
            "octo",
            "demo",
            &options(),
            &CancellationFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), GitHubErrorKind::AuthenticationExpired);
    }

    #[tokio::test]
    async fn test_bulk_delete_listing_failure_deletes_nothing() {
        let mut api = MockGitHubApi::new();
        api.expect_list_issue_nodes()
            .times(1)
            .returning(|_, _, _| Ok(page(&[1], Some("c1"))));
        api.expect_list_issue_nodes()
            .times(1)
            .returning(|_, _, _| Err(GitHubError::transport("connection reset")));
        api.expect_delete_issue().never();

        let err = bulk_delete_issues(
            &api,
            "octo",
            "demo",
            &options(),
            &CancellationFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), GitHubErrorKind::TransportError);
    }

    #[tokio::test]
    async fn test_bulk_delete_honors_cancellation() {
        let mut api = MockGitHubApi::new();
        api.expect_list_issue_nodes().never();
        api.expect_delete_issue().never();

        let cancel = CancellationFlag::new();
        cancel.cancel();

        let err = bulk_delete_issues(&api, "octo", "demo", &options(), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), GitHubErrorKind::Cancelled);
    }
}
