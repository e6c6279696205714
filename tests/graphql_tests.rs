//! GraphQL issue listing and deletion against a mock server.

use github_importer::{GitHubClient, GitHubErrorKind};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::builder()
        .base_url(server.uri())
        .token("test-token")
        .delete_delay(Duration::ZERO)
        .build()
        .unwrap()
}

fn nodes_page(numbers: &[u64], next: Option<&str>) -> serde_json::Value {
    let nodes: Vec<_> = numbers
        .iter()
        .map(|n| json!({"id": format!("I_{}", n), "number": n, "title": format!("Issue {}", n)}))
        .collect();
    json!({
        "data": {
            "repository": {
                "issues": {
                    "nodes": nodes,
                    "pageInfo": {"hasNextPage": next.is_some(), "endCursor": next}
                }
            }
        }
    })
}

async fn mount_delete(server: &MockServer, node_id: &str, response: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("mutation DeleteIssue"))
        .and(body_string_contains(format!("\"issueId\":\"{}\"", node_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(response))
        .expect(1)
        .mount(server)
        .await;
}

fn deleted() -> serde_json::Value {
    json!({"data": {"deleteIssue": {"clientMutationId": null}}})
}

#[tokio::test]
async fn test_bulk_delete_pages_then_deletes_and_continues_after_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query IssueNodes"))
        .and(body_string_contains("\"after\":null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes_page(&[1, 2], Some("c1"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query IssueNodes"))
        .and(body_string_contains("\"after\":\"c1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes_page(&[3], None)))
        .expect(1)
        .mount(&server)
        .await;

    mount_delete(&server, "I_1", deleted()).await;
    mount_delete(
        &server,
        "I_2",
        json!({
            "data": {"deleteIssue": null},
            "errors": [{"type": "FORBIDDEN", "message": "Viewer does not have permission"}]
        }),
    )
    .await;
    mount_delete(&server, "I_3", deleted()).await;

    let report = client(&server)
        .graphql()
        .bulk_delete_issues("octo", "demo")
        .await
        .unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(report.found, 3);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item, "octo/demo#2");
    assert_eq!(report.failures[0].kind, GitHubErrorKind::QueryError);
}

#[tokio::test]
async fn test_missing_repository_is_query_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"repository": null}})))
        .mount(&server)
        .await;

    let err = client(&server)
        .graphql()
        .list_issue_nodes("octo", "missing", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), GitHubErrorKind::QueryError);
    assert_eq!(err.context().unwrap().target, "octo/missing");
}

#[tokio::test]
async fn test_graphql_rate_limited_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded for user"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .graphql()
        .delete_issue("I_1")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), GitHubErrorKind::RateLimitExceeded);
}

#[tokio::test]
async fn test_delete_issue_by_number_resolves_node_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query IssueId"))
        .and(body_string_contains("\"number\":42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"repository": {"issue": {"id": "I_42"}}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_delete(&server, "I_42", deleted()).await;

    client(&server)
        .graphql()
        .delete_issue_by_number("octo", "demo", 42)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_issue_number() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"repository": {"issue": null}},
            "errors": [{"type": "NOT_FOUND", "message": "Could not resolve to an Issue with the number of 9."}]
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .graphql()
        .issue_node_id("octo", "demo", 9)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), GitHubErrorKind::QueryError);
    assert!(err.message().contains("NOT_FOUND"));
}
