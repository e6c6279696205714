//! GitHub resource operations.
//!
//! The [`GitHubApi`] trait is the seam between the bulk engine and the
//! network; [`GitHubClient`] implements it through the resilient executor.

mod graphql;
mod issues;
mod repositories;
mod users;

pub use graphql::*;
pub use issues::*;
pub use repositories::*;
pub use users::*;

use crate::client::GitHubClient;
use crate::errors::GitHubResult;
use crate::types::{Comment, Issue, Milestone, Repository, StateFilter};
use async_trait::async_trait;

/// Resource operations the bulk engine drives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Lists repositories of the authenticated user.
    async fn list_repositories(&self) -> GitHubResult<Vec<Repository>>;

    /// Lists milestones, all pages.
    async fn list_milestones(
        &self,
        owner: &str,
        repo: &str,
        state: StateFilter,
    ) -> GitHubResult<Vec<Milestone>>;

    /// Creates a milestone.
    async fn create_milestone(
        &self,
        owner: &str,
        repo: &str,
        request: &CreateMilestoneRequest,
    ) -> GitHubResult<Milestone>;

    /// Deletes a milestone by number.
    async fn delete_milestone(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<()>;

    /// Creates an issue.
    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        request: &CreateIssueRequest,
    ) -> GitHubResult<Issue>;

    /// Lists issues, all pages. Pull requests are included as GitHub returns them.
    async fn list_issues(
        &self,
        owner: &str,
        repo: &str,
        params: &ListIssuesParams,
    ) -> GitHubResult<Vec<Issue>>;

    /// Lists comments on an issue, all pages.
    async fn list_comments(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<Vec<Comment>>;

    /// Adds a comment to an issue.
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> GitHubResult<Comment>;

    /// Adds labels to an issue.
    async fn add_labels(&self, owner: &str, repo: &str, number: u64, labels: &[String]) -> GitHubResult<()>;

    /// Adds assignees to an issue.
    async fn add_assignees(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        assignees: &[String],
    ) -> GitHubResult<()>;

    /// Fetches one GraphQL page of issue node ids.
    async fn list_issue_nodes(
        &self,
        owner: &str,
        repo: &str,
        after: Option<String>,
    ) -> GitHubResult<IssueNodePage>;

    /// Deletes an issue by GraphQL node id.
    async fn delete_issue(&self, node_id: &str) -> GitHubResult<()>;
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn list_repositories(&self) -> GitHubResult<Vec<Repository>> {
        self.repositories().list_for_authenticated_user().await
    }

    async fn list_milestones(
        &self,
        owner: &str,
        repo: &str,
        state: StateFilter,
    ) -> GitHubResult<Vec<Milestone>> {
        self.issues().list_milestones(owner, repo, state).await
    }

    async fn create_milestone(
        &self,
        owner: &str,
        repo: &str,
        request: &CreateMilestoneRequest,
    ) -> GitHubResult<Milestone> {
        self.issues().create_milestone(owner, repo, request).await
    }

    async fn delete_milestone(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<()> {
        self.issues().delete_milestone(owner, repo, number).await
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        request: &CreateIssueRequest,
    ) -> GitHubResult<Issue> {
        self.issues().create(owner, repo, request).await
    }

    async fn list_issues(
        &self,
        owner: &str,
        repo: &str,
        params: &ListIssuesParams,
    ) -> GitHubResult<Vec<Issue>> {
        self.issues().list(owner, repo, params).await
    }

    async fn list_comments(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<Vec<Comment>> {
        self.issues().list_comments(owner, repo, number).await
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> GitHubResult<Comment> {
        self.issues().create_comment(owner, repo, number, body).await
    }

    async fn add_labels(&self, owner: &str, repo: &str, number: u64, labels: &[String]) -> GitHubResult<()> {
        self.issues().add_labels(owner, repo, number, labels).await
    }

    async fn add_assignees(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        assignees: &[String],
    ) -> GitHubResult<()> {
        self.issues().add_assignees(owner, repo, number, assignees).await
    }

    async fn list_issue_nodes(
        &self,
        owner: &str,
        repo: &str,
        after: Option<String>,
    ) -> GitHubResult<IssueNodePage> {
        self.graphql().list_issue_nodes(owner, repo, after).await
    }

    async fn delete_issue(&self, node_id: &str) -> GitHubResult<()> {
        self.graphql().delete_issue(node_id).await
    }
}
