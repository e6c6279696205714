//! Issue, milestone, comment, label and assignee operations.

use crate::client::GitHubClient;
use crate::errors::{item_target, repo_target, GitHubResult};
use crate::types::{Comment, Issue, Milestone, MilestoneState, StateFilter};
use serde::{Deserialize, Serialize};

/// Service for issue operations.
pub struct IssuesService<'a> {
    client: &'a GitHubClient,
}

impl<'a> IssuesService<'a> {
    /// Creates a new issues service.
    pub fn new(client: &'a GitHubClient) -> Self {
        Self { client }
    }

    fn page_size(&self) -> u32 {
        self.client.config().bulk.page_size
    }

    // Milestones

    /// Lists milestones in a repository, following every page.
    pub async fn list_milestones(
        &self,
        owner: &str,
        repo: &str,
        state: StateFilter,
    ) -> GitHubResult<Vec<Milestone>> {
        let params = ListMilestonesParams {
            state,
            per_page: Some(self.page_size()),
        };
        self.client
            .get_all(&format!("/repos/{}/{}/milestones", owner, repo), &params)
            .await
            .map_err(|e| e.with_context("list_milestones", repo_target(owner, repo)))
    }

    /// Creates a milestone.
    pub async fn create_milestone(
        &self,
        owner: &str,
        repo: &str,
        request: &CreateMilestoneRequest,
    ) -> GitHubResult<Milestone> {
        self.client
            .post(&format!("/repos/{}/{}/milestones", owner, repo), request)
            .await
            .map_err(|e| {
                e.with_context(
                    "create_milestone",
                    format!("{} \"{}\"", repo_target(owner, repo), request.title),
                )
            })
    }

    /// Deletes a milestone.
    pub async fn delete_milestone(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<()> {
        self.client
            .delete(&format!("/repos/{}/{}/milestones/{}", owner, repo, number))
            .await
            .map_err(|e| e.with_context("delete_milestone", item_target(owner, repo, number)))
    }

    // Issues

    /// Lists issues with parameters, following every page.
    pub async fn list(
        &self,
        owner: &str,
        repo: &str,
        params: &ListIssuesParams,
    ) -> GitHubResult<Vec<Issue>> {
        let mut params = params.clone();
        params.per_page.get_or_insert(self.page_size());
        self.client
            .get_all(&format!("/repos/{}/{}/issues", owner, repo), &params)
            .await
            .map_err(|e| e.with_context("list_issues", repo_target(owner, repo)))
    }

    /// Creates an issue.
    pub async fn create(
        &self,
        owner: &str,
        repo: &str,
        request: &CreateIssueRequest,
    ) -> GitHubResult<Issue> {
        self.client
            .post(&format!("/repos/{}/{}/issues", owner, repo), request)
            .await
            .map_err(|e| {
                e.with_context(
                    "create_issue",
                    format!("{} \"{}\"", repo_target(owner, repo), request.title),
                )
            })
    }

    // Comments

    /// Lists comments on an issue, following every page.
    pub async fn list_comments(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> GitHubResult<Vec<Comment>> {
        let params = [("per_page", self.page_size())];
        self.client
            .get_all(
                &format!("/repos/{}/{}/issues/{}/comments", owner, repo, issue_number),
                &params,
            )
            .await
            .map_err(|e| e.with_context("list_comments", item_target(owner, repo, issue_number)))
    }

    /// Creates a comment.
    pub async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> GitHubResult<Comment> {
        let request = CreateCommentRequest {
            body: body.to_string(),
        };
        self.client
            .post(
                &format!("/repos/{}/{}/issues/{}/comments", owner, repo, issue_number),
                &request,
            )
            .await
            .map_err(|e| e.with_context("create_comment", item_target(owner, repo, issue_number)))
    }

    // Labels and assignees

    /// Adds labels to an issue. Unknown labels are created by GitHub.
    pub async fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        labels: &[String],
    ) -> GitHubResult<()> {
        let request = AddLabelsRequest {
            labels: labels.to_vec(),
        };
        self.client
            .post_no_response(
                &format!("/repos/{}/{}/issues/{}/labels", owner, repo, issue_number),
                &request,
            )
            .await
            .map_err(|e| e.with_context("add_labels", item_target(owner, repo, issue_number)))
    }

    /// Adds assignees to an issue.
    pub async fn add_assignees(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        assignees: &[String],
    ) -> GitHubResult<()> {
        let request = AddAssigneesRequest {
            assignees: assignees.to_vec(),
        };
        self.client
            .post_no_response(
                &format!("/repos/{}/{}/issues/{}/assignees", owner, repo, issue_number),
                &request,
            )
            .await
            .map_err(|e| e.with_context("add_assignees", item_target(owner, repo, issue_number)))
    }
}

/// Parameters for listing milestones.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListMilestonesParams {
    /// State filter.
    pub state: StateFilter,
    /// Items per page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

/// Parameters for listing issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListIssuesParams {
    /// Milestone number, `*` for any or `none`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
    /// State filter.
    pub state: StateFilter,
    /// Items per page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

impl ListIssuesParams {
    /// Open and closed issues of one milestone.
    pub fn for_milestone(number: u64) -> Self {
        Self {
            milestone: Some(number.to_string()),
            state: StateFilter::All,
            per_page: None,
        }
    }
}

/// Request to create a milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMilestoneRequest {
    /// Milestone title.
    pub title: String,
    /// Milestone state.
    pub state: MilestoneState,
    /// Milestone description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Due date (ISO 8601).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_on: Option<String>,
}

/// Request to create an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIssueRequest {
    /// Issue title.
    pub title: String,
    /// Issue body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Milestone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
}

/// Request to create a comment.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCommentRequest {
    /// Comment body.
    pub body: String,
}

/// Request to add labels.
#[derive(Debug, Clone, Serialize)]
pub struct AddLabelsRequest {
    /// Label names.
    pub labels: Vec<String>,
}

/// Request to add assignees.
#[derive(Debug, Clone, Serialize)]
pub struct AddAssigneesRequest {
    /// Assignee logins.
    pub assignees: Vec<String>,
}
