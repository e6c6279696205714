//! GitHub resource types used by the importer.
//!
//! Only the fields the importer reads are modelled; optional fields default so
//! payloads from GitHub Enterprise versions without them still parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GitHub user (minimal representation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: u64,
    /// Username (login).
    pub login: String,
    /// User type (User, Organization, Bot).
    #[serde(rename = "type", default)]
    pub user_type: Option<String>,
    /// Profile URL.
    #[serde(default)]
    pub html_url: Option<String>,
}

/// GitHub repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository ID.
    pub id: u64,
    /// Repository name.
    pub name: String,
    /// Full name (owner/repo).
    pub full_name: String,
    /// Owner information.
    pub owner: User,
    /// Whether the repository is private.
    #[serde(default)]
    pub private: bool,
    /// Repository description.
    #[serde(default)]
    pub description: Option<String>,
    /// HTML URL.
    #[serde(default)]
    pub html_url: Option<String>,
    /// Open issue count.
    #[serde(default)]
    pub open_issues_count: u32,
    /// Whether issues are enabled.
    #[serde(default = "default_true")]
    pub has_issues: bool,
}

fn default_true() -> bool {
    true
}

/// GitHub milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Milestone ID.
    pub id: u64,
    /// Milestone number.
    pub number: u64,
    /// Milestone title.
    pub title: String,
    /// Milestone description.
    #[serde(default)]
    pub description: Option<String>,
    /// Milestone state.
    pub state: MilestoneState,
    /// Open issue count.
    #[serde(default)]
    pub open_issues: u32,
    /// Closed issue count.
    #[serde(default)]
    pub closed_issues: u32,
    /// Due date.
    #[serde(default)]
    pub due_on: Option<DateTime<Utc>>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Milestone state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneState {
    /// Open milestone.
    #[default]
    Open,
    /// Closed milestone.
    Closed,
}

/// Milestone filter for list requests.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    /// Open only.
    Open,
    /// Closed only.
    Closed,
    /// Both open and closed.
    #[default]
    All,
}

/// GitHub issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue ID.
    pub id: u64,
    /// GraphQL node ID.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Issue number.
    pub number: u64,
    /// Issue title.
    pub title: String,
    /// Issue body.
    #[serde(default)]
    pub body: Option<String>,
    /// Issue state.
    pub state: IssueState,
    /// Issue author.
    #[serde(default)]
    pub user: Option<User>,
    /// Labels.
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Assignees.
    #[serde(default)]
    pub assignees: Vec<User>,
    /// Milestone.
    #[serde(default)]
    pub milestone: Option<Milestone>,
    /// Comment count.
    #[serde(default)]
    pub comments: u32,
    /// Present when the issue is a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Close time.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Returns true if the issues endpoint returned a pull request.
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

/// Issue state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    /// Open issue.
    #[default]
    Open,
    /// Closed issue.
    Closed,
}

/// GitHub label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Label ID.
    #[serde(default)]
    pub id: Option<u64>,
    /// Label name.
    pub name: String,
    /// Label color (hex).
    #[serde(default)]
    pub color: Option<String>,
    /// Label description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Issue comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment ID.
    pub id: u64,
    /// Comment body.
    #[serde(default)]
    pub body: String,
    /// Comment author.
    #[serde(default)]
    pub user: Option<User>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_minimal_payload() {
        let issue: Issue = serde_json::from_value(json!({
            "id": 1,
            "number": 7,
            "title": "Fix it",
            "state": "closed",
            "labels": [{"name": "bug"}],
            "comments": 2
        }))
        .unwrap();

        assert_eq!(issue.number, 7);
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.labels[0].name, "bug");
        assert!(!issue.is_pull_request());
    }

    #[test]
    fn test_pull_request_detection() {
        let issue: Issue = serde_json::from_value(json!({
            "id": 2,
            "number": 8,
            "title": "Add feature",
            "state": "open",
            "pull_request": {"url": "https://api.github.com/repos/o/r/pulls/8"}
        }))
        .unwrap();

        assert!(issue.is_pull_request());
    }

    #[test]
    fn test_milestone_due_on() {
        let milestone: Milestone = serde_json::from_value(json!({
            "id": 3,
            "number": 1,
            "title": "v1.0",
            "state": "open",
            "due_on": "2024-03-01T08:00:00Z"
        }))
        .unwrap();

        assert_eq!(
            milestone.due_on.unwrap().to_rfc3339(),
            "2024-03-01T08:00:00+00:00"
        );
    }

    #[test]
    fn test_state_filter_serialization() {
        assert_eq!(serde_json::to_string(&StateFilter::All).unwrap(), "\"all\"");
    }
}
