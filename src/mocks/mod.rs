//! Test doubles for the importer.
//!
//! [`FakeGitHub`] keeps milestones, issues and comments in memory and
//! implements [`GitHubApi`], so the bulk engine can be exercised end to end
//! without a network. Calls are recorded in order and failures can be
//! injected per operation.

use crate::errors::{item_target, repo_target, GitHubError, GitHubErrorKind, GitHubResult, RateLimitInfo};
use crate::services::{
    CreateIssueRequest, CreateMilestoneRequest, GitHubApi, IssueNode, IssueNodePage,
    ListIssuesParams, PageInfo,
};
use crate::types::*;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Operation name, e.g. `create_issue`.
    pub operation: String,
    /// `owner/repo`, `owner/repo#n` or a node id.
    pub target: String,
}

/// An injected failure.
#[derive(Debug, Clone)]
struct FailureRule {
    operation: String,
    /// Matches a title, an issue number or a node id. `None` matches all.
    key: Option<String>,
    kind: GitHubErrorKind,
    status: Option<u16>,
}

impl FailureRule {
    fn matches(&self, operation: &str, keys: &[&str]) -> bool {
        self.operation == operation
            && self
                .key
                .as_deref()
                .map_or(true, |key| keys.contains(&key))
    }

    fn error(&self) -> GitHubError {
        let error = GitHubError::new(self.kind, format!("Injected {} failure", self.operation));
        match self.status {
            Some(status) => error.with_status(status),
            None => error,
        }
    }
}

#[derive(Debug, Default)]
struct RepoState {
    milestones: Vec<Milestone>,
    issues: Vec<Issue>,
    comments: HashMap<u64, Vec<Comment>>,
    next_number: u64,
}

impl RepoState {
    fn next_number(&mut self) -> u64 {
        self.next_number += 1;
        self.next_number
    }
}

#[derive(Debug, Default)]
struct FakeState {
    repos: HashMap<String, RepoState>,
    calls: Vec<RecordedCall>,
    failures: Vec<FailureRule>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory GitHub.
#[derive(Debug, Clone)]
pub struct FakeGitHub {
    state: Arc<Mutex<FakeState>>,
    node_page_size: usize,
}

impl Default for FakeGitHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGitHub {
    /// Creates an empty fake.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            node_page_size: 100,
        }
    }

    /// Sets how many issue nodes one GraphQL page holds.
    pub fn with_node_page_size(mut self, size: usize) -> Self {
        self.node_page_size = size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes `operation` fail with `kind` when its title, number or node id
    /// equals `key` (every call when `key` is `None`).
    pub fn fail_on(&self, operation: &str, key: Option<&str>, kind: GitHubErrorKind) {
        self.lock().failures.push(FailureRule {
            operation: operation.to_string(),
            key: key.map(String::from),
            kind,
            status: (kind == GitHubErrorKind::ApiError).then_some(422),
        });
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// All calls in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of calls to `operation`.
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Milestones of a repository.
    pub fn milestones(&self, owner: &str, repo: &str) -> Vec<Milestone> {
        self.lock()
            .repos
            .get(&repo_key(owner, repo))
            .map(|r| r.milestones.clone())
            .unwrap_or_default()
    }

    /// Issues and pull requests of a repository.
    pub fn issues(&self, owner: &str, repo: &str) -> Vec<Issue> {
        self.lock()
            .repos
            .get(&repo_key(owner, repo))
            .map(|r| r.issues.clone())
            .unwrap_or_default()
    }

    /// Comments of an issue.
    pub fn comments(&self, owner: &str, repo: &str, number: u64) -> Vec<Comment> {
        self.lock()
            .repos
            .get(&repo_key(owner, repo))
            .and_then(|r| r.comments.get(&number).cloned())
            .unwrap_or_default()
    }

    /// Adds a pull request, which the issues endpoint also returns.
    pub fn add_pull_request(&self, owner: &str, repo: &str, milestone: Option<u64>, title: &str) -> u64 {
        let mut state = self.lock();
        let id = state.next_id();
        let repo_state = state.repos.entry(repo_key(owner, repo)).or_default();
        let number = repo_state.next_number();
        let mut pr = fixtures::issue(number, title);
        pr.id = id;
        pr.labels.clear();
        pr.milestone = milestone.and_then(|n| {
            repo_state.milestones.iter().find(|m| m.number == n).cloned()
        });
        pr.pull_request = Some(serde_json::json!({
            "url": format!("https://api.github.com/repos/{}/{}/pulls/{}", owner, repo, number)
        }));
        repo_state.issues.push(pr);
        number
    }

    /// Records the call and returns an injected failure, if any.
    fn enter(&self, operation: &str, target: String, keys: &[&str]) -> GitHubResult<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            operation: operation.to_string(),
            target,
        });
        let failure = state
            .failures
            .iter()
            .find(|f| f.matches(operation, keys))
            .map(FailureRule::error);
        match failure {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

fn repo_key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo).to_lowercase()
}

fn not_found(what: &str) -> GitHubError {
    GitHubError::api(404, format!("{} not found", what))
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn list_repositories(&self) -> GitHubResult<Vec<Repository>> {
        let state = self.enter("list_repositories", "/user/repos".to_string(), &[])?;
        let mut repos: Vec<Repository> = state
            .repos
            .keys()
            .filter_map(|key| key.split_once('/'))
            .map(|(owner, name)| fixtures::repository(owner, name))
            .collect();
        repos.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(repos)
    }

    async fn list_milestones(
        &self,
        owner: &str,
        repo: &str,
        state_filter: StateFilter,
    ) -> GitHubResult<Vec<Milestone>> {
        let state = self.enter("list_milestones", repo_target(owner, repo), &[])?;
        Ok(state
            .repos
            .get(&repo_key(owner, repo))
            .map(|r| {
                r.milestones
                    .iter()
                    .filter(|m| match state_filter {
                        StateFilter::All => true,
                        StateFilter::Open => m.state == MilestoneState::Open,
                        StateFilter::Closed => m.state == MilestoneState::Closed,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_milestone(
        &self,
        owner: &str,
        repo: &str,
        request: &CreateMilestoneRequest,
    ) -> GitHubResult<Milestone> {
        let mut state = self.enter(
            "create_milestone",
            repo_target(owner, repo),
            &[request.title.as_str()],
        )?;
        let id = state.next_id();
        let repo_state = state.repos.entry(repo_key(owner, repo)).or_default();
        if repo_state.milestones.iter().any(|m| m.title == request.title) {
            return Err(GitHubError::api(422, "Validation Failed: title already_exists"));
        }

        let number = repo_state.milestones.iter().map(|m| m.number).max().unwrap_or(0) + 1;
        let mut milestone = fixtures::milestone(number, &request.title);
        milestone.id = id;
        milestone.state = request.state;
        milestone.description = request.description.clone();
        milestone.due_on = request
            .due_on
            .as_deref()
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));
        repo_state.milestones.push(milestone.clone());
        Ok(milestone)
    }

    async fn delete_milestone(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<()> {
        let number_key = number.to_string();
        let mut state = self.enter(
            "delete_milestone",
            item_target(owner, repo, number),
            &[number_key.as_str()],
        )?;
        let repo_state = state
            .repos
            .get_mut(&repo_key(owner, repo))
            .ok_or_else(|| not_found("Repository"))?;
        let before = repo_state.milestones.len();
        repo_state.milestones.retain(|m| m.number != number);
        if repo_state.milestones.len() == before {
            return Err(not_found("Milestone"));
        }
        for issue in &mut repo_state.issues {
            if issue.milestone.as_ref().map(|m| m.number) == Some(number) {
                issue.milestone = None;
            }
        }
        Ok(())
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        request: &CreateIssueRequest,
    ) -> GitHubResult<Issue> {
        let mut state = self.enter(
            "create_issue",
            repo_target(owner, repo),
            &[request.title.as_str()],
        )?;
        let id = state.next_id();
        let repo_state = state.repos.entry(repo_key(owner, repo)).or_default();
        let milestone = match request.milestone {
            Some(n) => Some(
                repo_state
                    .milestones
                    .iter()
                    .find(|m| m.number == n)
                    .cloned()
                    .ok_or_else(|| GitHubError::api(422, "Validation Failed: invalid milestone"))?,
            ),
            None => None,
        };

        let number = repo_state.next_number();
        let mut issue = fixtures::issue(number, &request.title);
        issue.id = id;
        issue.body = request.body.clone();
        issue.labels.clear();
        issue.milestone = milestone;
        repo_state.issues.push(issue.clone());
        Ok(issue)
    }

    async fn list_issues(
        &self,
        owner: &str,
        repo: &str,
        params: &ListIssuesParams,
    ) -> GitHubResult<Vec<Issue>> {
        let milestone_key = params.milestone.clone().unwrap_or_default();
        let state = self.enter(
            "list_issues",
            repo_target(owner, repo),
            &[milestone_key.as_str()],
        )?;
        let Some(repo_state) = state.repos.get(&repo_key(owner, repo)) else {
            return Ok(Vec::new());
        };

        let mut issues: Vec<Issue> = repo_state
            .issues
            .iter()
            .filter(|i| match params.state {
                StateFilter::All => true,
                StateFilter::Open => i.state == IssueState::Open,
                StateFilter::Closed => i.state == IssueState::Closed,
            })
            .filter(|i| {
                let number = i.milestone.as_ref().map(|m| m.number);
                match params.milestone.as_deref() {
                    None | Some("*") => true,
                    Some("none") => number.is_none(),
                    Some(n) => number.map(|x| x.to_string()).as_deref() == Some(n),
                }
            })
            .cloned()
            .collect();
        // GitHub lists newest first.
        issues.sort_by(|a, b| b.number.cmp(&a.number));
        Ok(issues)
    }

    async fn list_comments(&self, owner: &str, repo: &str, number: u64) -> GitHubResult<Vec<Comment>> {
        let number_key = number.to_string();
        let state = self.enter(
            "list_comments",
            item_target(owner, repo, number),
            &[number_key.as_str()],
        )?;
        Ok(state
            .repos
            .get(&repo_key(owner, repo))
            .and_then(|r| r.comments.get(&number).cloned())
            .unwrap_or_default())
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> GitHubResult<Comment> {
        let number_key = number.to_string();
        let mut state = self.enter(
            "create_comment",
            item_target(owner, repo, number),
            &[number_key.as_str()],
        )?;
        let id = state.next_id();
        let repo_state = state
            .repos
            .get_mut(&repo_key(owner, repo))
            .ok_or_else(|| not_found("Repository"))?;
        let issue = repo_state
            .issues
            .iter_mut()
            .find(|i| i.number == number)
            .ok_or_else(|| not_found("Issue"))?;
        issue.comments += 1;

        let comment = fixtures::comment(id, body);
        repo_state
            .comments
            .entry(number)
            .or_default()
            .push(comment.clone());
        Ok(comment)
    }

    async fn add_labels(&self, owner: &str, repo: &str, number: u64, labels: &[String]) -> GitHubResult<()> {
        let number_key = number.to_string();
        let mut state = self.enter(
            "add_labels",
            item_target(owner, repo, number),
            &[number_key.as_str()],
        )?;
        let issue = state
            .repos
            .get_mut(&repo_key(owner, repo))
            .and_then(|r| r.issues.iter_mut().find(|i| i.number == number))
            .ok_or_else(|| not_found("Issue"))?;
        for name in labels {
            if !issue.labels.iter().any(|l| &l.name == name) {
                issue.labels.push(fixtures::label(name));
            }
        }
        Ok(())
    }

    async fn add_assignees(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        assignees: &[String],
    ) -> GitHubResult<()> {
        let number_key = number.to_string();
        let mut state = self.enter(
            "add_assignees",
            item_target(owner, repo, number),
            &[number_key.as_str()],
        )?;
        let issue = state
            .repos
            .get_mut(&repo_key(owner, repo))
            .and_then(|r| r.issues.iter_mut().find(|i| i.number == number))
            .ok_or_else(|| not_found("Issue"))?;
        for login in assignees {
            if !issue.assignees.iter().any(|u| &u.login == login) {
                issue.assignees.push(fixtures::user(login));
            }
        }
        Ok(())
    }

    async fn list_issue_nodes(
        &self,
        owner: &str,
        repo: &str,
        after: Option<String>,
    ) -> GitHubResult<IssueNodePage> {
        let state = self.enter("list_issue_nodes", repo_target(owner, repo), &[])?;
        let start = match after.as_deref() {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| GitHubError::new(GitHubErrorKind::QueryError, "Invalid cursor"))?,
            None => 0,
        };

        let issues: Vec<&Issue> = state
            .repos
            .get(&repo_key(owner, repo))
            .map(|r| r.issues.iter().filter(|i| !i.is_pull_request()).collect())
            .unwrap_or_default();
        let end = (start + self.node_page_size).min(issues.len());
        let nodes = issues
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|i| IssueNode {
                id: node_id(i),
                number: i.number,
                title: Some(i.title.clone()),
            })
            .collect();

        Ok(IssueNodePage {
            nodes,
            page_info: PageInfo {
                has_next_page: end < issues.len(),
                end_cursor: (end > start).then(|| end.to_string()),
            },
        })
    }

    async fn delete_issue(&self, node: &str) -> GitHubResult<()> {
        let mut state = self.enter("delete_issue", node.to_string(), &[node])?;
        for repo_state in state.repos.values_mut() {
            if let Some(index) = repo_state.issues.iter().position(|i| node_id(i) == node) {
                let issue = repo_state.issues.remove(index);
                repo_state.comments.remove(&issue.number);
                return Ok(());
            }
        }
        Err(GitHubError::new(
            GitHubErrorKind::QueryError,
            format!("NOT_FOUND: Could not resolve to a node with the global id of '{}'", node),
        ))
    }
}

fn node_id(issue: &Issue) -> String {
    issue
        .node_id
        .clone()
        .unwrap_or_else(|| format!("I_kwDO{}", issue.id))
}

/// Test fixtures for common GitHub types.
pub mod fixtures {
    use super::*;

    /// Creates a test user.
    pub fn user(login: &str) -> User {
        User {
            id: 1,
            login: login.to_string(),
            user_type: Some("User".to_string()),
            html_url: Some(format!("https://github.com/{}", login)),
        }
    }

    /// Creates a test repository.
    pub fn repository(owner: &str, name: &str) -> Repository {
        Repository {
            id: 1,
            name: name.to_string(),
            full_name: format!("{}/{}", owner, name),
            owner: user(owner),
            private: false,
            description: Some("A test repository".to_string()),
            html_url: Some(format!("https://github.com/{}/{}", owner, name)),
            open_issues_count: 0,
            has_issues: true,
        }
    }

    /// Creates an open test milestone.
    pub fn milestone(number: u64, title: &str) -> Milestone {
        Milestone {
            id: number,
            number,
            title: title.to_string(),
            description: None,
            state: MilestoneState::Open,
            open_issues: 0,
            closed_issues: 0,
            due_on: None,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        }
    }

    /// Creates an open test issue labelled `bug`.
    pub fn issue(number: u64, title: &str) -> Issue {
        Issue {
            id: number,
            node_id: Some(format!("I_kwDO{}", number)),
            number,
            title: title.to_string(),
            body: None,
            state: IssueState::Open,
            user: Some(user("testuser")),
            labels: vec![label("bug")],
            assignees: vec![],
            milestone: None,
            comments: 0,
            pull_request: None,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            closed_at: None,
        }
    }

    /// Creates a test comment.
    pub fn comment(id: u64, body: &str) -> Comment {
        Comment {
            id,
            body: body.to_string(),
            user: Some(user("testuser")),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        }
    }

    /// Creates a test label.
    pub fn label(name: &str) -> Label {
        Label {
            id: None,
            name: name.to_string(),
            color: Some("d73a4a".to_string()),
            description: None,
        }
    }

    /// Creates rate limit info resetting in one hour.
    pub fn rate_limit_info(limit: u32, remaining: u32) -> RateLimitInfo {
        RateLimitInfo {
            limit: Some(limit),
            remaining: Some(remaining),
            reset_at: Some(Utc::now() + Duration::hours(1)),
            retry_after: None,
            resource: Some("core".to_string()),
        }
    }
}
