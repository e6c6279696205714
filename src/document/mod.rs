//! Import/export document model.
//!
//! A document is a JSON array of milestones, each carrying its issues. Export
//! writes the same shape plus server-side fields (`number`, timestamps, issue
//! `state`) so an exported file can be imported again.

use crate::errors::{GitHubError, GitHubResult};
use crate::services::{CreateIssueRequest, CreateMilestoneRequest};
use crate::types::{Comment, Issue, IssueState, Milestone, MilestoneState};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

const OVERVIEW_HEADING: &str = "## Overview";
const TASKS_HEADING: &str = "## Tasks";

/// Ordered milestones read from or written to a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportDocument {
    /// Milestones in file order.
    pub milestones: Vec<MilestoneEntry>,
}

/// Exported files use the import shape.
pub type ExportDocument = ImportDocument;

/// A milestone and its issues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneEntry {
    /// Milestone title.
    pub title: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Due date, RFC 3339 timestamp or `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_on: Option<String>,
    /// Milestone state.
    #[serde(default)]
    pub state: MilestoneState,
    /// Issues in file order.
    #[serde(default)]
    pub issues: Vec<IssueEntry>,
    /// Server-assigned number (export only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// Creation time (export only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time (export only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// An issue inside a milestone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueEntry {
    /// Issue title.
    pub title: String,
    /// Leading free text of the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Text of the `## Overview` section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    /// Items of the `## Tasks` checklist.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<String>,
    /// Label names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Assignee logins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    /// Comments in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<CommentEntry>,
    /// Issue state. Exported for reference; not applied on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
    /// Server-assigned number (export only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// Creation time (export only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time (export only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A comment is either plain text or an exported record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentEntry {
    /// Comment body only.
    Text(String),
    /// Exported comment.
    Record(CommentRecord),
}

impl CommentEntry {
    /// The comment body. Only the body is replayed on import.
    pub fn body(&self) -> &str {
        match self {
            CommentEntry::Text(body) => body,
            CommentEntry::Record(record) => &record.body,
        }
    }
}

/// Exported comment with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    /// Comment body.
    pub body: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Author login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl ImportDocument {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> GitHubResult<Self> {
        let document: Self = serde_json::from_str(json).map_err(|e| {
            GitHubError::invalid_format(format!("Malformed import document: {}", e)).with_cause(e)
        })?;
        document.validate()?;
        Ok(document)
    }

    /// Reads, parses and validates a document file.
    pub async fn load(path: impl AsRef<Path>) -> GitHubResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            GitHubError::file(format!("Cannot read {}: {}", path.display(), e)).with_cause(e)
        })?;
        Self::from_json(&contents)
    }

    /// Serializes as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> GitHubResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            GitHubError::invalid_format(format!("Cannot serialize document: {}", e)).with_cause(e)
        })
    }

    /// Writes the document as pretty-printed JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> GitHubResult<()> {
        let path = path.as_ref();
        let json = self.to_json_pretty()?;
        tokio::fs::write(path, json).await.map_err(|e| {
            GitHubError::file(format!("Cannot write {}: {}", path.display(), e)).with_cause(e)
        })
    }

    /// Checks structural rules serde cannot express.
    pub fn validate(&self) -> GitHubResult<()> {
        for (m, milestone) in self.milestones.iter().enumerate() {
            let at = format!("milestone {}", m + 1);
            if milestone.title.trim().is_empty() {
                return Err(GitHubError::invalid_format(format!("{}: title is empty", at)));
            }
            if let Some(due_on) = &milestone.due_on {
                normalize_due_on(due_on).map_err(|e| {
                    GitHubError::invalid_format(format!("{}: {}", at, e.message()))
                })?;
            }
            for (i, issue) in milestone.issues.iter().enumerate() {
                if issue.title.trim().is_empty() {
                    return Err(GitHubError::invalid_format(format!(
                        "{} issue {}: title is empty",
                        at,
                        i + 1
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of milestones.
    pub fn milestone_count(&self) -> usize {
        self.milestones.len()
    }

    /// Number of issues across all milestones.
    pub fn issue_count(&self) -> usize {
        self.milestones.iter().map(|m| m.issues.len()).sum()
    }
}

impl MilestoneEntry {
    /// Builds the create request, normalizing `due_on` to a timestamp.
    pub fn to_request(&self) -> GitHubResult<CreateMilestoneRequest> {
        let due_on = self.due_on.as_deref().map(normalize_due_on).transpose()?;
        Ok(CreateMilestoneRequest {
            title: self.title.clone(),
            state: self.state,
            description: non_empty(self.description.as_deref()),
            due_on,
        })
    }

    /// Builds an export entry from a server milestone and its issues.
    pub fn from_milestone(milestone: &Milestone, issues: Vec<IssueEntry>) -> Self {
        Self {
            title: milestone.title.clone(),
            description: non_empty(milestone.description.as_deref()),
            due_on: milestone.due_on.map(|d| d.to_rfc3339()),
            state: milestone.state,
            issues,
            number: Some(milestone.number),
            created_at: milestone.created_at,
            updated_at: milestone.updated_at,
        }
    }
}

impl IssueEntry {
    /// Rendered issue body.
    pub fn body(&self) -> Option<String> {
        render_body(
            self.description.as_deref(),
            self.overview.as_deref(),
            &self.tasks,
        )
    }

    /// Builds the create request for an issue in the given milestone.
    pub fn to_request(&self, milestone: Option<u64>) -> CreateIssueRequest {
        CreateIssueRequest {
            title: self.title.clone(),
            body: self.body(),
            milestone,
        }
    }

    /// Builds an export entry from a server issue and its comments.
    pub fn from_issue(issue: &Issue, comments: &[Comment]) -> Self {
        let parsed = parse_body(issue.body.as_deref().unwrap_or_default());
        Self {
            title: issue.title.clone(),
            description: parsed.description,
            overview: parsed.overview,
            tasks: parsed.tasks,
            labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
            assignees: issue.assignees.iter().map(|u| u.login.clone()).collect(),
            comments: comments
                .iter()
                .map(|c| {
                    CommentEntry::Record(CommentRecord {
                        body: c.body.clone(),
                        created_at: c.created_at,
                        author: c.user.as_ref().map(|u| u.login.clone()),
                    })
                })
                .collect(),
            state: Some(issue.state),
            number: Some(issue.number),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
        }
    }
}

/// Accepts an RFC 3339 timestamp or a bare date, returns RFC 3339.
fn normalize_due_on(value: &str) -> GitHubResult<String> {
    let value = value.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc).to_rfc3339());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().to_rfc3339())
        .ok_or_else(|| {
            GitHubError::invalid_format(format!("due_on '{}' is not an ISO 8601 date", value))
        })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Renders an issue body from its description, overview and tasks.
///
/// Empty sections are left out; returns `None` when all three are empty.
pub fn render_body(description: Option<&str>, overview: Option<&str>, tasks: &[String]) -> Option<String> {
    let mut sections = Vec::new();

    if let Some(description) = non_empty(description) {
        sections.push(description);
    }
    if let Some(overview) = non_empty(overview) {
        sections.push(format!("{}\n{}", OVERVIEW_HEADING, overview));
    }
    let tasks: Vec<String> = tasks
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("- [ ] {}", t))
        .collect();
    if !tasks.is_empty() {
        sections.push(format!("{}\n{}", TASKS_HEADING, tasks.join("\n")));
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Sections recovered from an issue body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBody {
    /// Text before the first heading.
    pub description: Option<String>,
    /// Overview section text.
    pub overview: Option<String>,
    /// Checklist items of the tasks section.
    pub tasks: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Description,
    Overview,
    Tasks,
}

/// Splits a rendered body back into its sections.
///
/// Bodies that do not follow the rendered layout come back whole as the
/// description.
pub fn parse_body(body: &str) -> ParsedBody {
    let mut section = Section::Description;
    let mut description = Vec::new();
    let mut overview = Vec::new();
    let mut tasks = Vec::new();

    for line in body.lines() {
        match line.trim_end() {
            OVERVIEW_HEADING if section == Section::Description => {
                section = Section::Overview;
            }
            TASKS_HEADING if section != Section::Tasks => {
                section = Section::Tasks;
            }
            _ => match section {
                Section::Description => description.push(line),
                Section::Overview => overview.push(line),
                Section::Tasks => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match checklist_item(trimmed) {
                        Some(task) => tasks.push(task.to_string()),
                        None => {
                            return ParsedBody {
                                description: non_empty(Some(body)),
                                ..Default::default()
                            }
                        }
                    }
                }
            },
        }
    }

    ParsedBody {
        description: non_empty(Some(&description.join("\n"))),
        overview: non_empty(Some(&overview.join("\n"))),
        tasks,
    }
}

fn checklist_item(line: &str) -> Option<&str> {
    ["- [ ] ", "- [x] ", "- [X] ", "* [ ] ", "* [x] "]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .map(str::trim)
}
