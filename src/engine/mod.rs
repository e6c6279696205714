//! Bulk import, export and clear.
//!
//! The engine drives a [`GitHubApi`] sequentially: milestones before their
//! issues, one request at a time. Per-item failures are logged, reported as
//! [`ProgressEvent::ItemFailed`] and collected in the summary; only
//! `AuthenticationExpired` and cancellation abort a running operation.
//!
//! ```no_run
//! use github_importer::{BulkEngine, BulkRequest, GitHubClient, RepoTarget};
//! use std::sync::Arc;
//!
//! # async fn example() -> github_importer::GitHubResult<()> {
//! let client = GitHubClient::builder().token("ghp_xxxx").build()?;
//! let engine = Arc::new(BulkEngine::new(Arc::new(client)));
//!
//! let target: RepoTarget = "octocat/hello-world".parse()?;
//! let (handle, mut events) = engine.spawn(BulkRequest::Import {
//!     target,
//!     path: "milestones.json".into(),
//! })?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! let summary = handle.join().await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

mod locks;
mod progress;

pub use locks::*;
pub use progress::*;

use crate::config::DEFAULT_DELETE_DELAY;
use crate::document::{ImportDocument, IssueEntry, MilestoneEntry};
use crate::errors::{item_target, GitHubError, GitHubResult};
use crate::services::{
    collect_issue_nodes, delete_issue_nodes, BulkDeleteOptions, GitHubApi, ListIssuesParams,
};
use crate::types::{Milestone, StateFilter};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// An `owner/repo` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoTarget {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

impl RepoTarget {
    /// Creates a target.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Lock key. GitHub names are case-insensitive.
    pub(crate) fn key(&self) -> String {
        format!("{}/{}", self.owner, self.repo).to_lowercase()
    }

    fn item(&self, number: u64) -> String {
        item_target(&self.owner, &self.repo, number)
    }
}

impl fmt::Display for RepoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoTarget {
    type Err = GitHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(Self::new(owner, repo))
            }
            _ => Err(GitHubError::configuration(format!(
                "Expected owner/repo, got '{}'",
                s
            ))),
        }
    }
}

/// A bulk operation to run on a spawned task.
#[derive(Debug, Clone)]
pub enum BulkRequest {
    /// Import a document file.
    Import {
        /// Repository.
        target: RepoTarget,
        /// Document path.
        path: PathBuf,
    },
    /// Export to a document file.
    Export {
        /// Repository.
        target: RepoTarget,
        /// Output path.
        path: PathBuf,
    },
    /// Delete every issue and milestone.
    Clear {
        /// Repository.
        target: RepoTarget,
        /// Caller's answer to the confirmation prompt.
        confirmed: bool,
    },
}

impl BulkRequest {
    /// Repository the request runs against.
    pub fn target(&self) -> &RepoTarget {
        match self {
            BulkRequest::Import { target, .. }
            | BulkRequest::Export { target, .. }
            | BulkRequest::Clear { target, .. } => target,
        }
    }

    /// Operation kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            BulkRequest::Import { .. } => OperationKind::Import,
            BulkRequest::Export { .. } => OperationKind::Export,
            BulkRequest::Clear { .. } => OperationKind::Clear,
        }
    }
}

/// Handle to a spawned bulk operation.
#[derive(Debug)]
pub struct OperationHandle {
    id: uuid::Uuid,
    cancel: CancellationFlag,
    task: JoinHandle<GitHubResult<OperationSummary>>,
}

impl OperationHandle {
    /// Operation id.
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Asks the operation to stop at the next item boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the operation to finish.
    pub async fn join(self) -> GitHubResult<OperationSummary> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(GitHubError::cancelled(format!("Operation task aborted: {}", e))),
        }
    }
}

/// Runs bulk operations against one [`GitHubApi`].
pub struct BulkEngine<A: GitHubApi + ?Sized> {
    api: Arc<A>,
    locks: RepositoryLocks,
    delete_delay: Duration,
}

impl<A: GitHubApi + ?Sized> BulkEngine<A> {
    /// Creates an engine with the default delete delay, sharing the
    /// process-wide repository locks.
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            locks: RepositoryLocks::process(),
            delete_delay: DEFAULT_DELETE_DELAY,
        }
    }

    /// Sets the pause between issue deletions.
    pub fn with_delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = delay;
        self
    }

    /// Uses another lock registry, e.g. a private [`RepositoryLocks::new`].
    pub fn with_locks(mut self, locks: RepositoryLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Lock registry of this engine.
    pub fn locks(&self) -> &RepositoryLocks {
        &self.locks
    }

    /// The underlying API.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Imports a document file.
    pub async fn import_file(
        &self,
        target: &RepoTarget,
        path: impl AsRef<Path>,
        op: &Operation,
    ) -> GitHubResult<ImportSummary> {
        let _guard = self.locks.acquire(target)?;
        self.start(op, OperationKind::Import, target);
        let result = self.import_file_unlocked(target, path.as_ref(), op).await;
        finish(op, target, result)
    }

    /// Imports an already parsed document.
    pub async fn import_document(
        &self,
        target: &RepoTarget,
        document: &ImportDocument,
        op: &Operation,
    ) -> GitHubResult<ImportSummary> {
        let _guard = self.locks.acquire(target)?;
        self.start(op, OperationKind::Import, target);
        let result = self.run_import(target, document, op).await;
        finish(op, target, result)
    }

    /// Exports every milestone with its issues and comments to a file.
    pub async fn export_to_file(
        &self,
        target: &RepoTarget,
        path: impl AsRef<Path>,
        op: &Operation,
    ) -> GitHubResult<ExportSummary> {
        let _guard = self.locks.acquire(target)?;
        self.start(op, OperationKind::Export, target);
        let result = self.export_file_unlocked(target, path.as_ref(), op).await;
        finish(op, target, result)
    }

    /// Builds the export document without writing it.
    pub async fn export_document(
        &self,
        target: &RepoTarget,
        op: &Operation,
    ) -> GitHubResult<(ImportDocument, ExportSummary)> {
        let _guard = self.locks.acquire(target)?;
        self.start(op, OperationKind::Export, target);
        let result = self.run_export(target, op).await;
        report(op, target, result.as_ref().map(|(_, summary)| summary));
        result
    }

    /// Deletes every issue, then every milestone.
    ///
    /// `confirm` is asked first; declining fails with `Cancelled` before any
    /// request is made.
    pub async fn clear_repository<F>(
        &self,
        target: &RepoTarget,
        confirm: F,
        op: &Operation,
    ) -> GitHubResult<ClearSummary>
    where
        F: FnOnce(&RepoTarget) -> bool,
    {
        let _guard = self.locks.acquire(target)?;
        self.start(op, OperationKind::Clear, target);
        op.state(OperationState::AwaitingConfirmation);
        let result = if confirm(target) {
            self.run_clear(target, op).await
        } else {
            Err(GitHubError::cancelled(format!("Clearing {} was declined", target)))
        };
        finish(op, target, result)
    }

    fn start(&self, op: &Operation, kind: OperationKind, target: &RepoTarget) {
        tracing::info!(operation_id = %op.id(), %kind, %target, "Bulk operation started");
        op.emit(ProgressEvent::Started {
            id: op.id(),
            kind,
            target: target.to_string(),
        });
    }

    async fn import_file_unlocked(
        &self,
        target: &RepoTarget,
        path: &Path,
        op: &Operation,
    ) -> GitHubResult<ImportSummary> {
        op.state(OperationState::ReadingFile);
        let document = ImportDocument::load(path).await?;
        tracing::info!(
            %target,
            milestones = document.milestone_count(),
            issues = document.issue_count(),
            "Import document loaded"
        );
        self.run_import(target, &document, op).await
    }

    async fn run_import(
        &self,
        target: &RepoTarget,
        document: &ImportDocument,
        op: &Operation,
    ) -> GitHubResult<ImportSummary> {
        let mut summary = ImportSummary::default();
        op.state(OperationState::CreatingMilestones);

        for entry in &document.milestones {
            op.check()?;
            let created = match entry.to_request() {
                Ok(request) => {
                    self.api
                        .create_milestone(&target.owner, &target.repo, &request)
                        .await
                }
                Err(e) => Err(e),
            };

            match created {
                Ok(milestone) => {
                    summary.milestones_created += 1;
                    tracing::info!(%target, title = %milestone.title, number = milestone.number, "Milestone created");
                    op.emit(ProgressEvent::MilestoneCreated {
                        title: milestone.title.clone(),
                        number: milestone.number,
                    });
                    self.create_issues(target, &milestone, entry, op, &mut summary)
                        .await?;
                    op.state(OperationState::CreatingMilestones);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(%target, title = %entry.title, error = %e, "Failed to create milestone, skipping its issues");
                    summary.milestones_failed += 1;
                    summary.issues_skipped += entry.issues.len();
                    op.item_failed(
                        &mut summary.failures,
                        ItemFailure::new("create_milestone", format!("{} \"{}\"", target, entry.title), &e),
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn create_issues(
        &self,
        target: &RepoTarget,
        milestone: &Milestone,
        entry: &MilestoneEntry,
        op: &Operation,
        summary: &mut ImportSummary,
    ) -> GitHubResult<()> {
        op.state(OperationState::CreatingIssues {
            milestone: milestone.title.clone(),
        });

        for issue in &entry.issues {
            op.check()?;
            let request = issue.to_request(Some(milestone.number));
            let created = match self
                .api
                .create_issue(&target.owner, &target.repo, &request)
                .await
            {
                Ok(created) => created,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(%target, title = %issue.title, error = %e, "Failed to create issue");
                    summary.issues_failed += 1;
                    op.item_failed(
                        &mut summary.failures,
                        ItemFailure::new("create_issue", format!("{} \"{}\"", target, issue.title), &e),
                    );
                    continue;
                }
            };

            summary.issues_created += 1;
            tracing::debug!(%target, title = %created.title, number = created.number, "Issue created");
            op.emit(ProgressEvent::IssueCreated {
                title: created.title.clone(),
                number: created.number,
            });

            self.attach(target, created.number, issue, op, summary).await?;
        }

        Ok(())
    }

    /// Adds labels, assignees and comments to a created issue.
    async fn attach(
        &self,
        target: &RepoTarget,
        number: u64,
        issue: &IssueEntry,
        op: &Operation,
        summary: &mut ImportSummary,
    ) -> GitHubResult<()> {
        let (owner, repo) = (target.owner.as_str(), target.repo.as_str());

        if !issue.labels.is_empty() {
            let result = self.api.add_labels(owner, repo, number, &issue.labels).await;
            record_attachment(target, number, "add_labels", result, op, summary)?;
        }
        if !issue.assignees.is_empty() {
            let result = self
                .api
                .add_assignees(owner, repo, number, &issue.assignees)
                .await;
            record_attachment(target, number, "add_assignees", result, op, summary)?;
        }
        for comment in &issue.comments {
            let body = comment.body().trim();
            if body.is_empty() {
                continue;
            }
            let result = self
                .api
                .create_comment(owner, repo, number, body)
                .await
                .map(|_| ());
            record_attachment(target, number, "create_comment", result, op, summary)?;
        }

        Ok(())
    }

    async fn export_file_unlocked(
        &self,
        target: &RepoTarget,
        path: &Path,
        op: &Operation,
    ) -> GitHubResult<ExportSummary> {
        let (document, mut summary) = self.run_export(target, op).await?;
        op.state(OperationState::WritingFile);
        document.save(path).await?;
        summary.path = Some(path.to_path_buf());
        tracing::info!(%target, path = %path.display(), "Export written");
        Ok(summary)
    }

    async fn run_export(
        &self,
        target: &RepoTarget,
        op: &Operation,
    ) -> GitHubResult<(ImportDocument, ExportSummary)> {
        let (owner, repo) = (target.owner.as_str(), target.repo.as_str());
        let mut summary = ExportSummary::default();
        let mut document = ImportDocument::default();

        op.state(OperationState::FetchingMilestones);
        let mut milestones = self.api.list_milestones(owner, repo, StateFilter::All).await?;
        milestones.sort_by_key(|m| m.number);

        for milestone in &milestones {
            op.check()?;
            op.state(OperationState::FetchingIssuesForMilestone {
                milestone: milestone.title.clone(),
            });

            let params = ListIssuesParams::for_milestone(milestone.number);
            let mut issues = match self.api.list_issues(owner, repo, &params).await {
                Ok(issues) => issues,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(%target, milestone = %milestone.title, error = %e, "Failed to list milestone issues");
                    op.item_failed(
                        &mut summary.failures,
                        ItemFailure::new("list_issues", format!("{} \"{}\"", target, milestone.title), &e),
                    );
                    Vec::new()
                }
            };
            issues.sort_by_key(|i| i.number);

            let mut entries = Vec::with_capacity(issues.len());
            for issue in &issues {
                if issue.is_pull_request() {
                    summary.pull_requests_skipped += 1;
                    continue;
                }
                op.check()?;

                let comments = if issue.comments > 0 {
                    match self.api.list_comments(owner, repo, issue.number).await {
                        Ok(comments) => comments,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            tracing::warn!(%target, number = issue.number, error = %e, "Failed to list comments");
                            op.item_failed(
                                &mut summary.failures,
                                ItemFailure::new("list_comments", target.item(issue.number), &e),
                            );
                            Vec::new()
                        }
                    }
                } else {
                    Vec::new()
                };

                summary.comments += comments.len();
                entries.push(IssueEntry::from_issue(issue, &comments));
            }

            summary.milestones += 1;
            summary.issues += entries.len();
            op.emit(ProgressEvent::MilestoneExported {
                title: milestone.title.clone(),
                issues: entries.len(),
            });
            document
                .milestones
                .push(MilestoneEntry::from_milestone(milestone, entries));
        }

        Ok((document, summary))
    }

    async fn run_clear(&self, target: &RepoTarget, op: &Operation) -> GitHubResult<ClearSummary> {
        let (owner, repo) = (target.owner.as_str(), target.repo.as_str());
        let mut summary = ClearSummary::default();

        op.state(OperationState::FetchingAllIssues);
        let (nodes, _) = collect_issue_nodes(self.api.as_ref(), owner, repo, op.cancellation()).await?;

        op.state(OperationState::DeletingIssues);
        let options = BulkDeleteOptions {
            delay: self.delete_delay,
        };
        let report = delete_issue_nodes(
            self.api.as_ref(),
            owner,
            repo,
            &nodes,
            &options,
            op.cancellation(),
            |node, error| {
                if error.is_none() {
                    op.emit(ProgressEvent::IssueDeleted {
                        number: node.number,
                    });
                }
            },
        )
        .await?;
        summary.issues_found = report.found;
        summary.issues_deleted = report.deleted;
        for failure in report.failures {
            op.item_failed(&mut summary.failures, failure);
        }

        op.check()?;
        op.state(OperationState::FetchingAllMilestones);
        let milestones = match self.api.list_milestones(owner, repo, StateFilter::All).await {
            Ok(milestones) => milestones,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(%target, error = %e, "Failed to list milestones");
                op.item_failed(
                    &mut summary.failures,
                    ItemFailure::new("list_milestones", target.to_string(), &e),
                );
                return Ok(summary);
            }
        };
        summary.milestones_found = milestones.len();

        op.state(OperationState::DeletingMilestones);
        for milestone in &milestones {
            op.check()?;
            match self.api.delete_milestone(owner, repo, milestone.number).await {
                Ok(()) => {
                    summary.milestones_deleted += 1;
                    op.emit(ProgressEvent::MilestoneDeleted {
                        title: milestone.title.clone(),
                        number: milestone.number,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(%target, number = milestone.number, error = %e, "Failed to delete milestone");
                    op.item_failed(
                        &mut summary.failures,
                        ItemFailure::new("delete_milestone", target.item(milestone.number), &e),
                    );
                }
            }
        }

        Ok(summary)
    }
}

impl<A: GitHubApi + ?Sized + 'static> BulkEngine<A> {
    /// Runs a request on a spawned task.
    ///
    /// The repository is locked before this returns, so a second request
    /// for the same repository fails here with `OperationInProgress`.
    pub fn spawn(
        self: &Arc<Self>,
        request: BulkRequest,
    ) -> GitHubResult<(OperationHandle, ProgressReceiver)> {
        let guard = self.locks.acquire(request.target())?;
        let (op, events) = Operation::new();
        let id = op.id();
        let cancel = op.cancellation().clone();
        let engine = Arc::clone(self);

        let task = tokio::spawn(async move {
            let _guard = guard;
            let target = request.target().clone();
            engine.start(&op, request.kind(), &target);
            let result: GitHubResult<OperationSummary> = match request {
                BulkRequest::Import { path, .. } => engine
                    .import_file_unlocked(&target, &path, &op)
                    .await
                    .map(Into::into),
                BulkRequest::Export { path, .. } => engine
                    .export_file_unlocked(&target, &path, &op)
                    .await
                    .map(Into::into),
                BulkRequest::Clear { confirmed, .. } => {
                    op.state(OperationState::AwaitingConfirmation);
                    if confirmed {
                        engine.run_clear(&target, &op).await.map(Into::into)
                    } else {
                        Err(GitHubError::cancelled(format!("Clearing {} was declined", target)))
                    }
                }
            };
            finish(&op, &target, result)
        });

        Ok((OperationHandle { id, cancel, task }, events))
    }
}

/// Counts a failed label, assignee or comment; fatal errors pass through.
fn record_attachment(
    target: &RepoTarget,
    number: u64,
    operation: &str,
    result: GitHubResult<()>,
    op: &Operation,
    summary: &mut ImportSummary,
) -> GitHubResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(%target, number, operation, error = %e, "Failed to attach to issue");
            summary.attachment_failures += 1;
            op.item_failed(
                &mut summary.failures,
                ItemFailure::new(operation, target.item(number), &e),
            );
            Ok(())
        }
    }
}

/// Logs the outcome and emits the final event.
fn finish<T>(op: &Operation, target: &RepoTarget, result: GitHubResult<T>) -> GitHubResult<T>
where
    T: Clone + Into<OperationSummary>,
{
    report(op, target, result.as_ref());
    result
}

/// Logs the outcome and emits `Completed` or `Failed`.
fn report<T>(op: &Operation, target: &RepoTarget, result: Result<&T, &GitHubError>)
where
    T: Clone + Into<OperationSummary>,
{
    match result {
        Ok(summary) => {
            let summary: OperationSummary = summary.clone().into();
            tracing::info!(
                operation_id = %op.id(),
                %target,
                failures = summary.failures().len(),
                "{}",
                summary
            );
            op.state(OperationState::Completed);
            op.emit(ProgressEvent::Completed(summary));
        }
        Err(e) => {
            tracing::error!(operation_id = %op.id(), %target, error = %e, "Bulk operation failed");
            op.state(OperationState::Failed(e.kind()));
            op.emit(ProgressEvent::Failed {
                kind: e.kind(),
                message: e.message().to_string(),
            });
        }
    }
}
