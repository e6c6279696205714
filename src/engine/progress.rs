//! Progress reporting, cancellation and summaries for bulk operations.

use crate::errors::{GitHubError, GitHubErrorKind, GitHubResult};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Kind of bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Milestones and issues from a file.
    Import,
    /// Milestones and issues to a file.
    Export,
    /// Delete every issue and milestone.
    Clear,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Import => "import",
            OperationKind::Export => "export",
            OperationKind::Clear => "clear",
        };
        write!(f, "{}", s)
    }
}

/// Where a bulk operation currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    /// Not started.
    Idle,
    /// Reading the import file.
    ReadingFile,
    /// Creating milestones in document order.
    CreatingMilestones,
    /// Creating the issues of one milestone.
    CreatingIssues {
        /// Milestone title.
        milestone: String,
    },
    /// Listing milestones for export.
    FetchingMilestones,
    /// Listing the issues of one milestone.
    FetchingIssuesForMilestone {
        /// Milestone title.
        milestone: String,
    },
    /// Writing the export file.
    WritingFile,
    /// Waiting for the caller to confirm a clear.
    AwaitingConfirmation,
    /// Listing every issue over GraphQL.
    FetchingAllIssues,
    /// Deleting issues.
    DeletingIssues,
    /// Listing every milestone.
    FetchingAllMilestones,
    /// Deleting milestones.
    DeletingMilestones,
    /// Finished.
    Completed,
    /// Aborted.
    Failed(GitHubErrorKind),
}

/// Event sent to the host while an operation runs.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressEvent {
    /// The operation started.
    Started {
        /// Operation id.
        id: Uuid,
        /// Operation kind.
        kind: OperationKind,
        /// `owner/repo`.
        target: String,
    },
    /// The operation moved to a new state.
    State(OperationState),
    /// A milestone was created.
    MilestoneCreated {
        /// Title.
        title: String,
        /// Server-assigned number.
        number: u64,
    },
    /// An issue was created.
    IssueCreated {
        /// Title.
        title: String,
        /// Server-assigned number.
        number: u64,
    },
    /// A milestone and its issues were exported.
    MilestoneExported {
        /// Title.
        title: String,
        /// Exported issue count.
        issues: usize,
    },
    /// An issue was deleted.
    IssueDeleted {
        /// Issue number.
        number: u64,
    },
    /// A milestone was deleted.
    MilestoneDeleted {
        /// Title.
        title: String,
        /// Milestone number.
        number: u64,
    },
    /// A single item failed; the operation continues.
    ItemFailed(ItemFailure),
    /// The operation finished.
    Completed(OperationSummary),
    /// The operation aborted.
    Failed {
        /// Error kind.
        kind: GitHubErrorKind,
        /// Error message.
        message: String,
    },
}

/// Sending half of the progress channel.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Receiving half of the progress channel.
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Cooperative cancellation flag, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    /// Creates a flag that is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once the flag is raised.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` once the flag is raised.
    pub fn check(&self) -> GitHubResult<()> {
        if self.is_cancelled() {
            Err(GitHubError::cancelled("Operation cancelled"))
        } else {
            Ok(())
        }
    }
}

/// One item that failed inside a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Operation that failed, e.g. `create_issue`.
    pub operation: String,
    /// `owner/repo`, `owner/repo#n` or a title.
    pub item: String,
    /// Error kind.
    pub kind: GitHubErrorKind,
    /// Error message.
    pub message: String,
}

impl ItemFailure {
    /// Records a failure of `operation` on `item`.
    pub fn new(operation: impl Into<String>, item: impl Into<String>, error: &GitHubError) -> Self {
        Self {
            operation: operation.into(),
            item: item.into(),
            kind: error.kind(),
            message: error.message().to_string(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: [{}] {}", self.operation, self.item, self.kind, self.message)
    }
}

/// Result of an import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportSummary {
    /// Milestones created.
    pub milestones_created: usize,
    /// Milestones that could not be created.
    pub milestones_failed: usize,
    /// Issues created.
    pub issues_created: usize,
    /// Issues that could not be created.
    pub issues_failed: usize,
    /// Issues not attempted because their milestone failed.
    pub issues_skipped: usize,
    /// Labels, assignees or comments that could not be added.
    pub attachment_failures: usize,
    /// Every failure in order.
    pub failures: Vec<ItemFailure>,
}

/// Result of an export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSummary {
    /// Milestones written.
    pub milestones: usize,
    /// Issues written.
    pub issues: usize,
    /// Comments written.
    pub comments: usize,
    /// Pull requests left out.
    pub pull_requests_skipped: usize,
    /// Output file, when written.
    pub path: Option<PathBuf>,
    /// Every failure in order.
    pub failures: Vec<ItemFailure>,
}

/// Result of clearing a repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearSummary {
    /// Issues found.
    pub issues_found: usize,
    /// Issues deleted.
    pub issues_deleted: usize,
    /// Milestones found.
    pub milestones_found: usize,
    /// Milestones deleted.
    pub milestones_deleted: usize,
    /// Every failure in order.
    pub failures: Vec<ItemFailure>,
}

/// Result of any bulk operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationSummary {
    /// Import result.
    Import(ImportSummary),
    /// Export result.
    Export(ExportSummary),
    /// Clear result.
    Clear(ClearSummary),
}

impl OperationSummary {
    /// Per-item failures of the operation.
    pub fn failures(&self) -> &[ItemFailure] {
        match self {
            OperationSummary::Import(s) => &s.failures,
            OperationSummary::Export(s) => &s.failures,
            OperationSummary::Clear(s) => &s.failures,
        }
    }
}

impl From<ImportSummary> for OperationSummary {
    fn from(summary: ImportSummary) -> Self {
        OperationSummary::Import(summary)
    }
}

impl From<ExportSummary> for OperationSummary {
    fn from(summary: ExportSummary) -> Self {
        OperationSummary::Export(summary)
    }
}

impl From<ClearSummary> for OperationSummary {
    fn from(summary: ClearSummary) -> Self {
        OperationSummary::Clear(summary)
    }
}

impl fmt::Display for OperationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationSummary::Import(s) => write!(
                f,
                "{} milestones and {} issues created; {} milestones, {} issues and {} attachments failed; {} issues skipped",
                s.milestones_created,
                s.issues_created,
                s.milestones_failed,
                s.issues_failed,
                s.attachment_failures,
                s.issues_skipped
            ),
            OperationSummary::Export(s) => write!(
                f,
                "{} milestones, {} issues and {} comments exported; {} failures",
                s.milestones,
                s.issues,
                s.comments,
                s.failures.len()
            ),
            OperationSummary::Clear(s) => write!(
                f,
                "{}/{} issues and {}/{} milestones deleted",
                s.issues_deleted, s.issues_found, s.milestones_deleted, s.milestones_found
            ),
        }
    }
}

/// Context a single bulk operation runs with.
///
/// Sending progress never fails the operation; a dropped receiver only
/// silences it.
#[derive(Debug, Clone)]
pub struct Operation {
    id: Uuid,
    cancel: CancellationFlag,
    events: Option<ProgressSender>,
}

impl Operation {
    /// Creates an operation and the receiver for its progress events.
    pub fn new() -> (Self, ProgressReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let op = Self {
            id: Uuid::new_v4(),
            cancel: CancellationFlag::new(),
            events: Some(tx),
        };
        (op, rx)
    }

    /// Creates an operation nobody listens to.
    pub fn silent() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel: CancellationFlag::new(),
            events: None,
        }
    }

    /// Operation id, used to correlate log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancellation flag of this operation.
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub(crate) fn check(&self) -> GitHubResult<()> {
        self.cancel.check()
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    pub(crate) fn state(&self, state: OperationState) {
        tracing::debug!(operation_id = %self.id, state = ?state, "Operation state");
        self.emit(ProgressEvent::State(state));
    }

    pub(crate) fn item_failed(&self, failure: &mut Vec<ItemFailure>, item: ItemFailure) {
        self.emit(ProgressEvent::ItemFailed(item.clone()));
        failure.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_flag_shared_between_clones() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(flag.check().is_ok());

        clone.cancel();

        assert!(flag.is_cancelled());
        assert_eq!(flag.check().unwrap_err().kind(), GitHubErrorKind::Cancelled);
    }

    #[test]
    fn test_item_failure_from_error() {
        let err = GitHubError::api(422, "Validation Failed");
        let failure = ItemFailure::new("create_issue", "octo/demo", &err);

        assert_eq!(failure.kind, GitHubErrorKind::ApiError);
        assert_eq!(
            failure.to_string(),
            "create_issue octo/demo: [api_error] Validation Failed"
        );
    }

    #[tokio::test]
    async fn test_operation_emits_events() {
        let (op, mut rx) = Operation::new();
        op.state(OperationState::ReadingFile);

        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::State(OperationState::ReadingFile))
        );
    }

    #[test]
    fn test_silent_operation_ignores_events() {
        let op = Operation::silent();
        op.emit(ProgressEvent::IssueDeleted { number: 1 });
        assert!(op.check().is_ok());
    }
}
