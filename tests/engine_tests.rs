//! Bulk engine runs against the in-memory fake.

use github_importer::document::{CommentEntry, IssueEntry, MilestoneEntry};
use github_importer::engine::{OperationSummary, ProgressEvent, ProgressReceiver, RepositoryLocks};
use github_importer::mocks::FakeGitHub;
use github_importer::{
    BulkEngine, BulkRequest, GitHubErrorKind, ImportDocument, MilestoneState, Operation, RepoTarget,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn engine(fake: &FakeGitHub) -> Arc<BulkEngine<FakeGitHub>> {
    Arc::new(
        BulkEngine::new(Arc::new(fake.clone()))
            .with_delete_delay(Duration::ZERO)
            .with_locks(RepositoryLocks::new()),
    )
}

fn issue(title: &str, labels: &[&str], tasks: &[&str]) -> IssueEntry {
    IssueEntry {
        title: title.to_string(),
        description: Some(format!("{} description", title)),
        overview: Some("Why this matters".to_string()),
        tasks: tasks.iter().map(|t| t.to_string()).collect(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        ..Default::default()
    }
}

fn sample_document() -> ImportDocument {
    let mut ci = issue("Set up CI", &["infra"], &["Add workflow", "Cache dependencies"]);
    ci.comments = vec![CommentEntry::Text("Owner: platform team".to_string())];

    ImportDocument {
        milestones: vec![
            MilestoneEntry {
                title: "Alpha".to_string(),
                description: Some("First cut".to_string()),
                due_on: Some("2026-03-01".to_string()),
                issues: vec![ci, issue("Write README", &["docs"], &[])],
                ..Default::default()
            },
            MilestoneEntry {
                title: "Beta".to_string(),
                state: MilestoneState::Closed,
                issues: vec![issue("Ship it", &["release", "blocker"], &["Tag", "Publish"])],
                ..Default::default()
            },
        ],
    }
}

async fn drain(mut events: ProgressReceiver) -> Vec<ProgressEvent> {
    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }
    received
}

fn shape(document: &ImportDocument) -> Vec<(String, Vec<(String, Vec<String>, Vec<String>, usize)>)> {
    document
        .milestones
        .iter()
        .map(|m| {
            let issues = m
                .issues
                .iter()
                .map(|i| (i.title.clone(), i.labels.clone(), i.tasks.clone(), i.comments.len()))
                .collect();
            (m.title.clone(), issues)
        })
        .collect()
}

#[tokio::test]
async fn test_export_then_import_round_trip() {
    let fake = FakeGitHub::new();
    let engine = engine(&fake);
    let source = RepoTarget::new("octo", "source");
    let copy = RepoTarget::new("octo", "copy");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.json");

    let imported = engine
        .import_document(&source, &sample_document(), &Operation::silent())
        .await
        .unwrap();
    assert_eq!(imported.milestones_created, 2);
    assert_eq!(imported.issues_created, 3);
    assert!(imported.failures.is_empty());

    let exported = engine
        .export_to_file(&source, &path, &Operation::silent())
        .await
        .unwrap();
    assert_eq!(exported.milestones, 2);
    assert_eq!(exported.issues, 3);
    assert_eq!(exported.comments, 1);
    assert_eq!(exported.path.as_deref(), Some(path.as_path()));

    let reimported = engine
        .import_file(&copy, &path, &Operation::silent())
        .await
        .unwrap();
    assert_eq!(reimported.milestones_created, 2);
    assert_eq!(reimported.issues_created, 3);

    let (source_doc, _) = engine.export_document(&source, &Operation::silent()).await.unwrap();
    let (copy_doc, _) = engine.export_document(&copy, &Operation::silent()).await.unwrap();
    assert_eq!(shape(&copy_doc), shape(&source_doc));
    assert_eq!(shape(&source_doc), shape(&sample_document()));

    let beta = &copy_doc.milestones[1];
    assert_eq!(beta.state, MilestoneState::Closed);
    let alpha = &copy_doc.milestones[0];
    assert_eq!(alpha.due_on.as_deref(), Some("2026-03-01T00:00:00+00:00"));
    assert_eq!(alpha.issues[0].overview.as_deref(), Some("Why this matters"));
    assert_eq!(alpha.issues[0].comments[0].body(), "Owner: platform team");
}

#[tokio::test]
async fn test_malformed_file_makes_no_calls() {
    let fake = FakeGitHub::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, r#"[{"title": "Alpha", "issues": [{"title": }]"#).unwrap();

    let err = engine(&fake)
        .import_file(&RepoTarget::new("octo", "demo"), &path, &Operation::silent())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), GitHubErrorKind::InvalidFormat);
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_missing_file() {
    let fake = FakeGitHub::new();
    let dir = tempfile::tempdir().unwrap();

    let err = engine(&fake)
        .import_file(
            &RepoTarget::new("octo", "demo"),
            dir.path().join("absent.json"),
            &Operation::silent(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), GitHubErrorKind::FileError);
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_failed_milestone_skips_its_issues() {
    let fake = FakeGitHub::new();
    fake.fail_on("create_milestone", Some("Alpha"), GitHubErrorKind::ApiError);
    let target = RepoTarget::new("octo", "demo");

    let summary = engine(&fake)
        .import_document(&target, &sample_document(), &Operation::silent())
        .await
        .unwrap();

    assert_eq!(summary.milestones_created, 1);
    assert_eq!(summary.milestones_failed, 1);
    assert_eq!(summary.issues_skipped, 2);
    assert_eq!(summary.issues_created, 1);
    assert_eq!(summary.failures[0].item, "octo/demo \"Alpha\"");
    assert_eq!(fake.call_count("create_issue"), 1);

    let issues = fake.issues("octo", "demo");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].milestone.as_ref().map(|m| m.title.as_str()), Some("Beta"));
}

#[tokio::test]
async fn test_expired_auth_aborts_import() {
    let fake = FakeGitHub::new();
    fake.fail_on("create_issue", Some("Write README"), GitHubErrorKind::AuthenticationExpired);
    let (op, events) = Operation::new();

    let err = engine(&fake)
        .import_document(&RepoTarget::new("octo", "demo"), &sample_document(), &op)
        .await
        .unwrap_err();
    drop(op);

    assert_eq!(err.kind(), GitHubErrorKind::AuthenticationExpired);
    assert_eq!(fake.call_count("create_milestone"), 1);
    let events = drain(events).await;
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Failed { kind: GitHubErrorKind::AuthenticationExpired, .. })
    ));
}

#[tokio::test]
async fn test_same_repository_is_locked_while_other_proceeds() {
    let fake = FakeGitHub::new();
    let engine = engine(&fake);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    sample_document().save(&path).await.unwrap();

    let (first, first_events) = engine
        .spawn(BulkRequest::Import {
            target: "octo/demo".parse().unwrap(),
            path: path.clone(),
        })
        .unwrap();

    let err = engine
        .spawn(BulkRequest::Clear {
            target: "Octo/Demo".parse().unwrap(),
            confirmed: true,
        })
        .unwrap_err();
    assert_eq!(err.kind(), GitHubErrorKind::OperationInProgress);

    let (other, other_events) = engine
        .spawn(BulkRequest::Import {
            target: "octo/other".parse().unwrap(),
            path,
        })
        .unwrap();

    let (first_events, other_events) = tokio::join!(drain(first_events), drain(other_events));
    assert!(matches!(first_events.first(), Some(ProgressEvent::Started { .. })));
    assert!(matches!(other_events.last(), Some(ProgressEvent::Completed(_))));

    assert!(matches!(first.join().await.unwrap(), OperationSummary::Import(s) if s.issues_created == 3));
    assert!(matches!(other.join().await.unwrap(), OperationSummary::Import(s) if s.issues_created == 3));
    assert!(!engine.locks().is_locked(&RepoTarget::new("octo", "demo")));
}

#[tokio::test]
async fn test_separate_engines_contend_for_one_repository() {
    let fake = FakeGitHub::new();
    let first = Arc::new(BulkEngine::new(Arc::new(fake.clone())).with_delete_delay(Duration::ZERO));
    let second = Arc::new(BulkEngine::new(Arc::new(fake.clone())).with_delete_delay(Duration::ZERO));
    let target = RepoTarget::new("octo", "shared-between-engines");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    sample_document().save(&path).await.unwrap();

    let (running, events) = first
        .spawn(BulkRequest::Import {
            target: target.clone(),
            path,
        })
        .unwrap();

    let err = second
        .spawn(BulkRequest::Clear {
            target: target.clone(),
            confirmed: true,
        })
        .unwrap_err();
    assert_eq!(err.kind(), GitHubErrorKind::OperationInProgress);

    drain(events).await;
    assert!(matches!(running.join().await.unwrap(), OperationSummary::Import(_)));
    assert!(!second.locks().is_locked(&target));
}

#[tokio::test]
async fn test_spawned_clear_pages_and_deletes_everything() {
    let fake = FakeGitHub::new().with_node_page_size(2);
    let engine = engine(&fake);
    let target = RepoTarget::new("octo", "demo");
    engine
        .import_document(&target, &sample_document(), &Operation::silent())
        .await
        .unwrap();
    engine
        .import_document(
            &target,
            &ImportDocument {
                milestones: vec![MilestoneEntry {
                    title: "Gamma".to_string(),
                    issues: vec![issue("One", &[], &[]), issue("Two", &[], &[])],
                    ..Default::default()
                }],
            },
            &Operation::silent(),
        )
        .await
        .unwrap();
    let pr = fake.add_pull_request("octo", "demo", None, "Draft change");
    fake.clear_calls();

    let (handle, events) = engine
        .spawn(BulkRequest::Clear {
            target: target.clone(),
            confirmed: true,
        })
        .unwrap();
    let events = drain(events).await;
    let summary = match handle.join().await.unwrap() {
        OperationSummary::Clear(summary) => summary,
        other => panic!("unexpected summary {:?}", other),
    };

    assert_eq!(summary.issues_found, 5);
    assert_eq!(summary.issues_deleted, 5);
    assert_eq!(summary.milestones_found, 3);
    assert_eq!(summary.milestones_deleted, 3);
    assert!(summary.failures.is_empty());
    assert_eq!(fake.call_count("list_issue_nodes"), 3);
    assert_eq!(fake.call_count("delete_issue"), 5);

    let deleted = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::IssueDeleted { .. }))
        .count();
    assert_eq!(deleted, 5);

    // Pull requests are not issues and stay behind.
    let remaining = fake.issues("octo", "demo");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].number, pr);
    assert!(fake.milestones("octo", "demo").is_empty());
}

#[tokio::test]
async fn test_clear_keeps_going_after_item_failures() {
    let fake = FakeGitHub::new();
    let engine = engine(&fake);
    let target = RepoTarget::new("octo", "demo");
    engine
        .import_document(&target, &sample_document(), &Operation::silent())
        .await
        .unwrap();
    fake.fail_on("delete_milestone", Some("1"), GitHubErrorKind::ApiError);
    let stuck = fake.issues("octo", "demo")[0].node_id.clone().unwrap();
    fake.fail_on("delete_issue", Some(stuck.as_str()), GitHubErrorKind::QueryError);

    let summary = engine
        .clear_repository(&target, |_| true, &Operation::silent())
        .await
        .unwrap();

    assert_eq!(summary.issues_deleted, 2);
    assert_eq!(summary.milestones_deleted, 1);
    assert_eq!(summary.failures.len(), 2);
    assert_eq!(summary.failures[0].operation, "delete_issue");
    assert_eq!(summary.failures[1].operation, "delete_milestone");
}

#[tokio::test]
async fn test_declined_clear_makes_no_calls() {
    let fake = FakeGitHub::new();

    let err = engine(&fake)
        .clear_repository(&RepoTarget::new("octo", "demo"), |_| false, &Operation::silent())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), GitHubErrorKind::Cancelled);
    assert!(fake.calls().is_empty());
}
