//! Merge engine integration tests against real git repositories.

mod common;

use std::sync::Arc;

use autoclaude::domain::errors::OrchestratorError;
use autoclaude::domain::models::plan::{PlanFile, QaSignoff, QaStatus};
use autoclaude::domain::models::task::TaskStatus;
use autoclaude::services::event_bus::EventBus;
use autoclaude::services::merge_engine::MergeEngine;
use common::GitFixture;

fn engine(fixture: &GitFixture) -> MergeEngine {
    MergeEngine::new(fixture.paths.clone(), Arc::new(EventBus::default()))
}

#[tokio::test]
async fn test_merge_integrates_worktree_commits() {
    let fixture = GitFixture::new();
    fixture.create_task_worktree("t1");
    fixture.commit_in_worktree("t1", "src/feature.txt", "feature\n", "add feature");

    let outcome = engine(&fixture)
        .merge("t1", fixture.path(), None)
        .await
        .unwrap();

    assert!(outcome.merge_commit.is_some());
    assert_eq!(fixture.read_file("src/feature.txt"), "feature\n");
    assert_eq!(fixture.read_plan("t1").status, TaskStatus::Done);
    assert!(fixture.read_plan("t1").merged_at.is_some());
}

#[tokio::test]
async fn test_merge_is_idempotent_when_branch_contained() {
    let fixture = GitFixture::new();
    // Branch exists but has no commits beyond main
    fixture.create_task_worktree("t1");
    let head_before = fixture.head();

    let eng = engine(&fixture);
    let first = eng.merge("t1", fixture.path(), None).await.unwrap();
    assert!(first.merge_commit.is_none());
    assert!(first.message.contains("already merged"));
    assert_eq!(fixture.head(), head_before, "no commit may be created");
    assert_eq!(fixture.read_plan("t1").status, TaskStatus::Done);

    // Safe to call twice in a row
    let second = eng.merge("t1", fixture.path(), None).await.unwrap();
    assert!(second.merge_commit.is_none());
    assert_eq!(fixture.head(), head_before);
}

#[tokio::test]
async fn test_merge_auto_resolves_transient_status_conflicts() {
    let fixture = GitFixture::new();

    // Plan artifact committed on main before the branch diverges
    let mut plan = PlanFile::default();
    plan.status = TaskStatus::InProgress;
    plan.parent_branch = Some("main".to_string());
    fixture.write_plan("t1", &plan);
    fixture.commit_all("record plan");

    fixture.create_task_worktree("t1");

    // Both sides rewrite the plan file
    let mut branch_plan = plan.clone();
    branch_plan.status = TaskStatus::HumanReview;
    branch_plan.qa_signoff = Some(QaSignoff {
        status: QaStatus::Approved,
        feedback: Some("from-worktree".to_string()),
        timestamp: chrono::Utc::now(),
    });
    fixture.commit_in_worktree(
        "t1",
        ".autoclaude/specs/t1/implementation_plan.json",
        &serde_json::to_string_pretty(&branch_plan).unwrap(),
        "worktree plan update",
    );

    let mut main_plan = plan.clone();
    main_plan.status = TaskStatus::Backlog;
    fixture.write_plan("t1", &main_plan);
    fixture.commit_all("main plan update");

    let outcome = engine(&fixture)
        .merge("t1", fixture.path(), None)
        .await
        .unwrap();

    assert!(outcome.merge_commit.is_some());
    let merged = fixture.read_plan("t1");
    // Feature branch's copy won the conflict, then the merge marked it done
    assert_eq!(merged.status, TaskStatus::Done);
    assert_eq!(
        merged.qa_signoff.and_then(|qa| qa.feedback).as_deref(),
        Some("from-worktree")
    );
}

#[tokio::test]
async fn test_merge_with_real_conflict_fails_and_is_inspectable() {
    let fixture = GitFixture::new();
    fixture.write_file("src/app.txt", "base\n");
    fixture.commit_all("add app");

    fixture.create_task_worktree("t1");
    fixture.commit_in_worktree("t1", "src/app.txt", "branch change\n", "branch edit");

    fixture.write_file("src/app.txt", "main change\n");
    fixture.commit_all("main edit");

    let err = engine(&fixture)
        .merge("t1", fixture.path(), None)
        .await
        .unwrap_err();

    match err {
        OrchestratorError::MergeConflict { files, .. } => {
            assert_eq!(files, vec!["src/app.txt".to_string()]);
        }
        other => panic!("expected MergeConflict, got {other}"),
    }

    // The merge is left in place for manual resolution
    assert!(fixture.path().join(".git/MERGE_HEAD").exists());
}

#[tokio::test]
async fn test_merge_preserves_unrelated_uncommitted_changes() {
    let fixture = GitFixture::new();
    fixture.create_task_worktree("t3");
    fixture.commit_in_worktree("t3", "src/new.txt", "new\n", "add file");

    // Unrelated dirty state in the main working tree
    fixture.write_file("README.md", "# fixture\nlocal edit\n");

    let outcome = engine(&fixture)
        .merge("t3", fixture.path(), None)
        .await
        .unwrap();

    assert!(outcome.merge_commit.is_some());
    assert_eq!(fixture.read_file("src/new.txt"), "new\n");
    assert_eq!(
        fixture.read_file("README.md"),
        "# fixture\nlocal edit\n",
        "uncommitted changes must survive the merge untouched"
    );
    let stashes = fixture.git(&["stash", "list"]);
    assert!(stashes.trim().is_empty(), "no stash may be left dangling");
}

#[tokio::test]
async fn test_merge_resolves_base_from_recorded_parent_branch() {
    let fixture = GitFixture::new();
    let mut plan = PlanFile::default();
    plan.parent_branch = Some("main".to_string());
    fixture.write_plan("t1", &plan);

    fixture.create_task_worktree("t1");
    fixture.commit_in_worktree("t1", "src/from-branch.txt", "x\n", "branch work");

    // Park the main checkout on an unrelated branch
    fixture.git(&["checkout", "-q", "-b", "side"]);

    engine(&fixture).merge("t1", fixture.path(), None).await.unwrap();

    assert_eq!(fixture.current_branch(), "main");
    assert_eq!(fixture.read_file("src/from-branch.txt"), "x\n");
}

#[tokio::test]
async fn test_discard_missing_worktree_is_noop() {
    let fixture = GitFixture::new();

    let outcome = engine(&fixture)
        .discard("t4", fixture.path())
        .await
        .unwrap();

    assert!(!outcome.removed_worktree);
    assert!(!outcome.deleted_branch);
}

#[tokio::test]
async fn test_discard_removes_worktree_and_branch() {
    let fixture = GitFixture::new();
    let worktree = fixture.create_task_worktree("t1");
    assert!(worktree.exists());

    let eng = engine(&fixture);
    let outcome = eng.discard("t1", fixture.path()).await.unwrap();
    assert!(outcome.removed_worktree);
    assert!(outcome.deleted_branch);
    assert!(!worktree.exists());
    assert!(!fixture.branch_exists("auto-claude/t1"));

    // Second discard is a clean no-op
    let again = eng.discard("t1", fixture.path()).await.unwrap();
    assert!(!again.removed_worktree);
    assert!(!again.deleted_branch);
}

#[tokio::test]
async fn test_preview_reports_counts_without_mutating() {
    let fixture = GitFixture::new();
    fixture.create_task_worktree("t1");
    fixture.commit_in_worktree("t1", "src/one.txt", "1\n", "one");
    fixture.commit_in_worktree("t1", "src/two.txt", "2\n", "two");

    // Dirty state that a stash or checkout would disturb
    fixture.write_file("README.md", "# fixture\ndirty\n");
    let head_before = fixture.head();

    let preview = engine(&fixture)
        .merge_preview("t1", fixture.path())
        .await
        .unwrap();

    assert_eq!(preview.base_branch, "main");
    assert_eq!(preview.branch, "auto-claude/t1");
    assert_eq!(preview.commit_count, 2);
    assert_eq!(preview.changed_file_count, 2);

    assert_eq!(fixture.head(), head_before);
    assert_eq!(fixture.current_branch(), "main");
    assert_eq!(fixture.read_file("README.md"), "# fixture\ndirty\n");
    assert!(fixture.git(&["stash", "list"]).trim().is_empty());
}

#[tokio::test]
async fn test_worktree_diff_reports_per_file_stats() {
    let fixture = GitFixture::new();
    fixture.create_task_worktree("t1");
    fixture.commit_in_worktree("t1", "src/lines.txt", "a\nb\nc\n", "three lines");

    let files = engine(&fixture)
        .worktree_diff("t1", fixture.path())
        .await
        .unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "src/lines.txt");
    assert_eq!(files[0].additions, Some(3));
    assert_eq!(files[0].deletions, Some(0));
}

#[tokio::test]
async fn test_merge_of_unknown_branch_fails() {
    let fixture = GitFixture::new();
    let err = engine(&fixture)
        .merge("never-started", fixture.path(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Git { .. }));
}
