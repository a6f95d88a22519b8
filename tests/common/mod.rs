//! Shared fixtures for integration tests.

use std::path::{Path, PathBuf};
use std::process::Command;

use autoclaude::domain::models::config::PathsConfig;
use autoclaude::domain::models::plan::PlanFile;
use tempfile::TempDir;

/// A scratch git repository with an initial commit on `main`.
pub struct GitFixture {
    dir: TempDir,
    pub paths: PathsConfig,
}

// Not every test binary exercises every helper.
#[allow(dead_code)]
impl GitFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create tempdir");
        let fixture = Self {
            dir,
            paths: PathsConfig::default(),
        };
        fixture.git(&["init", "-q"]);
        fixture.git(&["checkout", "-q", "-b", "main"]);
        fixture.git(&["config", "user.email", "tests@example.com"]);
        fixture.git(&["config", "user.name", "Integration Tests"]);
        fixture.git(&["config", "commit.gpgsign", "false"]);
        // Keep the worktrees storage area out of version control, as the
        // engine itself does, so `git add -A` never sees it.
        let exclude = fixture.dir.path().join(".git/info/exclude");
        std::fs::create_dir_all(exclude.parent().unwrap()).expect("create info dir");
        std::fs::write(&exclude, ".autoclaude/worktrees/\n").expect("write exclude");
        fixture.write_file("README.md", "# fixture\n");
        fixture.commit_all("initial commit");
        fixture
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run git in the repository root, panicking on failure.
    pub fn git(&self, args: &[&str]) -> String {
        self.git_in(self.dir.path(), args)
    }

    /// Run git in an arbitrary directory, panicking on failure.
    pub fn git_in(&self, cwd: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("run git");
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).into_owned()
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, content).expect("write file");
    }

    pub fn read_file(&self, rel: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(rel)).expect("read file")
    }

    pub fn commit_all(&self, message: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
    }

    pub fn current_branch(&self) -> String {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .trim()
            .to_string()
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"]).trim().to_string()
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")])
            .current_dir(self.dir.path())
            .status()
            .expect("run git")
            .success()
    }

    pub fn spec_dir(&self, spec_id: &str) -> PathBuf {
        self.paths.spec_dir(self.dir.path(), spec_id)
    }

    pub fn worktree_dir(&self, spec_id: &str) -> PathBuf {
        self.paths.worktree_dir(self.dir.path(), spec_id)
    }

    /// Create the task's isolated worktree on its `auto-claude/<id>` branch,
    /// branched from `main`. Returns the worktree path.
    pub fn create_task_worktree(&self, spec_id: &str) -> PathBuf {
        let worktree = self.worktree_dir(spec_id);
        std::fs::create_dir_all(worktree.parent().expect("worktrees root"))
            .expect("create worktrees root");
        let branch = self.paths.branch_name(spec_id);
        let worktree_str = worktree.to_string_lossy().into_owned();
        self.git(&["worktree", "add", "-q", "-b", &branch, &worktree_str, "main"]);
        worktree
    }

    /// Commit a file change inside the task's worktree.
    pub fn commit_in_worktree(&self, spec_id: &str, rel: &str, content: &str, message: &str) {
        let worktree = self.worktree_dir(spec_id);
        let path = worktree.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, content).expect("write worktree file");
        self.git_in(&worktree, &["add", "-A"]);
        self.git_in(&worktree, &["commit", "-q", "-m", message]);
    }

    pub fn write_plan(&self, spec_id: &str, plan: &PlanFile) {
        let spec_dir = self.spec_dir(spec_id);
        std::fs::create_dir_all(&spec_dir).expect("create spec dir");
        let json = serde_json::to_vec_pretty(plan).expect("serialize plan");
        std::fs::write(PlanFile::path_in(&spec_dir), json).expect("write plan");
    }

    pub fn read_plan(&self, spec_id: &str) -> PlanFile {
        let bytes =
            std::fs::read(PlanFile::path_in(&self.spec_dir(spec_id))).expect("read plan");
        serde_json::from_slice(&bytes).expect("parse plan")
    }
}
