//! Thin wrapper over the `git` CLI.
//!
//! Used in two places: the baseline reconstructor reads commit history and
//! historical file contents, and the plain-git remote backend stages, commits,
//! and pushes record files. History queries are strictly read-only; the
//! baseline reconstructor never writes commits.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Handle to a git working directory, driven through the git CLI.
pub struct GitRepo {
    workdir: PathBuf,
}

impl GitRepo {
    /// Open an existing repository.
    pub fn open(path: &Path) -> Result<Self> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if !path.join(".git").exists() {
            return Err(anyhow!(
                "not a git repository: '{}' (no .git directory)",
                path.display()
            ));
        }

        Ok(Self { workdir: path })
    }

    /// Initialize a new repository.
    pub fn init(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory '{}'", path.display()))?;

        let output = Command::new("git")
            .args(["init"])
            .current_dir(path)
            .output()
            .context("failed to run 'git init'")?;

        if !output.status.success() {
            return Err(anyhow!(
                "git init failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        // Configure user name and email if not set
        let _ = Command::new("git")
            .args(["config", "user.name", "issue-sync"])
            .current_dir(path)
            .output();
        let _ = Command::new("git")
            .args(["config", "user.email", "issue-sync@local"])
            .current_dir(path)
            .output();

        Self::open(path)
    }

    /// Clone a remote repository.
    pub fn clone(url: &str, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for '{}'", path.display())
            })?;
        }

        let output = Command::new("git")
            .args(["clone", url, &path.to_string_lossy()])
            .output()
            .context("failed to run 'git clone'")?;

        if !output.status.success() {
            return Err(anyhow!(
                "git clone failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let repo = Self::open(path)?;
        let _ = Command::new("git")
            .args(["config", "user.name", "issue-sync"])
            .current_dir(&repo.workdir)
            .output();
        let _ = Command::new("git")
            .args(["config", "user.email", "issue-sync@local"])
            .current_dir(&repo.workdir)
            .output();
        Ok(repo)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run a git command and return stdout as a string.
    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("failed to run 'git {}'", args.join(" ")))?;

        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a git command, returning Ok if it succeeds (ignoring stdout).
    fn run_git_ok(&self, args: &[&str]) -> Result<()> {
        self.run_git(args)?;
        Ok(())
    }

    /// Check if a git command succeeds (exit code 0).
    fn git_succeeds(&self, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Path relative to the working directory, as git wants it.
    fn rel_path(&self, path: &Path) -> PathBuf {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        path.strip_prefix(&self.workdir)
            .map(Path::to_path_buf)
            .unwrap_or(path)
    }

    pub fn current_branch(&self) -> Result<String> {
        self.run_git(&["branch", "--show-current"])
    }

    pub fn stage_all(&self) -> Result<()> {
        self.run_git_ok(&["add", "-A"])
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        self.run_git_ok(&["commit", "-m", message])
    }

    pub fn has_changes(&self) -> Result<bool> {
        let output = self.run_git(&["status", "--porcelain"])?;
        Ok(!output.is_empty())
    }

    pub fn has_remote(&self, name: &str) -> bool {
        self.git_succeeds(&["remote", "get-url", name])
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.run_git_ok(&["remote", "add", name, url])
    }

    /// Check that a remote is reachable without fetching anything.
    pub fn remote_reachable(&self, name: &str) -> bool {
        self.git_succeeds(&["ls-remote", "--exit-code", name, "HEAD"])
    }

    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let output = Command::new("git")
            .args(["push", remote, branch])
            .current_dir(&self.workdir)
            .output()
            .context("failed to run 'git push'")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("failed to push to remote '{remote}': {stderr}"));
        }

        Ok(())
    }

    pub fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        // Force a merge so diverged branches reconcile regardless of the
        // user's pull.rebase setting.
        let output = Command::new("git")
            .args(["pull", "--no-rebase", remote, branch])
            .current_dir(&self.workdir)
            .output()
            .context("failed to run 'git pull'")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("failed to pull from remote '{remote}': {stderr}"));
        }

        Ok(())
    }

    /// Hash of the most recent commit touching `path` at or before `timestamp`.
    ///
    /// Returns `None` when no such revision exists, including shallow or
    /// rewritten history, which degrades to "no baseline" rather than an error.
    pub fn rev_before(&self, timestamp: DateTime<Utc>, path: &Path) -> Option<String> {
        let rel = self.rel_path(path);
        let before = timestamp.to_rfc3339();
        let result = self.run_git(&[
            "log",
            "-1",
            "--format=%H",
            &format!("--before={before}"),
            "--",
            &rel.to_string_lossy(),
        ]);

        match result {
            Ok(hash) if !hash.is_empty() => Some(hash),
            Ok(_) => None,
            Err(e) => {
                log::debug!("history query failed for {}: {e:#}", rel.display());
                None
            }
        }
    }

    /// File contents at a given revision, or `None` if the path did not exist
    /// there (or the revision is unavailable).
    pub fn show_at(&self, rev: &str, path: &Path) -> Option<String> {
        let rel = self.rel_path(path);
        // git's rev:path syntax wants forward slashes
        let spec = format!("{rev}:{}", rel.to_string_lossy().replace('\\', "/"));
        match self.run_git(&["show", &spec]) {
            Ok(content) => Some(content),
            Err(e) => {
                log::debug!("git show {spec} failed: {e:#}");
                None
            }
        }
    }

    /// Commit time of the most recent commit touching `path`.
    pub fn last_commit_time(&self, path: &Path) -> Option<DateTime<Utc>> {
        let rel = self.rel_path(path);
        let output = self
            .run_git(&["log", "-1", "--format=%cI", "--", &rel.to_string_lossy()])
            .ok()?;
        if output.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(&output)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_and_open() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::init(temp.path()).unwrap();

        assert!(temp.path().join(".git").exists());
        assert_eq!(repo.workdir(), temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_open_non_repo_fails() {
        let temp = TempDir::new().unwrap();
        assert!(GitRepo::open(temp.path()).is_err());
    }

    #[test]
    fn test_stage_commit_and_show() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::init(temp.path()).unwrap();

        let file = temp.path().join("note.md");
        std::fs::write(&file, "first\n").unwrap();
        repo.stage_all().unwrap();
        repo.commit("first").unwrap();

        std::fs::write(&file, "second\n").unwrap();
        repo.stage_all().unwrap();
        repo.commit("second").unwrap();

        assert!(!repo.has_changes().unwrap());

        let rev = repo.rev_before(Utc::now(), &file).unwrap();
        assert_eq!(repo.show_at(&rev, &file).unwrap(), "second");
    }

    #[test]
    fn test_rev_before_missing_path() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::init(temp.path()).unwrap();
        assert!(repo
            .rev_before(Utc::now(), &temp.path().join("absent.md"))
            .is_none());
    }

    #[test]
    fn test_last_commit_time() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::init(temp.path()).unwrap();

        let file = temp.path().join("note.md");
        std::fs::write(&file, "hello\n").unwrap();
        repo.stage_all().unwrap();
        repo.commit("add note").unwrap();

        let time = repo.last_commit_time(&file).unwrap();
        assert!((Utc::now() - time).num_seconds().abs() < 120);
    }
}
