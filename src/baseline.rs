//! Baseline reconstruction from version-control history.
//!
//! Recovers "what this file looked like at the last sync" from git history
//! instead of keeping a separate database of past states. An unavailable
//! baseline is not an error: the merge treats it as "no prior value", which
//! forces one-sided change rules and can never manufacture a spurious conflict.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::git::GitRepo;
use crate::record::Record;

/// Result of a baseline lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    /// File contents at the nearest revision at or before the timestamp.
    Content(String),
    /// No revision at or before the timestamp touches the path: the file was
    /// created later, or history is shallow/rewritten/unavailable.
    NotFound,
}

/// Reconstructs historical file contents for baseline comparison.
pub struct BaselineReconstructor {
    repo: GitRepo,
}

impl BaselineReconstructor {
    pub fn new(repo: GitRepo) -> Self {
        Self { repo }
    }

    /// Open the repository containing the workspace.
    pub fn open(root: &Path) -> Result<Self> {
        Ok(Self::new(GitRepo::open(root)?))
    }

    /// Contents of `path` as of the most recent revision at or before
    /// `timestamp`. Degrades to [`Baseline::NotFound`] on any history gap
    /// rather than raising.
    pub fn reconstruct_at(&self, path: &Path, timestamp: DateTime<Utc>) -> Baseline {
        let Some(rev) = self.repo.rev_before(timestamp, path) else {
            return Baseline::NotFound;
        };

        match self.repo.show_at(&rev, path) {
            Some(content) => Baseline::Content(content),
            None => Baseline::NotFound,
        }
    }

    /// Like [`reconstruct_at`](Self::reconstruct_at), but parses the content
    /// as a record. Unparseable historical content degrades to `None`.
    pub fn record_at(&self, path: &Path, timestamp: DateTime<Utc>) -> Option<Record> {
        match self.reconstruct_at(path, timestamp) {
            Baseline::Content(content) => match Record::parse(&content) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::debug!(
                        "baseline at {} for {} is not a parseable record: {e:#}",
                        timestamp.to_rfc3339(),
                        path.display()
                    );
                    None
                }
            },
            Baseline::NotFound => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::process::Command;
    use tempfile::TempDir;

    /// Commit everything in `dir` with a fixed commit date.
    fn commit_at(dir: &Path, message: &str, when: DateTime<Utc>) {
        let stamp = when.to_rfc3339();
        for args in [
            vec!["add", "-A"],
            vec!["commit", "-m", message],
        ] {
            let mut cmd = Command::new("git");
            cmd.args(&args)
                .current_dir(dir)
                .env("GIT_AUTHOR_DATE", &stamp)
                .env("GIT_COMMITTER_DATE", &stamp);
            let out = cmd.output().unwrap();
            assert!(
                out.status.success(),
                "git {args:?} failed: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        }
    }

    #[test]
    fn test_reconstruct_picks_revision_at_or_before_timestamp() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::init(temp.path()).unwrap();
        let file = repo.workdir().join("issue.md");

        let t1 = Utc::now() - Duration::hours(2);
        let t2 = Utc::now() - Duration::hours(1);

        std::fs::write(&file, "old contents\n").unwrap();
        commit_at(repo.workdir(), "old", t1);

        std::fs::write(&file, "new contents\n").unwrap();
        commit_at(repo.workdir(), "new", t2);

        let reconstructor = BaselineReconstructor::new(repo);

        // Between the two commits: the first one wins.
        let midpoint = t1 + Duration::minutes(30);
        assert_eq!(
            reconstructor.reconstruct_at(&file, midpoint),
            Baseline::Content("old contents".to_string())
        );

        // After both: the second one wins.
        assert_eq!(
            reconstructor.reconstruct_at(&file, Utc::now()),
            Baseline::Content("new contents".to_string())
        );

        // Before either commit: not found.
        assert_eq!(
            reconstructor.reconstruct_at(&file, t1 - Duration::hours(1)),
            Baseline::NotFound
        );
    }

    #[test]
    fn test_reconstruct_untracked_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::init(temp.path()).unwrap();
        let file = repo.workdir().join("never-committed.md");
        std::fs::write(&file, "hello\n").unwrap();

        let reconstructor = BaselineReconstructor::new(repo);
        assert_eq!(
            reconstructor.reconstruct_at(&file, Utc::now()),
            Baseline::NotFound
        );
    }

    #[test]
    fn test_record_at_parses_historical_record() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::init(temp.path()).unwrap();
        let file = repo.workdir().join("ISSUE-1.md");

        let t1 = Utc::now() - Duration::hours(1);
        std::fs::write(&file, "---\nid: ISSUE-1\ntitle: Old title\nstatus: open\n---\n").unwrap();
        commit_at(repo.workdir(), "add issue", t1);

        std::fs::write(&file, "---\nid: ISSUE-1\ntitle: New title\nstatus: open\n---\n").unwrap();

        let reconstructor = BaselineReconstructor::new(repo);
        let record = reconstructor.record_at(&file, Utc::now()).unwrap();
        assert_eq!(record.fields.title, "Old title");
    }
}
