//! Plain-git remote backend.
//!
//! The remote is just another git repository holding the same record file
//! layout. We keep a long-lived clone under the user config directory, pull
//! before reading, and commit-and-push after writing. Network failures map to
//! transient errors so they get the same retry treatment as forge rate limits.
//!
//! Field coverage: full; record files round-trip every tracked field.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use walkdir::WalkDir;

use super::{RemoteBackend, RemoteRecord};
use crate::config::{ConfigManager, WorkspaceConfig};
use crate::error::SyncError;
use crate::git::GitRepo;
use crate::record::Record;
use crate::report::SyncReport;

#[derive(Debug, Clone)]
pub struct GitRemoteConfig {
    /// Clone URL (SSH, HTTPS, or a local path).
    pub url: String,
    /// Branch to pull from and push to.
    pub branch: String,
    /// Where the local clone of the remote lives.
    pub clone_dir: PathBuf,
    /// Record directories to scan inside the clone.
    pub record_dirs: Vec<String>,
}

impl GitRemoteConfig {
    pub fn from_workspace(config: &WorkspaceConfig) -> Result<Self, SyncError> {
        let url = config
            .remote
            .url
            .clone()
            .ok_or_else(|| SyncError::Remote("git backend requires remote.url".to_string()))?;

        let clone_dir = ConfigManager::default_clone_dir().map_err(SyncError::Other)?;

        Ok(GitRemoteConfig {
            url,
            branch: config.remote.branch.clone(),
            clone_dir,
            record_dirs: config.record_dirs.clone(),
        })
    }
}

pub struct GitBackend {
    config: GitRemoteConfig,
    repo: GitRepo,
    /// Pushes arrive from parallel workers but share one clone; the git index
    /// and the upstream ref must never see interleaved updates.
    write_lock: Mutex<()>,
}

impl GitBackend {
    /// Open the existing clone, or create it on first use.
    pub fn open_or_clone(config: GitRemoteConfig) -> Result<Self, SyncError> {
        let repo = if config.clone_dir.join(".git").exists() {
            GitRepo::open(&config.clone_dir).map_err(SyncError::Other)?
        } else {
            log::info!(
                "cloning {} into {}",
                config.url,
                config.clone_dir.display()
            );
            GitRepo::clone(&config.url, &config.clone_dir)
                .map_err(|e| SyncError::TransientRemote(format!("clone failed: {e:#}")))?
        };

        if !repo.has_remote("origin") {
            repo.add_remote("origin", &config.url)
                .map_err(SyncError::Other)?;
        }

        Ok(GitBackend {
            config,
            repo,
            write_lock: Mutex::new(()),
        })
    }

    /// Where a record lives inside the clone.
    fn record_path(&self, record: &Record) -> PathBuf {
        self.repo
            .workdir()
            .join(record.kind.dir_name())
            .join(format!("{}.md", record.id))
    }

    fn refresh(&self) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().unwrap();
        self.repo
            .pull("origin", &self.config.branch)
            .map_err(|e| SyncError::TransientRemote(format!("pull failed: {e:#}")))
    }
}

impl RemoteBackend for GitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    fn authenticate(&self) -> Result<(), SyncError> {
        if self.repo.remote_reachable("origin") {
            Ok(())
        } else {
            Err(SyncError::BackendAuth(format!(
                "remote '{}' is not reachable (check the URL and your SSH/HTTPS credentials)",
                self.config.url
            )))
        }
    }

    fn fetch_all(&self) -> Result<Vec<RemoteRecord>, SyncError> {
        self.refresh()?;

        let mut records = Vec::new();
        for dir in &self.config.record_dirs {
            let root = self.repo.workdir().join(dir);
            if !root.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
            {
                let path = entry.path();
                let record = match Record::from_file(path) {
                    Ok(record) => record,
                    Err(e) => {
                        log::warn!("skipping unparseable remote file {}: {e:#}", path.display());
                        continue;
                    }
                };

                let last_updated = self.repo.last_commit_time(path);
                records.push(RemoteRecord {
                    id: record.id,
                    kind: record.kind,
                    fields: record.fields,
                    last_updated,
                });
            }
        }

        log::debug!("fetched {} records from git remote", records.len());
        Ok(records)
    }

    fn push(&self, record: &Record) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().unwrap();

        let path = self.record_path(record);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        // The remote copy carries no sync bookkeeping; that stays local.
        let mut remote_copy = record.clone();
        remote_copy.sync = Default::default();
        let text = remote_copy.render().map_err(SyncError::Other)?;
        fs::write(&path, text).map_err(|e| SyncError::Write {
            path: path.clone(),
            source: e,
        })?;

        self.repo.stage_all().map_err(SyncError::Other)?;
        if self.repo.has_changes().map_err(SyncError::Other)? {
            self.repo
                .commit(&format!("sync {} {}", record.kind, record.id))
                .map_err(SyncError::Other)?;
        }

        if let Err(e) = self.repo.push("origin", &self.config.branch) {
            // The upstream ref may have advanced since the last pull;
            // reconcile and try once more before reporting transient.
            log::debug!("push rejected, pulling and retrying: {e:#}");
            self.repo
                .pull("origin", &self.config.branch)
                .map_err(|e| SyncError::TransientRemote(format!("pull failed: {e:#}")))?;
            self.repo
                .push("origin", &self.config.branch)
                .map_err(|e| SyncError::TransientRemote(format!("push failed: {e:#}")))?;
        }
        Ok(())
    }

    fn pull(&self) -> Result<SyncReport, SyncError> {
        let records = self.fetch_all()?;
        let mut report = SyncReport::new();
        for record in &records {
            report.record_success(&record.id);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordKind, TrackedFields};
    use tempfile::TempDir;

    /// Bare upstream plus a working clone seeded with one commit, so pulls
    /// and pushes have something real to talk to.
    fn backend_with_upstream() -> (TempDir, GitBackend) {
        let temp = TempDir::new().unwrap();
        let upstream = temp.path().join("upstream.git");

        let out = std::process::Command::new("git")
            .args(["init", "--bare", "-b", "main", &upstream.to_string_lossy()])
            .output()
            .unwrap();
        assert!(out.status.success());

        // Seed the upstream through a scratch clone. The clone of an empty
        // repository inherits the local default branch name, so pin it.
        let seed = temp.path().join("seed");
        let seed_repo = GitRepo::clone(&upstream.to_string_lossy(), &seed).unwrap();
        let out = std::process::Command::new("git")
            .args(["checkout", "-B", "main"])
            .current_dir(&seed)
            .output()
            .unwrap();
        assert!(out.status.success());
        fs::create_dir_all(seed.join("issues")).unwrap();
        let record = Record::new(
            "ISSUE-1",
            RecordKind::Issue,
            TrackedFields {
                title: "Seed".to_string(),
                status: "open".to_string(),
                ..Default::default()
            },
        );
        fs::write(
            seed.join("issues").join("ISSUE-1.md"),
            record.render().unwrap(),
        )
        .unwrap();
        seed_repo.stage_all().unwrap();
        seed_repo.commit("seed").unwrap();
        seed_repo.push("origin", "main").unwrap();

        let config = GitRemoteConfig {
            url: upstream.to_string_lossy().to_string(),
            branch: "main".to_string(),
            clone_dir: temp.path().join("clone"),
            record_dirs: vec!["issues".to_string(), "milestones".to_string()],
        };
        let backend = GitBackend::open_or_clone(config).unwrap();
        (temp, backend)
    }

    #[test]
    fn test_fetch_all_reads_seeded_records() {
        let (_temp, backend) = backend_with_upstream();

        backend.authenticate().unwrap();
        let records = backend.fetch_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "ISSUE-1");
        assert_eq!(records[0].fields.title, "Seed");
        assert!(records[0].last_updated.is_some());
    }

    #[test]
    fn test_push_round_trips_through_upstream() {
        let (_temp, backend) = backend_with_upstream();

        let mut record = Record::new(
            "ISSUE-2",
            RecordKind::Issue,
            TrackedFields {
                title: "Pushed".to_string(),
                status: "open".to_string(),
                content: "body".to_string(),
                ..Default::default()
            },
        );
        record.sync.last_synced = Some(chrono::Utc::now());

        backend.push(&record).unwrap();

        let records = backend.fetch_all().unwrap();
        let pushed = records.iter().find(|r| r.id == "ISSUE-2").unwrap();
        assert_eq!(pushed.fields.title, "Pushed");
        assert_eq!(pushed.fields.content, "body");
    }

    #[test]
    fn test_concurrent_pushes_all_land() {
        use std::sync::Arc;

        let (_temp, backend) = backend_with_upstream();
        let backend = Arc::new(backend);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let backend = Arc::clone(&backend);
                std::thread::spawn(move || {
                    let record = Record::new(
                        format!("PUSH-{i}"),
                        RecordKind::Issue,
                        TrackedFields {
                            title: format!("Record {i}"),
                            status: "open".to_string(),
                            ..Default::default()
                        },
                    );
                    backend.push(&record).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let records = backend.fetch_all().unwrap();
        for i in 0..6 {
            assert!(
                records.iter().any(|r| r.id == format!("PUSH-{i}")),
                "PUSH-{i} missing from upstream"
            );
        }
    }

    #[test]
    fn test_push_recovers_when_upstream_advanced() {
        let (temp, backend) = backend_with_upstream();

        // Advance the upstream from a second clone so the backend's clone
        // falls behind.
        let other = temp.path().join("other");
        let other_repo = GitRepo::clone(&backend.config.url, &other).unwrap();
        fs::create_dir_all(other.join("issues")).unwrap();
        let outside = Record::new(
            "ISSUE-OUT",
            RecordKind::Issue,
            TrackedFields {
                title: "From elsewhere".to_string(),
                status: "open".to_string(),
                ..Default::default()
            },
        );
        fs::write(
            other.join("issues").join("ISSUE-OUT.md"),
            outside.render().unwrap(),
        )
        .unwrap();
        other_repo.stage_all().unwrap();
        other_repo.commit("outside edit").unwrap();
        other_repo.push("origin", "main").unwrap();

        let record = Record::new(
            "ISSUE-3",
            RecordKind::Issue,
            TrackedFields {
                title: "Behind".to_string(),
                status: "open".to_string(),
                ..Default::default()
            },
        );
        backend.push(&record).unwrap();

        let records = backend.fetch_all().unwrap();
        assert!(records.iter().any(|r| r.id == "ISSUE-3"));
        assert!(records.iter().any(|r| r.id == "ISSUE-OUT"));
    }

    #[test]
    fn test_authenticate_fails_for_missing_remote() {
        let temp = TempDir::new().unwrap();
        let clone_dir = temp.path().join("clone");
        let repo = GitRepo::init(&clone_dir).unwrap();
        repo.add_remote("origin", "/nonexistent/upstream.git")
            .unwrap();

        let backend = GitBackend {
            config: GitRemoteConfig {
                url: "/nonexistent/upstream.git".to_string(),
                branch: "main".to_string(),
                clone_dir,
                record_dirs: vec!["issues".to_string()],
            },
            repo,
            write_lock: Mutex::new(()),
        };

        assert!(matches!(
            backend.authenticate(),
            Err(SyncError::BackendAuth(_))
        ));
    }

    #[test]
    fn test_from_workspace_requires_url() {
        let config = WorkspaceConfig::default();
        assert!(GitRemoteConfig::from_workspace(&config).is_err());
    }
}
