//! Local record store.
//!
//! Records live as Markdown files with YAML front matter under the workspace's
//! record directories, one file per record. The files are the source of truth;
//! this module only discovers, loads, and atomically rewrites them.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::WorkspaceConfig;
use crate::error::SyncError;
use crate::record::{Record, RecordKind};

/// A workspace of record files rooted at a directory under version control.
pub struct Workspace {
    root: PathBuf,
    record_dirs: Vec<String>,
}

impl Workspace {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Workspace {
            root: config.root.clone(),
            record_dirs: config.record_dirs.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every record file in the workspace, sorted for deterministic order.
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for dir in &self.record_dirs {
            let root = self.root.join(dir);
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
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        paths
    }

    /// Load every parseable record. Files that fail to parse are logged and
    /// skipped so one corrupt record never blocks the rest of the workspace.
    pub fn load_all(&self) -> Vec<Record> {
        let mut records = Vec::new();
        for path in self.discover() {
            match Record::from_file(&path) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("skipping {}: {e:#}", path.display()),
            }
        }
        records
    }

    /// Canonical path for a record of the given kind and id.
    pub fn path_for(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(format!("{id}.md"))
    }

    /// Write a record to disk atomically: render to a sibling temp file, then
    /// rename over the target. Readers never observe a half-written record.
    pub fn save(&self, record: &Record) -> Result<PathBuf, SyncError> {
        let path = record
            .path
            .clone()
            .unwrap_or_else(|| self.path_for(record.kind, &record.id));

        let text = record.render().map_err(SyncError::Other)?;

        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| SyncError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;

        let tmp = path.with_extension("md.tmp");
        fs::write(&tmp, &text).map_err(|e| SyncError::Write {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &path).map_err(|e| SyncError::Write {
            path: path.clone(),
            source: e,
        })?;

        Ok(path)
    }

    /// Remove a record file. Missing files are fine; the end state is the same.
    pub fn delete(&self, record: &Record) -> Result<(), SyncError> {
        let path = record
            .path
            .clone()
            .unwrap_or_else(|| self.path_for(record.kind, &record.id));

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Write { path, source: e }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TrackedFields;
    use tempfile::TempDir;

    fn workspace(temp: &TempDir) -> Workspace {
        let mut config = WorkspaceConfig::default();
        config.root = temp.path().to_path_buf();
        Workspace::new(&config)
    }

    fn sample(id: &str) -> Record {
        Record::new(
            id,
            RecordKind::Issue,
            TrackedFields {
                title: format!("Record {id}"),
                status: "open".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);

        let record = sample("ISSUE-1");
        let path = ws.save(&record).unwrap();
        assert_eq!(path, ws.path_for(RecordKind::Issue, "ISSUE-1"));

        let loaded = ws.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "ISSUE-1");
        assert_eq!(loaded[0].fields, record.fields);
        assert_eq!(loaded[0].path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_discover_is_sorted_and_md_only() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);

        ws.save(&sample("ISSUE-2")).unwrap();
        ws.save(&sample("ISSUE-1")).unwrap();
        fs::write(temp.path().join("issues").join("notes.txt"), "not a record").unwrap();

        let paths = ws.discover();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("issues/ISSUE-1.md"));
        assert!(paths[1].ends_with("issues/ISSUE-2.md"));
    }

    #[test]
    fn test_load_all_skips_corrupt_files() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);

        ws.save(&sample("ISSUE-1")).unwrap();
        fs::write(
            temp.path().join("issues").join("broken.md"),
            "no front matter here",
        )
        .unwrap();

        let loaded = ws.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "ISSUE-1");
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        ws.save(&sample("ISSUE-1")).unwrap();

        let leftovers: Vec<_> = WalkDir::new(temp.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        assert!(ws.delete(&sample("ISSUE-404")).is_ok());
    }

    #[test]
    fn test_kinds_land_in_their_own_dirs() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);

        let milestone = Record::new(
            "M-1",
            RecordKind::Milestone,
            TrackedFields {
                title: "v1.0".to_string(),
                status: "open".to_string(),
                ..Default::default()
            },
        );
        let path = ws.save(&milestone).unwrap();
        assert!(path.ends_with("milestones/M-1.md"));
    }
}
