//! Sync run reports.
//!
//! Every sync produces a [`SyncReport`]: per-record outcomes, unresolved
//! conflicts, and partial failures. The report is printed as a summary,
//! renderable as JSON or Markdown, and the latest one is kept on disk so
//! `issue-sync report` can show it after the fact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::config::ConfigManager;
use crate::conflict::Conflict;
use crate::error::SyncError;

/// A record that failed to sync, with the error rendered for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRecord {
    pub id: String,
    pub error: String,
    /// Whether retrying the sync might succeed without intervention.
    pub retryable: bool,
}

/// Unresolved conflicts for a single record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConflicts {
    pub id: String,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub timestamp: DateTime<Utc>,

    /// True when the run made no changes anywhere.
    pub dry_run: bool,

    pub succeeded: Vec<String>,
    pub failed: Vec<FailedRecord>,
    pub conflicts: Vec<RecordConflicts>,

    /// Records whose file was rewritten but whose sync metadata could not be
    /// updated afterwards. These need attention: the next sync will see stale
    /// bookkeeping.
    pub partial_failures: Vec<String>,

    /// Records removed locally because the remote deleted them.
    pub deleted: Vec<String>,
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncReport {
    pub fn new() -> Self {
        SyncReport {
            timestamp: Utc::now(),
            dry_run: false,
            succeeded: Vec::new(),
            failed: Vec::new(),
            conflicts: Vec::new(),
            partial_failures: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn record_success(&mut self, id: &str) {
        self.succeeded.push(id.to_string());
    }

    pub fn record_failure(&mut self, id: &str, error: &SyncError) {
        self.failed.push(FailedRecord {
            id: id.to_string(),
            error: format!("{error:#}"),
            retryable: error.is_retryable(),
        });
    }

    pub fn record_conflicts(&mut self, id: &str, conflicts: Vec<Conflict>) {
        if !conflicts.is_empty() {
            self.conflicts.push(RecordConflicts {
                id: id.to_string(),
                conflicts,
            });
        }
    }

    pub fn record_partial(&mut self, id: &str) {
        self.partial_failures.push(id.to_string());
    }

    pub fn record_deleted(&mut self, id: &str) {
        self.deleted.push(id.to_string());
    }

    /// Fold another report into this one. Used to combine per-batch reports
    /// from the worker pool.
    pub fn merge(&mut self, other: SyncReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.conflicts.extend(other.conflicts);
        self.partial_failures.extend(other.partial_failures);
        self.deleted.extend(other.deleted);
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.partial_failures.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize sync report")
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Sync Report\n\n");
        out.push_str(&format!(
            "- Time: {}\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if self.dry_run {
            out.push_str("- Mode: dry run (no changes written)\n");
        }
        out.push_str(&format!("- Synced: {}\n", self.succeeded.len()));
        out.push_str(&format!("- Failed: {}\n", self.failed.len()));
        out.push_str(&format!("- Conflicted: {}\n", self.conflicts.len()));
        out.push_str(&format!("- Deleted: {}\n", self.deleted.len()));

        if !self.failed.is_empty() {
            out.push_str("\n## Failures\n\n");
            for f in &self.failed {
                let tag = if f.retryable { " (retryable)" } else { "" };
                out.push_str(&format!("- `{}`: {}{tag}\n", f.id, f.error));
            }
        }

        if !self.conflicts.is_empty() {
            out.push_str("\n## Conflicts\n\n");
            for rc in &self.conflicts {
                out.push_str(&format!("### {}\n\n", rc.id));
                for c in &rc.conflicts {
                    out.push_str(&format!("- {c}\n"));
                }
                out.push('\n');
            }
        }

        if !self.partial_failures.is_empty() {
            out.push_str("\n## Partial failures\n\n");
            out.push_str("Files were updated but sync metadata was not:\n\n");
            for id in &self.partial_failures {
                out.push_str(&format!("- `{id}`\n"));
            }
        }

        out
    }

    /// Print a colored one-screen summary to stdout.
    pub fn print_summary(&self) {
        println!();
        if self.dry_run {
            println!("{}", "Dry run: no changes were made".yellow().bold());
        }
        println!("{} {}", "Synced:".green().bold(), self.succeeded.len());

        if !self.deleted.is_empty() {
            println!("{} {}", "Deleted:".normal().bold(), self.deleted.len());
        }

        if !self.conflicts.is_empty() {
            println!("{} {}", "Conflicted:".yellow().bold(), self.conflicts.len());
            for rc in &self.conflicts {
                println!("  {} ({} field(s))", rc.id.yellow(), rc.conflicts.len());
            }
            println!(
                "{}",
                "Run 'issue-sync resolve' to resolve conflicts interactively".dimmed()
            );
        }

        if !self.failed.is_empty() {
            println!("{} {}", "Failed:".red().bold(), self.failed.len());
            for f in &self.failed {
                println!("  {} {}", f.id.red(), f.error.dimmed());
            }
        }

        if !self.partial_failures.is_empty() {
            println!(
                "{} {}",
                "Partial failures:".red().bold(),
                self.partial_failures.len()
            );
            for id in &self.partial_failures {
                println!("  {} (metadata not updated)", id.red());
            }
        }
    }

    /// Persist this report as the latest one.
    pub fn save_latest(&self) -> Result<()> {
        ConfigManager::ensure_config_dir()?;
        let path = ConfigManager::last_report_path()?;
        fs::write(&path, self.to_json()?)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load the most recently saved report, if any.
    pub fn load_latest() -> Result<Option<SyncReport>> {
        let path = ConfigManager::last_report_path()?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report = serde_json::from_str(&content).context("failed to parse saved report")?;
        Ok(Some(report))
    }
}
