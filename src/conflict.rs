//! Conflict model, two-way conflict detection, and resolution strategies.
//!
//! Conflicts are ephemeral values produced by the merge or by the detector and
//! discarded once resolved; they are never persisted into record files.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::merge::RecordMerge;
use crate::record::{Field, FieldValue, Record, TrackedFields};
use crate::remote::RemoteRecord;

/// A single field whose local and remote values differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: Field,
    pub local: FieldValue,
    pub remote: FieldValue,
    /// Baseline value, when one was known at merge time. The two-way detector
    /// leaves this unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<FieldValue>,
}

impl fmt::Display for FieldConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: local={} remote={}",
            self.field, self.local, self.remote
        )
    }
}

/// A conflict surfaced to the user: either one diverged field, or a
/// record-level divergence (modified here, deleted there).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conflict {
    Field(FieldConflict),
    /// The record was deleted remotely while local changes exist.
    RemoteDeleted,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Field(c) => c.fmt(f),
            Conflict::RemoteDeleted => write!(f, "deleted remotely but modified locally"),
        }
    }
}

/// Two-way comparison of a local record against a remote snapshot.
///
/// Reports what differs *right now*, independent of any baseline: used for
/// inspection and reporting, not for deciding clean-vs-conflict during merge.
/// Every differing tracked field is reported with its exact values; neither
/// input is mutated.
pub fn detect_differences(
    local: &TrackedFields,
    remote: &TrackedFields,
    fields: &[Field],
) -> Vec<FieldConflict> {
    fields
        .iter()
        .filter_map(|&field| {
            let local_value = local.get(field);
            let remote_value = remote.get(field);
            if local_value == remote_value {
                None
            } else {
                Some(FieldConflict {
                    field,
                    local: local_value,
                    remote: remote_value,
                    base: None,
                })
            }
        })
        .collect()
}

/// How detected conflicts should be resolved, chosen per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Record unchanged; remote values discarded.
    KeepLocal,
    /// Remote snapshot adopted wholesale (for the fields the backend carries).
    KeepRemote,
    /// Per conflicting field, the strictly more recent side wins. Equal or
    /// missing timestamps resolve to local, so repeated runs are deterministic
    /// and never drop data silently.
    AutoMerge,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::KeepLocal => write!(f, "keep-local"),
            ResolutionStrategy::KeepRemote => write!(f, "keep-remote"),
            ResolutionStrategy::AutoMerge => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep-local" | "local" => Ok(ResolutionStrategy::KeepLocal),
            "keep-remote" | "remote" => Ok(ResolutionStrategy::KeepRemote),
            "auto" | "auto-merge" => Ok(ResolutionStrategy::AutoMerge),
            other => Err(anyhow::anyhow!(
                "unknown strategy '{other}' (expected keep-local, keep-remote, or auto)"
            )),
        }
    }
}

/// One conflicted record queued for resolution.
pub struct ResolveItem<'a> {
    pub local: &'a Record,
    pub remote: &'a RemoteRecord,
    pub merge: &'a RecordMerge,
}

/// Applies a resolution strategy to conflicted records.
pub struct SyncConflictResolver {
    strategy: ResolutionStrategy,
}

impl SyncConflictResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        SyncConflictResolver { strategy }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Produce the resolved tracked fields for one conflicted record.
    ///
    /// `fields` is the backend's supported field set; fields the backend
    /// cannot represent always keep their local value.
    pub fn resolve(
        &self,
        local: &Record,
        remote: &RemoteRecord,
        merge: &RecordMerge,
        fields: &[Field],
    ) -> Result<TrackedFields> {
        match self.strategy {
            ResolutionStrategy::KeepLocal => Ok(local.fields.clone()),
            ResolutionStrategy::KeepRemote => {
                let mut resolved = local.fields.clone();
                for &field in fields {
                    resolved.set(field, remote.fields.get(field));
                }
                Ok(resolved)
            }
            ResolutionStrategy::AutoMerge => {
                let remote_wins = match (local.updated, remote.last_updated) {
                    (Some(local_ts), Some(remote_ts)) => remote_ts > local_ts,
                    // A missing timestamp on either side defaults to local.
                    _ => false,
                };

                let mut resolved = merge.merged.clone();
                for conflict in &merge.conflicts {
                    let winner = if remote_wins {
                        conflict.remote.clone()
                    } else {
                        conflict.local.clone()
                    };
                    resolved.set(conflict.field, winner);
                }
                Ok(resolved)
            }
        }
    }

    /// Resolve a batch of conflicted records. A failure resolving one item is
    /// collected and does not abort the rest.
    pub fn resolve_batch<'a>(
        &self,
        items: impl IntoIterator<Item = ResolveItem<'a>>,
        fields: &[Field],
    ) -> (Vec<Record>, Vec<(String, anyhow::Error)>) {
        let mut resolved = Vec::new();
        let mut errors = Vec::new();

        for item in items {
            match self.resolve(item.local, item.remote, item.merge, fields) {
                Ok(merged_fields) => {
                    let mut record = item.local.clone();
                    record.fields = merged_fields;
                    resolved.push(record);
                }
                Err(e) => errors.push((item.local.id.clone(), e)),
            }
        }

        (resolved, errors)
    }
}
