//! Field-level three-way merge.
//!
//! The core algorithm: for each tracked field, compare base→local and
//! base→remote independently. A difference on only one side is a safe,
//! automatically applicable change; a difference on both sides is a conflict
//! unless both sides made the identical change. Conflicts are values, not
//! errors: they are returned to the caller, never raised.

use serde::Serialize;

use crate::conflict::{Conflict, FieldConflict};
use crate::record::{Field, FieldValue, Record, TrackedFields};
use crate::remote::RemoteRecord;

/// Machine-readable explanations attached to every merge result.
pub const REASON_UNCHANGED: &str = "unchanged";
pub const REASON_ONLY_LOCAL_CHANGED: &str = "only_local_changed";
pub const REASON_ONLY_REMOTE_CHANGED: &str = "only_remote_changed";
pub const REASON_BOTH_CHANGED_IDENTICALLY: &str = "both_changed_identically";
pub const REASON_BOTH_CHANGED_DIFFERENTLY: &str = "both_changed_differently";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStatus {
    Clean,
    Conflict,
}

/// Outcome of merging a single field. `value` is populated only when the
/// merge is clean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResult {
    pub field: Field,
    pub status: MergeStatus,
    pub value: Option<FieldValue>,
    pub reason: &'static str,
}

impl MergeResult {
    fn clean(field: Field, value: FieldValue, reason: &'static str) -> Self {
        MergeResult {
            field,
            status: MergeStatus::Clean,
            value: Some(value),
            reason,
        }
    }

    fn conflict(field: Field) -> Self {
        MergeResult {
            field,
            status: MergeStatus::Conflict,
            value: None,
            reason: REASON_BOTH_CHANGED_DIFFERENTLY,
        }
    }
}

/// Merge one field given its base, local, and remote values.
///
/// Pure: identical inputs always produce identical output, including the
/// reason string. An unknown baseline is passed as [`FieldValue::Absent`],
/// which reduces every difference to a one-sided change.
pub fn merge_field(
    field: Field,
    base: &FieldValue,
    local: &FieldValue,
    remote: &FieldValue,
) -> MergeResult {
    let local_changed = local != base;
    let remote_changed = remote != base;

    match (local_changed, remote_changed) {
        (false, false) => MergeResult::clean(field, base.clone(), REASON_UNCHANGED),
        (true, false) => MergeResult::clean(field, local.clone(), REASON_ONLY_LOCAL_CHANGED),
        (false, true) => MergeResult::clean(field, remote.clone(), REASON_ONLY_REMOTE_CHANGED),
        (true, true) if local == remote => {
            MergeResult::clean(field, local.clone(), REASON_BOTH_CHANGED_IDENTICALLY)
        }
        (true, true) => MergeResult::conflict(field),
    }
}

/// Result of merging every tracked field of one record.
///
/// Clean fields are applied to `merged`; conflicting fields keep their local
/// value in the struct (the record is not written while conflicted) and are
/// reported in `conflicts`.
#[derive(Debug)]
pub struct RecordMerge {
    pub merged: TrackedFields,
    pub results: Vec<MergeResult>,
    pub conflicts: Vec<FieldConflict>,
}

impl RecordMerge {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Apply [`merge_field`] to each of the given fields.
///
/// `base` of `None` means the baseline is unknown for the whole record;
/// `fields` is the set the backend can represent; fields the remote system
/// cannot carry are skipped entirely rather than treated as value changes.
pub fn merge_record(
    base: Option<&TrackedFields>,
    local: &TrackedFields,
    remote: &TrackedFields,
    fields: &[Field],
) -> RecordMerge {
    let mut merged = local.clone();
    let mut results = Vec::with_capacity(fields.len());
    let mut conflicts = Vec::new();

    for &field in fields {
        let base_value = base.map(|b| b.get(field)).unwrap_or(FieldValue::Absent);
        let local_value = local.get(field);
        let remote_value = remote.get(field);

        let result = merge_field(field, &base_value, &local_value, &remote_value);
        match result.status {
            MergeStatus::Clean => {
                if let Some(value) = result.value.clone() {
                    merged.set(field, value);
                }
            }
            MergeStatus::Conflict => {
                conflicts.push(FieldConflict {
                    field,
                    local: local_value,
                    remote: remote_value,
                    base: base.map(|b| b.get(field)),
                });
            }
        }
        results.push(result);
    }

    RecordMerge {
        merged,
        results,
        conflicts,
    }
}

/// Per-record outcome of a batch merge.
#[derive(Debug)]
pub enum MergeOutcome {
    /// Record exists on both sides (or only remotely changed): field merge ran.
    Merged(RecordMerge),
    /// Record has no remote counterpart and no baseline: it was created
    /// locally and has never been synced.
    LocalOnly,
    /// Remote deleted the record and local made no changes: delete locally.
    DeleteLocal,
    /// Remote deleted the record but local modified it: a single record-level
    /// conflict, never per-field conflicts.
    RemoteDeletedConflict,
}

/// One record's inputs to [`merge_batch`].
pub struct BatchItem<'a> {
    pub local: &'a Record,
    pub base: Option<&'a TrackedFields>,
    pub remote: Option<&'a RemoteRecord>,
}

/// Merge a collection of records, handling remote-side deletion.
///
/// A record absent from the remote fetch whose baseline existed is treated as
/// remotely deleted: if local made no changes it is deleted locally, otherwise
/// a record-level conflict is surfaced and the record is kept.
pub fn merge_batch<'a>(
    items: impl IntoIterator<Item = BatchItem<'a>>,
    fields: &[Field],
) -> Vec<(String, MergeOutcome)> {
    items
        .into_iter()
        .map(|item| {
            let outcome = merge_one(item.local, item.base, item.remote, fields);
            (item.local.id.clone(), outcome)
        })
        .collect()
}

/// Merge a single record, classifying tombstones.
pub fn merge_one(
    local: &Record,
    base: Option<&TrackedFields>,
    remote: Option<&RemoteRecord>,
    fields: &[Field],
) -> MergeOutcome {
    match (remote, base) {
        (Some(remote), base) => {
            MergeOutcome::Merged(merge_record(base, &local.fields, &remote.fields, fields))
        }
        (None, Some(base)) => {
            if local.fields.same_fields(base, fields) {
                MergeOutcome::DeleteLocal
            } else {
                MergeOutcome::RemoteDeletedConflict
            }
        }
        (None, None) => MergeOutcome::LocalOnly,
    }
}

/// Convenience constructor for the record-level deletion conflict.
pub fn remote_deleted_conflict() -> Vec<Conflict> {
    vec![Conflict::RemoteDeleted]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use rstest::rstest;

    fn text(s: &str) -> FieldValue {
        FieldValue::text(s)
    }

    #[rstest]
    #[case(text("a"), text("a"), text("a"), MergeStatus::Clean, Some(text("a")), REASON_UNCHANGED)]
    #[case(text("a"), text("b"), text("a"), MergeStatus::Clean, Some(text("b")), REASON_ONLY_LOCAL_CHANGED)]
    #[case(text("a"), text("a"), text("b"), MergeStatus::Clean, Some(text("b")), REASON_ONLY_REMOTE_CHANGED)]
    #[case(text("a"), text("b"), text("b"), MergeStatus::Clean, Some(text("b")), REASON_BOTH_CHANGED_IDENTICALLY)]
    #[case(text("a"), text("b"), text("c"), MergeStatus::Conflict, None, REASON_BOTH_CHANGED_DIFFERENTLY)]
    fn test_merge_field_truth_table(
        #[case] base: FieldValue,
        #[case] local: FieldValue,
        #[case] remote: FieldValue,
        #[case] status: MergeStatus,
        #[case] value: Option<FieldValue>,
        #[case] reason: &'static str,
    ) {
        let result = merge_field(Field::Status, &base, &local, &remote);
        assert_eq!(result.status, status);
        assert_eq!(result.value, value);
        assert_eq!(result.reason, reason);
    }

    #[test]
    fn test_merge_field_is_deterministic() {
        let base = text("todo");
        let local = text("doing");
        let remote = text("done");

        let first = merge_field(Field::Status, &base, &local, &remote);
        let second = merge_field(Field::Status, &base, &local, &remote);
        assert_eq!(first, second);
    }

    #[test]
    fn test_noop_invariant_for_every_field_kind() {
        let mut labels = std::collections::BTreeSet::new();
        labels.insert("bug".to_string());

        for value in [
            FieldValue::Absent,
            text(""),
            text("hello"),
            FieldValue::Labels(labels),
            FieldValue::Date(chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
        ] {
            let result = merge_field(Field::Labels, &value, &value, &value);
            assert_eq!(result.status, MergeStatus::Clean);
            assert_eq!(result.value, Some(value));
            assert_eq!(result.reason, REASON_UNCHANGED);
        }
    }

    #[test]
    fn test_unknown_base_never_conflicts_on_one_sided_values() {
        // Local has a value, remote does not: with no baseline this reads as
        // "only local changed" and must not conflict.
        let result = merge_field(
            Field::Assignee,
            &FieldValue::Absent,
            &text("alice"),
            &FieldValue::Absent,
        );
        assert_eq!(result.status, MergeStatus::Clean);
        assert_eq!(result.value, Some(text("alice")));
    }

    #[test]
    fn test_conflict_value_is_unset() {
        let result = merge_field(Field::Assignee, &text("alice"), &text("bob"), &text("carol"));
        assert_eq!(result.status, MergeStatus::Conflict);
        assert!(result.value.is_none());
    }

    #[test]
    fn test_merge_record_clean_pull() {
        let base = TrackedFields {
            status: "todo".to_string(),
            ..Default::default()
        };
        let local = base.clone();
        let remote = TrackedFields {
            status: "in-progress".to_string(),
            ..Default::default()
        };

        let merge = merge_record(Some(&base), &local, &remote, &Field::ALL);
        assert!(merge.is_clean());
        assert_eq!(merge.merged.status, "in-progress");
    }

    #[test]
    fn test_merge_record_true_conflict_omits_field() {
        let base = TrackedFields {
            assignee: Some("alice".to_string()),
            ..Default::default()
        };
        let local = TrackedFields {
            assignee: Some("bob".to_string()),
            ..Default::default()
        };
        let remote = TrackedFields {
            assignee: Some("carol".to_string()),
            ..Default::default()
        };

        let merge = merge_record(Some(&base), &local, &remote, &Field::ALL);
        assert_eq!(merge.conflicts.len(), 1);
        assert_eq!(merge.conflicts[0].field, Field::Assignee);
        assert_eq!(merge.conflicts[0].local, text("bob"));
        assert_eq!(merge.conflicts[0].remote, text("carol"));

        // The conflicted field is not part of the merged semantics; all clean
        // fields still merged.
        let conflicted_result = merge
            .results
            .iter()
            .find(|r| r.field == Field::Assignee)
            .unwrap();
        assert!(conflicted_result.value.is_none());
    }

    #[test]
    fn test_merge_record_skips_unsupported_fields() {
        let base = TrackedFields::default();
        let local = TrackedFields {
            due_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 1),
            ..Default::default()
        };
        // Remote cannot represent due_date; absence must not read as deletion.
        let remote = TrackedFields::default();

        let supported: Vec<Field> = Field::ALL
            .iter()
            .copied()
            .filter(|f| *f != Field::DueDate)
            .collect();
        let merge = merge_record(Some(&base), &local, &remote, &supported);
        assert!(merge.is_clean());
        assert_eq!(
            merge.merged.due_date,
            chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
        );
    }

    fn record(id: &str, fields: TrackedFields) -> Record {
        Record::new(id, RecordKind::Issue, fields)
    }

    #[test]
    fn test_merge_batch_remote_deletion_without_local_edit() {
        let base = TrackedFields {
            title: "T".to_string(),
            ..Default::default()
        };
        let local = record("ISSUE-1", base.clone());

        let outcomes = merge_batch(
            [BatchItem {
                local: &local,
                base: Some(&base),
                remote: None,
            }],
            &Field::ALL,
        );
        assert!(matches!(outcomes[0].1, MergeOutcome::DeleteLocal));
    }

    #[test]
    fn test_merge_batch_remote_deletion_with_local_edit() {
        let base = TrackedFields {
            title: "T".to_string(),
            ..Default::default()
        };
        let local = record(
            "ISSUE-1",
            TrackedFields {
                title: "T (edited)".to_string(),
                ..Default::default()
            },
        );

        let outcomes = merge_batch(
            [BatchItem {
                local: &local,
                base: Some(&base),
                remote: None,
            }],
            &Field::ALL,
        );
        assert!(matches!(
            outcomes[0].1,
            MergeOutcome::RemoteDeletedConflict
        ));
    }

    #[test]
    fn test_merge_batch_local_only_record() {
        let local = record("ISSUE-9", TrackedFields::default());
        let outcomes = merge_batch(
            [BatchItem {
                local: &local,
                base: None,
                remote: None,
            }],
            &Field::ALL,
        );
        assert!(matches!(outcomes[0].1, MergeOutcome::LocalOnly));
    }
}
