use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// The kind of a tracked record. Issues, milestones, and projects are
/// structurally identical as far as sync is concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[default]
    Issue,
    Milestone,
    Project,
}

impl RecordKind {
    /// Directory name records of this kind live under.
    pub fn dir_name(self) -> &'static str {
        match self {
            RecordKind::Issue => "issues",
            RecordKind::Milestone => "milestones",
            RecordKind::Project => "projects",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Issue => write!(f, "issue"),
            RecordKind::Milestone => write!(f, "milestone"),
            RecordKind::Project => write!(f, "project"),
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "issue" => Ok(RecordKind::Issue),
            "milestone" => Ok(RecordKind::Milestone),
            "project" => Ok(RecordKind::Project),
            other => Err(anyhow!("unknown record kind: {other}")),
        }
    }
}

/// The set of fields the merge operates on, one variant per tracked field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Status,
    Assignee,
    Priority,
    Labels,
    Content,
    Milestone,
    DueDate,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Title,
        Field::Status,
        Field::Assignee,
        Field::Priority,
        Field::Labels,
        Field::Content,
        Field::Milestone,
        Field::DueDate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Status => "status",
            Field::Assignee => "assignee",
            Field::Priority => "priority",
            Field::Labels => "labels",
            Field::Content => "content",
            Field::Milestone => "milestone",
            Field::DueDate => "due_date",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single tracked-field value, compared with deep equality during merge.
///
/// `Absent` is distinct from an empty string: an unset assignee and an
/// assignee explicitly set to `""` are different values and must never be
/// conflated when detecting conflicts. Tagged serialization keeps a text
/// value that happens to look like a date from coming back as `Date` when a
/// saved report is reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Absent,
    Date(NaiveDate),
    Labels(BTreeSet<String>),
    Text(String),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    fn from_opt(value: Option<&String>) -> Self {
        match value {
            Some(s) => FieldValue::Text(s.clone()),
            None => FieldValue::Absent,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Absent => write!(f, "(none)"),
            FieldValue::Date(d) => write!(f, "{d}"),
            FieldValue::Labels(labels) => {
                let joined: Vec<&str> = labels.iter().map(String::as_str).collect();
                write!(f, "[{}]", joined.join(", "))
            }
            FieldValue::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

/// The tracked fields of a record, everything the three-way merge looks at.
///
/// `content` is the free-text Markdown body; the remaining fields live in the
/// YAML header. A full `TrackedFields` snapshot is also what gets stored as
/// the remote baseline in [`SyncMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFields {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,

    /// Markdown body. Stored after the front matter, not inside it, except in
    /// baseline snapshots where the whole struct is serialized.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl TrackedFields {
    /// Get a field's value. Required string fields always yield `Text`
    /// (possibly empty); optional fields yield `Absent` when unset.
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Title => FieldValue::Text(self.title.clone()),
            Field::Status => FieldValue::Text(self.status.clone()),
            Field::Assignee => FieldValue::from_opt(self.assignee.as_ref()),
            Field::Priority => FieldValue::from_opt(self.priority.as_ref()),
            Field::Labels => FieldValue::Labels(self.labels.clone()),
            Field::Content => FieldValue::Text(self.content.clone()),
            Field::Milestone => FieldValue::from_opt(self.milestone.as_ref()),
            Field::DueDate => match self.due_date {
                Some(d) => FieldValue::Date(d),
                None => FieldValue::Absent,
            },
        }
    }

    /// Set a field's value. Type-mismatched values are logged and ignored;
    /// they can only arise from a buggy backend, never from the merge itself.
    pub fn set(&mut self, field: Field, value: FieldValue) {
        match (field, value) {
            (Field::Title, FieldValue::Text(s)) => self.title = s,
            (Field::Title, FieldValue::Absent) => self.title.clear(),
            (Field::Status, FieldValue::Text(s)) => self.status = s,
            (Field::Status, FieldValue::Absent) => self.status.clear(),
            (Field::Assignee, FieldValue::Text(s)) => self.assignee = Some(s),
            (Field::Assignee, FieldValue::Absent) => self.assignee = None,
            (Field::Priority, FieldValue::Text(s)) => self.priority = Some(s),
            (Field::Priority, FieldValue::Absent) => self.priority = None,
            (Field::Labels, FieldValue::Labels(l)) => self.labels = l,
            (Field::Labels, FieldValue::Absent) => self.labels.clear(),
            (Field::Content, FieldValue::Text(s)) => self.content = s,
            (Field::Content, FieldValue::Absent) => self.content.clear(),
            (Field::Milestone, FieldValue::Text(s)) => self.milestone = Some(s),
            (Field::Milestone, FieldValue::Absent) => self.milestone = None,
            (Field::DueDate, FieldValue::Date(d)) => self.due_date = Some(d),
            (Field::DueDate, FieldValue::Absent) => self.due_date = None,
            (field, value) => {
                log::warn!("ignoring type-mismatched value for field {field}: {value:?}");
            }
        }
    }

    /// Whether the given fields are identical on both sides.
    pub fn same_fields(&self, other: &TrackedFields, fields: &[Field]) -> bool {
        fields.iter().all(|&f| self.get(f) == other.get(f))
    }
}

/// Sync bookkeeping carried in each record's header under the `sync:` block.
///
/// `remote_baseline` is the remote state that was actually reconciled against:
/// it is updated only as the final step of a successful sync for the record,
/// never guessed or partially updated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// When the most recent sync for this record completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,

    /// When the remote system last reported a change to this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// Full tracked-field snapshot as last observed from the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_baseline: Option<TrackedFields>,
}

impl SyncMetadata {
    pub fn is_empty(&self) -> bool {
        self.last_synced.is_none() && self.last_updated.is_none() && self.remote_baseline.is_none()
    }
}

/// YAML header of a record file, everything between the `---` markers.
#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    id: String,

    #[serde(default)]
    kind: RecordKind,

    #[serde(default)]
    title: String,

    #[serde(default)]
    status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    labels: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    milestone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    due_date: Option<NaiveDate>,

    /// Local edit timestamp, maintained by whatever edits the file. Used by
    /// the auto-merge strategy to compare recency against the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "SyncMetadata::is_empty")]
    sync: SyncMetadata,
}

/// A tracked record: YAML front matter plus Markdown body, stored as a file
/// under version control. The file is the single source of truth; everything
/// else (cache rows, reports) is derived.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub kind: RecordKind,
    pub fields: TrackedFields,
    /// Local edit timestamp from the header, if the editing tool maintains one.
    pub updated: Option<DateTime<Utc>>,
    pub sync: SyncMetadata,
    /// Where this record was loaded from, if it came from disk.
    pub path: Option<PathBuf>,
}

impl Record {
    /// Create a fresh record with no sync history.
    pub fn new(id: impl Into<String>, kind: RecordKind, fields: TrackedFields) -> Self {
        Record {
            id: id.into(),
            kind,
            fields,
            updated: None,
            sync: SyncMetadata::default(),
            path: None,
        }
    }

    /// Parse a record from its file representation.
    pub fn parse(text: &str) -> Result<Self> {
        let rest = text
            .strip_prefix("---")
            .ok_or_else(|| anyhow!("record does not start with a front matter marker"))?;
        let rest = rest.strip_prefix('\n').unwrap_or(rest);

        let (header, body) = match rest.split_once("\n---\n") {
            Some((header, body)) => (header, body),
            None => match rest.strip_suffix("\n---") {
                Some(header) => (header, ""),
                None => return Err(anyhow!("unterminated front matter")),
            },
        };

        let front: FrontMatter =
            serde_yaml::from_str(header).context("failed to parse record front matter")?;

        let fields = TrackedFields {
            title: front.title,
            status: front.status,
            assignee: front.assignee,
            priority: front.priority,
            labels: front.labels,
            content: body.trim().to_string(),
            milestone: front.milestone,
            due_date: front.due_date,
        };

        Ok(Record {
            id: front.id,
            kind: front.kind,
            fields,
            updated: front.updated,
            sync: front.sync,
            path: None,
        })
    }

    /// Load a record from a file, remembering its path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read record file {}", path.display()))?;
        let mut record = Self::parse(&text)
            .with_context(|| format!("failed to parse record file {}", path.display()))?;
        record.path = Some(path.to_path_buf());
        Ok(record)
    }

    /// Render the record back to its file representation.
    pub fn render(&self) -> Result<String> {
        let front = FrontMatter {
            id: self.id.clone(),
            kind: self.kind,
            title: self.fields.title.clone(),
            status: self.fields.status.clone(),
            assignee: self.fields.assignee.clone(),
            priority: self.fields.priority.clone(),
            labels: self.fields.labels.clone(),
            milestone: self.fields.milestone.clone(),
            due_date: self.fields.due_date,
            updated: self.updated,
            sync: self.sync.clone(),
        };

        let yaml = serde_yaml::to_string(&front).context("failed to serialize record header")?;

        let mut out = String::with_capacity(yaml.len() + self.fields.content.len() + 16);
        out.push_str("---\n");
        out.push_str(&yaml);
        out.push_str("---\n");
        if !self.fields.content.is_empty() {
            out.push('\n');
            out.push_str(&self.fields.content);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> Record {
        let mut fields = TrackedFields {
            title: "Fix the parser".to_string(),
            status: "open".to_string(),
            assignee: Some("alice".to_string()),
            priority: Some("high".to_string()),
            content: "The parser chokes on empty headers.\n\nSteps to reproduce...".to_string(),
            milestone: Some("v1.0".to_string()),
            due_date: NaiveDate::from_ymd_opt(2026, 9, 1),
            ..Default::default()
        };
        fields.labels.insert("bug".to_string());
        fields.labels.insert("parser".to_string());

        let mut record = Record::new("ISSUE-42", RecordKind::Issue, fields);
        record.updated = Some(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap());
        record
    }

    #[test]
    fn test_render_parse_round_trip() {
        let record = sample_record();
        let text = record.render().unwrap();
        let reparsed = Record::parse(&text).unwrap();

        assert_eq!(reparsed.id, record.id);
        assert_eq!(reparsed.kind, record.kind);
        assert_eq!(reparsed.fields, record.fields);
        assert_eq!(reparsed.updated, record.updated);
        assert_eq!(reparsed.sync, record.sync);
    }

    #[test]
    fn test_round_trip_with_sync_metadata() {
        let mut record = sample_record();
        record.sync.last_synced = Some(Utc.with_ymd_and_hms(2026, 8, 2, 9, 30, 0).unwrap());
        record.sync.remote_baseline = Some(record.fields.clone());

        let text = record.render().unwrap();
        let reparsed = Record::parse(&text).unwrap();
        assert_eq!(reparsed.sync.last_synced, record.sync.last_synced);
        assert_eq!(reparsed.sync.remote_baseline, record.sync.remote_baseline);
    }

    #[test]
    fn test_parse_minimal_record() {
        let text = "---\nid: ISSUE-1\ntitle: Hello\nstatus: open\n---\n";
        let record = Record::parse(text).unwrap();
        assert_eq!(record.id, "ISSUE-1");
        assert_eq!(record.kind, RecordKind::Issue);
        assert!(record.fields.content.is_empty());
        assert!(record.sync.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_front_matter() {
        assert!(Record::parse("just a markdown file\n").is_err());
        assert!(Record::parse("---\nid: X\nno terminator").is_err());
    }

    #[test]
    fn test_absent_vs_empty_assignee() {
        let unset = TrackedFields::default();
        let empty = TrackedFields {
            assignee: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(unset.get(Field::Assignee), FieldValue::Absent);
        assert_eq!(empty.get(Field::Assignee), FieldValue::Text(String::new()));
        assert_ne!(unset.get(Field::Assignee), empty.get(Field::Assignee));
    }

    #[test]
    fn test_get_set_round_trip_all_fields() {
        let fields = sample_record().fields;
        let mut rebuilt = TrackedFields::default();
        for field in Field::ALL {
            rebuilt.set(field, fields.get(field));
        }
        assert_eq!(rebuilt, fields);
    }

    #[test]
    fn test_field_value_json_keeps_date_like_text() {
        let text = FieldValue::text("2026-01-01");
        let json = serde_json::to_string(&text).unwrap();
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, text);

        let date = FieldValue::Date(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let json = serde_json::to_string(&date).unwrap();
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, date);
    }

    #[test]
    fn test_labels_compare_as_sets() {
        let mut a = TrackedFields::default();
        a.labels.insert("bug".to_string());
        a.labels.insert("ui".to_string());

        let mut b = TrackedFields::default();
        b.labels.insert("ui".to_string());
        b.labels.insert("bug".to_string());

        assert_eq!(a.get(Field::Labels), b.get(Field::Labels));
    }
}
