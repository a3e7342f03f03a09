//! Record selection for partial syncs.

use crate::record::{Record, RecordKind};

/// Criteria selecting which records a sync run touches. An empty filter
/// matches everything.
#[derive(Debug, Clone, Default)]
pub struct SyncFilter {
    /// Exact record ids. Empty means "any id".
    pub ids: Vec<String>,

    /// Record kinds. Empty means "any kind".
    pub kinds: Vec<RecordKind>,

    /// Exact status match, e.g. "open".
    pub status: Option<String>,

    /// Glob patterns over the record id; a record must match at least one
    /// when any are given.
    pub include_patterns: Vec<String>,

    /// Glob patterns over the record id; matching any excludes the record.
    pub exclude_patterns: Vec<String>,
}

impl SyncFilter {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
            && self.kinds.is_empty()
            && self.status.is_none()
            && self.include_patterns.is_empty()
            && self.exclude_patterns.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| id == &record.id) {
            return false;
        }

        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }

        if let Some(status) = &self.status {
            if &record.fields.status != status {
                return false;
            }
        }

        if !self.include_patterns.is_empty()
            && !self
                .include_patterns
                .iter()
                .any(|p| glob_match(p, &record.id))
        {
            return false;
        }

        if self.exclude_patterns.iter().any(|p| glob_match(p, &record.id)) {
            return false;
        }

        true
    }

    /// Filter matching records, keeping input order.
    pub fn apply<'a>(&self, records: &'a [Record]) -> Vec<&'a Record> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

/// Minimal glob matching: `*` matches any run of characters, `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    fn matches(p: &[char], t: &[char]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&p[1..], t) || (!t.is_empty() && matches(p, &t[1..]))
            }
            (Some('?'), Some(_)) => matches(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => matches(&p[1..], &t[1..]),
            _ => false,
        }
    }

    matches(&pattern, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TrackedFields;

    fn record(id: &str, kind: RecordKind, status: &str) -> Record {
        Record::new(
            id,
            kind,
            TrackedFields {
                title: id.to_string(),
                status: status.to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = SyncFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&record("ISSUE-1", RecordKind::Issue, "open")));
        assert!(filter.matches(&record("M-1", RecordKind::Milestone, "closed")));
    }

    #[test]
    fn test_id_filter() {
        let filter = SyncFilter {
            ids: vec!["ISSUE-2".to_string()],
            ..Default::default()
        };
        assert!(!filter.matches(&record("ISSUE-1", RecordKind::Issue, "open")));
        assert!(filter.matches(&record("ISSUE-2", RecordKind::Issue, "open")));
    }

    #[test]
    fn test_kind_and_status_filter() {
        let filter = SyncFilter {
            kinds: vec![RecordKind::Issue],
            status: Some("open".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&record("ISSUE-1", RecordKind::Issue, "open")));
        assert!(!filter.matches(&record("ISSUE-2", RecordKind::Issue, "closed")));
        assert!(!filter.matches(&record("M-1", RecordKind::Milestone, "open")));
    }

    #[test]
    fn test_include_exclude_patterns() {
        let filter = SyncFilter {
            include_patterns: vec!["ISSUE-*".to_string()],
            exclude_patterns: vec!["ISSUE-9?".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&record("ISSUE-1", RecordKind::Issue, "open")));
        assert!(!filter.matches(&record("ISSUE-91", RecordKind::Issue, "open")));
        assert!(!filter.matches(&record("M-1", RecordKind::Milestone, "open")));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("ISSUE-*", "ISSUE-42"));
        assert!(glob_match("ISSUE-?", "ISSUE-4"));
        assert!(!glob_match("ISSUE-?", "ISSUE-42"));
        assert!(glob_match("*-42", "ISSUE-42"));
        assert!(!glob_match("M-*", "ISSUE-42"));
    }

    #[test]
    fn test_apply_keeps_order() {
        let records = vec![
            record("ISSUE-2", RecordKind::Issue, "open"),
            record("ISSUE-1", RecordKind::Issue, "open"),
        ];
        let filter = SyncFilter {
            include_patterns: vec!["ISSUE-*".to_string()],
            ..Default::default()
        };
        let selected = filter.apply(&records);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].id, "ISSUE-2");
    }
}
