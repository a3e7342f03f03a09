//! Backend-agnostic remote interface.
//!
//! The orchestrator only ever talks to [`RemoteBackend`]; concrete backends
//! (hosted forge API, plain git clone) implement identical semantics behind
//! it. Each backend owns its own backoff/retry for rate limits and surfaces
//! them as retryable [`SyncError::TransientRemote`] errors, never fatal ones.

mod forge;
mod git;

pub use forge::{ForgeBackend, ForgeConfig};
pub use git::{GitBackend, GitRemoteConfig};

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::WorkspaceConfig;
use crate::error::SyncError;
use crate::record::{Field, Record, RecordKind, TrackedFields};
use crate::report::SyncReport;

/// A record as observed on the remote system.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub id: String,
    pub kind: RecordKind,
    pub fields: TrackedFields,
    /// When the remote system last reported a change to this record.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Operations every remote backend provides.
///
/// The orchestrator is backend-oblivious and dispatches through this
/// interface only.
pub trait RemoteBackend: Send + Sync {
    /// Short backend name for logs and reports.
    fn name(&self) -> &'static str;

    /// Verify credentials/connectivity. Failure aborts the whole batch.
    fn authenticate(&self) -> Result<(), SyncError>;

    /// Fetch every remote record. A record absent from this listing is
    /// treated as remotely deleted by the merge.
    fn fetch_all(&self) -> Result<Vec<RemoteRecord>, SyncError>;

    /// Push a single record to the remote.
    fn push(&self, record: &Record) -> Result<(), SyncError>;

    /// Push many records, isolating per-record failures: one record failing
    /// must never prevent the others from being attempted.
    fn push_batch(&self, records: &[Record]) -> SyncReport {
        let mut report = SyncReport::new();
        for record in records {
            match self.push(record) {
                Ok(()) => report.record_success(&record.id),
                Err(e) => {
                    log::warn!("push of {} failed: {e}", record.id);
                    let fatal = e.is_fatal_for_batch();
                    report.record_failure(&record.id, &e);
                    if fatal {
                        break;
                    }
                }
            }
        }
        report
    }

    /// Refresh the backend's view of the remote and report what it sees.
    fn pull(&self) -> Result<SyncReport, SyncError>;

    /// The tracked fields this backend can represent. Fields not listed are
    /// skipped during merge rather than treated as value changes; each
    /// backend documents its omissions.
    fn supported_fields(&self) -> &[Field] {
        &Field::ALL
    }
}

/// Construct the backend named by the workspace config.
pub fn create_backend(config: &WorkspaceConfig) -> Result<Box<dyn RemoteBackend>, SyncError> {
    match config.remote.kind {
        crate::config::BackendKind::Git => {
            let git_config = GitRemoteConfig::from_workspace(config)?;
            Ok(Box::new(GitBackend::open_or_clone(git_config)?))
        }
        crate::config::BackendKind::Forge => {
            let forge_config = ForgeConfig::from_workspace(config)?;
            Ok(Box::new(ForgeBackend::new(forge_config)?))
        }
    }
}

/// Retry a remote call on transient errors with exponential backoff.
///
/// Bounded attempts; anything still failing afterwards is surfaced to the
/// caller, which fails only the affected record (or batch, for fetch).
pub fn with_backoff<T>(
    what: &str,
    attempts: u32,
    mut call: impl FnMut() -> Result<T, SyncError>,
) -> Result<T, SyncError> {
    // At least one attempt, whatever the caller asked for.
    let attempts = attempts.max(1);
    let mut delay = Duration::from_millis(250);

    for attempt in 1..=attempts {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                log::warn!("{what} attempt {attempt}/{attempts} failed, retrying in {delay:?}: {e}");
                std::thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("retry loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, SyncError> = with_backoff("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(SyncError::TransientRemote("rate limited".to_string()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = with_backoff("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::TransientRemote("still down".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_zero_attempts_still_calls_once() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, SyncError> = with_backoff("test", 0, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = with_backoff("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::BackendAuth("bad token".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
