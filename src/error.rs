use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for sync operations.
///
/// Per-record errors are isolated: one record failing must never prevent the
/// rest of a batch from completing. Only authentication and connectivity
/// failures abort an entire batch. Merge conflicts are *not* errors; they are
/// ordinary values routed through the sync report.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or rate-limit trouble. Backends retry these with backoff before
    /// surfacing them; when they still fail, only the affected record fails.
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    /// Authentication against the remote backend failed. Fatal for the whole
    /// batch, there is no point retrying per record.
    #[error("backend authentication failed: {0}")]
    BackendAuth(String),

    /// The backend rejected a request for a non-retryable reason.
    #[error("remote backend error: {0}")]
    Remote(String),

    /// A record file could not be written. Metadata was not touched, so the
    /// whole record is safe to retry later.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record file was written but the remote push or metadata update did
    /// not complete. Flagged explicitly, never treated as plain success or
    /// plain failure.
    #[error("record written but sync did not complete: {0}")]
    PartialFailure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether this error should abort the entire batch.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, SyncError::BackendAuth(_))
    }

    /// Whether a backend may retry the failed request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientRemote(_))
    }
}
