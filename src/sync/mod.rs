//! Sync orchestration.
//!
//! Drives one full sync run: authenticate, fetch the remote listing once,
//! then reconcile every selected record through baseline lookup, three-way
//! merge, optional conflict resolution, and write-back. Records are processed
//! in batches on a worker pool; one record's failure never stops the rest.

use anyhow::anyhow;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::baseline::BaselineReconstructor;
use crate::cache::CacheStore;
use crate::config::WorkspaceConfig;
use crate::conflict::{
    detect_differences, Conflict, FieldConflict, ResolutionStrategy, SyncConflictResolver,
};
use crate::error::SyncError;
use crate::filter::SyncFilter;
use crate::merge::{merge_one, remote_deleted_conflict, MergeOutcome, RecordMerge};
use crate::record::{Field, Record, TrackedFields};
use crate::remote::{create_backend, with_backoff, RemoteBackend, RemoteRecord};
use crate::report::SyncReport;
use crate::store::Workspace;

const FETCH_ATTEMPTS: u32 = 3;

/// Per-invocation sync options.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Compute and report everything, change nothing.
    pub dry_run: bool,
    /// Strategy applied to conflicted records. `None` leaves conflicts
    /// unresolved in the report and skips writing those records.
    pub strategy: Option<ResolutionStrategy>,
    pub workers: usize,
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            dry_run: false,
            strategy: None,
            workers: 4,
            batch_size: 32,
        }
    }
}

/// Pipeline stages a record moves through, for debug tracing.
#[derive(Debug, Clone, Copy)]
enum SyncStage {
    BaselineLoaded,
    Merged,
    Resolved,
    Written,
    MetadataUpdated,
}

fn trace(id: &str, stage: SyncStage) {
    log::debug!("{id}: {stage:?}");
}

/// Outcome of syncing one record.
enum RecordOutcome {
    Synced,
    Conflicted(Vec<Conflict>),
    Deleted,
    /// The record file was rewritten but a later step failed; sync metadata
    /// is now stale and the record needs another run or manual attention.
    Partial,
    Failed(SyncError),
}

pub struct SyncOrchestrator {
    workspace: Workspace,
    backend: Box<dyn RemoteBackend>,
    /// Absent when the workspace is not under git; merges then run with an
    /// unknown baseline unless a stored snapshot exists.
    baseline: Option<BaselineReconstructor>,
    cache: CacheStore,
    supported: Vec<Field>,
    cancel: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(
        workspace: Workspace,
        backend: Box<dyn RemoteBackend>,
        baseline: Option<BaselineReconstructor>,
        cache: CacheStore,
    ) -> Self {
        let supported = backend.supported_fields().to_vec();
        SyncOrchestrator {
            workspace,
            backend,
            baseline,
            cache,
            supported,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire up an orchestrator from the workspace config.
    pub fn open(config: &WorkspaceConfig) -> Result<Self, SyncError> {
        let workspace = Workspace::new(config);
        let backend = create_backend(config)?;
        let baseline = match BaselineReconstructor::open(&config.root) {
            Ok(b) => Some(b),
            Err(e) => {
                log::warn!("workspace is not a git repository, baselines limited to stored snapshots: {e:#}");
                None
            }
        };
        let cache = CacheStore::open(&config.cache_path()).map_err(SyncError::Other)?;
        Ok(Self::new(workspace, backend, baseline, cache))
    }

    /// Flag that aborts the run between records when set. Completed records
    /// stay completed; nothing is rolled back.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run one sync pass over the records selected by `filter`.
    pub fn sync(&self, filter: &SyncFilter, opts: &SyncOptions) -> Result<SyncReport, SyncError> {
        self.backend.authenticate()?;

        let remote_records = with_backoff("fetch remote records", FETCH_ATTEMPTS, || {
            self.backend.fetch_all()
        })?;
        log::info!(
            "syncing against {} backend: {} remote records",
            self.backend.name(),
            remote_records.len()
        );

        let all_locals = self.workspace.load_all();
        // Ids of every local record, filtered or not: a filtered-out record
        // must never be mistaken for a missing one and re-materialized.
        let local_ids: HashSet<String> = all_locals.iter().map(|r| r.id.clone()).collect();
        let locals: Vec<Record> = all_locals
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();

        let remote_map: HashMap<&str, &RemoteRecord> = remote_records
            .iter()
            .map(|r| (r.id.as_str(), r))
            .collect();

        let mut report = SyncReport::new();
        report.dry_run = opts.dry_run;

        // Records that exist only remotely are materialized as new local files.
        for remote in &remote_records {
            if local_ids.contains(&remote.id) {
                continue;
            }
            self.materialize_remote(remote, filter, opts, &mut report);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.workers.max(1))
            .build()
            .map_err(|e| SyncError::Other(anyhow!("failed to build worker pool: {e}")))?;

        let shared = Mutex::new(report);
        pool.install(|| {
            locals.par_chunks(opts.batch_size.max(1)).for_each(|chunk| {
                let mut batch = SyncReport::new();
                for local in chunk {
                    if self.cancel.load(Ordering::SeqCst) {
                        log::info!("sync cancelled, skipping remaining records");
                        break;
                    }
                    let remote = remote_map.get(local.id.as_str()).copied();
                    self.apply_outcome(&local.id, self.sync_record(local, remote, opts), &mut batch);
                }
                if !opts.dry_run {
                    // The id does not determine the filename; refresh the
                    // paths the records were actually loaded from.
                    let paths: Vec<_> = chunk
                        .iter()
                        .map(|r| {
                            r.path
                                .clone()
                                .unwrap_or_else(|| self.workspace.path_for(r.kind, &r.id))
                        })
                        .collect();
                    if let Err(e) = self.cache.rebuild_incremental(&paths) {
                        log::warn!("cache refresh failed: {e:#}");
                    }
                }
                shared.lock().unwrap().merge(batch);
            });
        });

        let report = shared.into_inner().unwrap();
        if !report.partial_failures.is_empty() {
            log::warn!(
                "{} record(s) finished partially: {}",
                report.partial_failures.len(),
                report.partial_failures.join(", ")
            );
        }
        Ok(report)
    }

    fn apply_outcome(&self, id: &str, outcome: RecordOutcome, report: &mut SyncReport) {
        match outcome {
            RecordOutcome::Synced => report.record_success(id),
            RecordOutcome::Conflicted(conflicts) => report.record_conflicts(id, conflicts),
            RecordOutcome::Deleted => report.record_deleted(id),
            RecordOutcome::Partial => report.record_partial(id),
            RecordOutcome::Failed(e) => {
                // Authentication died mid-run; stop launching records instead
                // of failing each one against a dead backend.
                if e.is_fatal_for_batch() {
                    log::error!("{id}: {e}; aborting remaining records");
                    self.cancel.store(true, Ordering::SeqCst);
                }
                report.record_failure(id, &e);
            }
        }
    }

    /// Live field-by-field differences between the selected local records and
    /// the remote's current state. No baseline, no mutation: what differs
    /// right now, with exact values, over the backend's supported fields.
    pub fn diff(
        &self,
        filter: &SyncFilter,
    ) -> Result<Vec<(String, Vec<FieldConflict>)>, SyncError> {
        let remote_records = with_backoff("fetch remote records", FETCH_ATTEMPTS, || {
            self.backend.fetch_all()
        })?;
        let remote_map: HashMap<&str, &RemoteRecord> = remote_records
            .iter()
            .map(|r| (r.id.as_str(), r))
            .collect();

        let mut out = Vec::new();
        for local in self.workspace.load_all() {
            if !filter.matches(&local) {
                continue;
            }
            let Some(remote) = remote_map.get(local.id.as_str()) else {
                continue;
            };
            let diffs = detect_differences(&local.fields, &remote.fields, &self.supported);
            if !diffs.is_empty() {
                out.push((local.id, diffs));
            }
        }
        Ok(out)
    }

    /// Resolve the merge baseline for a record: the stored remote snapshot if
    /// one exists, otherwise the file contents reconstructed from git history
    /// at the last sync time, otherwise unknown.
    fn load_base(&self, local: &Record) -> Option<TrackedFields> {
        if let Some(snapshot) = &local.sync.remote_baseline {
            return Some(snapshot.clone());
        }
        let last_synced = local.sync.last_synced?;
        let path = local.path.as_ref()?;
        let base = self
            .baseline
            .as_ref()?
            .record_at(path, last_synced)
            .map(|r| r.fields);
        trace(&local.id, SyncStage::BaselineLoaded);
        base
    }

    fn sync_record(
        &self,
        local: &Record,
        remote: Option<&RemoteRecord>,
        opts: &SyncOptions,
    ) -> RecordOutcome {
        let base = self.load_base(local);
        let outcome = merge_one(local, base.as_ref(), remote, &self.supported);
        trace(&local.id, SyncStage::Merged);

        match (outcome, remote) {
            (MergeOutcome::LocalOnly, _) => self.push_new(local, opts),
            (MergeOutcome::DeleteLocal, _) => self.delete_local(local, opts),
            (MergeOutcome::RemoteDeletedConflict, _) => {
                RecordOutcome::Conflicted(remote_deleted_conflict())
            }
            (MergeOutcome::Merged(merge), Some(remote)) => {
                self.reconcile(local, remote, merge, opts)
            }
            (MergeOutcome::Merged(_), None) => RecordOutcome::Failed(SyncError::Other(anyhow!(
                "merge produced a result without a remote record"
            ))),
        }
    }

    /// A locally created record with no remote counterpart: create it remotely.
    fn push_new(&self, local: &Record, opts: &SyncOptions) -> RecordOutcome {
        if opts.dry_run {
            return RecordOutcome::Synced;
        }

        if let Err(e) = self.backend.push(local) {
            return RecordOutcome::Failed(e);
        }

        let mut updated = local.clone();
        updated.sync.last_synced = Some(Utc::now());
        updated.sync.last_updated = Some(Utc::now());
        updated.sync.remote_baseline = Some(local.fields.clone());
        match self.workspace.save(&updated) {
            Ok(_) => {
                trace(&local.id, SyncStage::MetadataUpdated);
                RecordOutcome::Synced
            }
            Err(e) => {
                log::warn!("{}: pushed but metadata update failed: {e:#}", local.id);
                RecordOutcome::Partial
            }
        }
    }

    fn delete_local(&self, local: &Record, opts: &SyncOptions) -> RecordOutcome {
        if opts.dry_run {
            return RecordOutcome::Deleted;
        }
        match self.workspace.delete(local) {
            Ok(()) => {
                if let Err(e) = self.cache.remove(&local.id) {
                    log::warn!("{}: cache removal failed: {e:#}", local.id);
                }
                RecordOutcome::Deleted
            }
            Err(e) => RecordOutcome::Failed(e),
        }
    }

    /// Both sides exist: apply the merge, resolve conflicts if a strategy was
    /// given, then write back locally and remotely as needed.
    fn reconcile(
        &self,
        local: &Record,
        remote: &RemoteRecord,
        merge: RecordMerge,
        opts: &SyncOptions,
    ) -> RecordOutcome {
        let resolved = if merge.is_clean() {
            merge.merged.clone()
        } else if let Some(strategy) = opts.strategy {
            let resolver = SyncConflictResolver::new(strategy);
            match resolver.resolve(local, remote, &merge, &self.supported) {
                Ok(fields) => {
                    trace(&local.id, SyncStage::Resolved);
                    fields
                }
                Err(e) => return RecordOutcome::Failed(SyncError::Other(e)),
            }
        } else {
            let conflicts = merge.conflicts.into_iter().map(Conflict::Field).collect();
            return RecordOutcome::Conflicted(conflicts);
        };

        let file_changed = resolved != local.fields;
        let remote_changed = !resolved.same_fields(&remote.fields, &self.supported);
        let baseline_stale = local.sync.remote_baseline.as_ref() != Some(&resolved);

        if !file_changed && !remote_changed && !baseline_stale {
            return RecordOutcome::Synced;
        }
        if opts.dry_run {
            return RecordOutcome::Synced;
        }

        let mut updated = local.clone();
        updated.fields = resolved.clone();

        // Resolved fields first, bookkeeping last: a crash in between leaves
        // a correct record file with stale metadata, never the reverse.
        if file_changed {
            if let Err(e) = self.workspace.save(&updated) {
                return RecordOutcome::Failed(e);
            }
            trace(&local.id, SyncStage::Written);
        }

        if remote_changed {
            if let Err(e) = self.backend.push(&updated) {
                log::warn!("{}: push failed: {e:#}", local.id);
                return if file_changed {
                    RecordOutcome::Partial
                } else {
                    RecordOutcome::Failed(e)
                };
            }
        }

        updated.sync.last_synced = Some(Utc::now());
        updated.sync.last_updated = if remote_changed {
            Some(Utc::now())
        } else {
            remote.last_updated
        };
        updated.sync.remote_baseline = Some(resolved);

        match self.workspace.save(&updated) {
            Ok(_) => {
                trace(&local.id, SyncStage::MetadataUpdated);
                if let Err(e) = self.cache.upsert(std::slice::from_ref(&updated)) {
                    log::warn!("{}: cache update failed: {e:#}", local.id);
                }
                RecordOutcome::Synced
            }
            Err(e) => {
                log::warn!("{}: synced but metadata update failed: {e:#}", local.id);
                RecordOutcome::Partial
            }
        }
    }

    /// Create a local file for a record that exists only remotely.
    fn materialize_remote(
        &self,
        remote: &RemoteRecord,
        filter: &SyncFilter,
        opts: &SyncOptions,
        report: &mut SyncReport,
    ) {
        let mut record = Record::new(remote.id.clone(), remote.kind, remote.fields.clone());
        if !filter.matches(&record) {
            return;
        }
        if opts.dry_run {
            report.record_success(&record.id);
            return;
        }

        record.sync.last_synced = Some(Utc::now());
        record.sync.last_updated = remote.last_updated;
        record.sync.remote_baseline = Some(remote.fields.clone());

        match self.workspace.save(&record) {
            Ok(path) => {
                record.path = Some(path);
                if let Err(e) = self.cache.upsert(std::slice::from_ref(&record)) {
                    log::warn!("{}: cache update failed: {e:#}", record.id);
                }
                report.record_success(&record.id);
            }
            Err(e) => report.record_failure(&record.id, &e),
        }
    }
}
