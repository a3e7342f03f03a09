//! # issue-sync
//!
//! A command-line tool for keeping plain-text issue and milestone records in
//! sync with a remote tracker.
//!
//! ## Overview
//!
//! `issue-sync` treats a directory of Markdown files with YAML front matter as
//! the source of truth for issues, milestones, and projects. The files live
//! under git like any other part of the repository; this tool reconciles them
//! against a remote tracker (a hosted forge API or another git repository)
//! with a field-level three-way merge, so independent edits on both sides
//! combine instead of overwriting each other.
//!
//! ## Key Features
//!
//! - **Three-way merge**: each tracked field is merged against the state at
//!   the last sync, so only genuinely concurrent edits conflict
//! - **Baselines from history**: the last-synced state is recovered from git
//!   history or a stored snapshot, never from a separate database
//! - **Conflicts as values**: diverged fields are reported, not fatal; they
//!   can be resolved by strategy or interactively
//! - **Batch isolation**: records sync in parallel batches and one record's
//!   failure never blocks the rest
//! - **Derived cache**: a local SQLite cache answers listing queries without
//!   re-parsing every file, and can always be rebuilt from the files
//!
//! ## Architecture
//!
//! - Record files and their on-disk store ([`record`], [`store`])
//! - Git history access and baseline reconstruction ([`git`], [`baseline`])
//! - Merge, conflict detection, and resolution ([`merge`], [`conflict`])
//! - Remote backends ([`remote`])
//! - Orchestration, filtering, and reporting ([`sync`], [`filter`], [`report`])
//! - Ambient concerns ([`config`], [`cache`], [`error`], [`logger`])

/// Baseline reconstruction from git history.
///
/// Recovers what a record file looked like at the time of its last sync so
/// the merge can tell one-sided changes from concurrent ones. Degrades to an
/// unknown baseline on shallow or rewritten history.
pub mod baseline;

/// Derived SQLite cache for listing queries.
pub mod cache;

/// Workspace and user-level configuration.
///
/// Per-workspace settings live in `.issue-sync.toml` next to the records;
/// user-level state (log file, latest report, backend clone) follows platform
/// conventions (XDG on Linux, Application Support on macOS, AppData on
/// Windows).
pub mod config;

/// Conflict model, two-way diff detection, and resolution strategies.
pub mod conflict;

/// Error taxonomy shared across the sync pipeline.
pub mod error;

/// Record selection for partial syncs.
pub mod filter;

/// Thin wrapper over the `git` CLI for history queries and remote pushes.
pub mod git;

/// Field-level three-way merge.
///
/// The heart of the tool: a pure merge over base/local/remote field values
/// that classifies every field as unchanged, cleanly mergeable, or
/// conflicted.
pub mod merge;

/// Logging to console and a rotating file.
pub mod logger;

/// Record files: parsing, rendering, tracked fields, and sync metadata.
pub mod record;

/// Remote backends (hosted forge API, plain git repository).
pub mod remote;

/// Sync run reports: summaries, JSON/Markdown rendering, persistence.
pub mod report;

/// Local record store: discovery, loading, atomic writes.
pub mod store;

/// Sync orchestration over a worker pool.
pub mod sync;
