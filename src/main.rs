use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use issue_sync::cache::CacheStore;
use issue_sync::config::{BackendKind, WorkspaceConfig};
use issue_sync::conflict::ResolutionStrategy;
use issue_sync::filter::SyncFilter;
use issue_sync::logger;
use issue_sync::record::RecordKind;
use issue_sync::report::SyncReport;
use issue_sync::store::Workspace;
use issue_sync::sync::{SyncOptions, SyncOrchestrator};

#[derive(Parser)]
#[command(name = "issue-sync")]
#[command(about = "Sync plain-text issue records with a remote tracker", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the current directory as an issue-sync workspace
    Init {
        /// Remote backend: git or forge
        #[arg(long, default_value = "git")]
        backend: String,

        /// Git URL or forge base URL
        #[arg(long)]
        url: Option<String>,

        /// Forge project, e.g. team/tracker (forge backend only)
        #[arg(long)]
        project: Option<String>,

        /// Environment variable holding the API token (forge backend only)
        #[arg(long)]
        token_env: Option<String>,

        /// Branch the git backend pushes to
        #[arg(long, default_value = "main")]
        branch: String,
    },

    /// Reconcile local records with the remote tracker
    Sync {
        /// Compute and report everything, change nothing
        #[arg(long)]
        dry_run: bool,

        /// Resolve conflicts automatically: keep-local, keep-remote, or auto
        #[arg(short, long)]
        strategy: Option<ResolutionStrategy>,

        /// Only sync these record ids
        #[arg(long)]
        id: Vec<String>,

        /// Only sync these kinds: issue, milestone, project
        #[arg(long)]
        kind: Vec<RecordKind>,

        /// Only sync records with this status
        #[arg(long)]
        status: Option<String>,

        /// Only sync ids matching these glob patterns
        #[arg(long)]
        include: Vec<String>,

        /// Skip ids matching these glob patterns
        #[arg(long)]
        exclude: Vec<String>,

        /// Worker threads (default from config)
        #[arg(long)]
        workers: Option<usize>,

        /// Records per batch (default from config)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// List records from the local cache
    Status {
        /// Only show records with this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Resolve conflicts from the last sync interactively
    Resolve,

    /// Refresh the derived query cache from the record files
    Cache {
        /// Drop every row and rescan the whole workspace
        #[arg(long)]
        full: bool,
    },

    /// View the report from the last sync
    Report {
        /// Output format: json or markdown
        #[arg(short, long, default_value = "markdown")]
        format: String,

        /// Output file (default: print to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    if atty::isnt(atty::Stream::Stdout) {
        colored::control::set_override(false);
    }

    logger::init_logger()?;
    logger::rotate_log_if_needed()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            backend,
            url,
            project,
            token_env,
            branch,
        } => init_workspace(&backend, url, project, token_env, branch)?,
        Commands::Sync {
            dry_run,
            strategy,
            id,
            kind,
            status,
            include,
            exclude,
            workers,
            batch_size,
        } => {
            let filter = SyncFilter {
                ids: id,
                kinds: kind,
                status,
                include_patterns: include,
                exclude_patterns: exclude,
            };
            run_sync(&filter, dry_run, strategy, workers, batch_size)?;
        }
        Commands::Status { status } => show_status(status.as_deref())?,
        Commands::Resolve => resolve_conflicts()?,
        Commands::Cache { full } => rebuild_cache(full)?,
        Commands::Report { format, output } => show_report(&format, output.as_deref())?,
    }

    Ok(())
}

fn workspace_config() -> Result<WorkspaceConfig> {
    let root = std::env::current_dir().context("failed to determine current directory")?;
    WorkspaceConfig::load(&root)
}

fn init_workspace(
    backend: &str,
    url: Option<String>,
    project: Option<String>,
    token_env: Option<String>,
    branch: String,
) -> Result<()> {
    let mut config = workspace_config()?;

    config.remote.kind = match backend {
        "git" => BackendKind::Git,
        "forge" => BackendKind::Forge,
        other => anyhow::bail!("unknown backend '{other}' (expected git or forge)"),
    };
    config.remote.url = url;
    config.remote.project = project;
    config.remote.token_env = token_env;
    config.remote.branch = branch;
    config.save()?;

    for dir in &config.record_dirs {
        std::fs::create_dir_all(config.root.join(dir))
            .with_context(|| format!("failed to create record directory '{dir}'"))?;
    }

    println!(
        "{} workspace initialized with {} backend",
        "✓".green(),
        config.remote.kind
    );
    Ok(())
}

fn run_sync(
    filter: &SyncFilter,
    dry_run: bool,
    strategy: Option<ResolutionStrategy>,
    workers: Option<usize>,
    batch_size: Option<usize>,
) -> Result<()> {
    let config = workspace_config()?;
    let orchestrator = SyncOrchestrator::open(&config)?;

    let opts = SyncOptions {
        dry_run,
        strategy,
        workers: workers.unwrap_or(config.sync.workers),
        batch_size: batch_size.unwrap_or(config.sync.batch_size),
    };

    let report = orchestrator.sync(filter, &opts)?;
    report.print_summary();
    if !dry_run {
        report.save_latest()?;
    }

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

fn show_status(status: Option<&str>) -> Result<()> {
    let config = workspace_config()?;
    let cache = CacheStore::open(&config.cache_path())?;

    if cache.is_empty()? {
        let workspace = Workspace::new(&config);
        cache.rebuild_full(&workspace)?;
    }

    let rows = cache.list(status)?;
    if rows.is_empty() {
        println!("{}", "No records found".dimmed());
        return Ok(());
    }

    for row in rows {
        let status_colored = match row.status.as_str() {
            "open" => row.status.green(),
            "closed" | "done" => row.status.dimmed(),
            other => other.yellow(),
        };
        println!(
            "{:12} {:10} [{}] {}",
            row.id.bold(),
            row.kind,
            status_colored,
            row.title
        );
    }
    Ok(())
}

fn resolve_conflicts() -> Result<()> {
    let Some(report) = SyncReport::load_latest()? else {
        println!("{}", "No sync report found; run 'issue-sync sync' first".dimmed());
        return Ok(());
    };
    if !report.has_conflicts() {
        println!("{}", "No conflicts to resolve".green());
        return Ok(());
    }

    let config = workspace_config()?;
    let orchestrator = SyncOrchestrator::open(&config)?;

    // Show what differs right now, not the state at the time of the report.
    let filter = SyncFilter {
        ids: report.conflicts.iter().map(|rc| rc.id.clone()).collect(),
        ..Default::default()
    };
    let live: std::collections::HashMap<_, _> =
        orchestrator.diff(&filter)?.into_iter().collect();

    for record_conflicts in &report.conflicts {
        println!();
        println!("{}", record_conflicts.id.bold());
        match live.get(&record_conflicts.id) {
            Some(diffs) => {
                for diff in diffs {
                    println!("  {diff}");
                }
            }
            None => {
                println!("  {}", "no longer differs from the remote".dimmed());
                continue;
            }
        }

        let choice = inquire::Select::new(
            "Resolution:",
            vec!["keep local", "keep remote", "auto (newer side wins)", "skip"],
        )
        .prompt()?;

        let strategy = match choice {
            "keep local" => ResolutionStrategy::KeepLocal,
            "keep remote" => ResolutionStrategy::KeepRemote,
            "auto (newer side wins)" => ResolutionStrategy::AutoMerge,
            _ => continue,
        };

        let filter = SyncFilter {
            ids: vec![record_conflicts.id.clone()],
            ..Default::default()
        };
        let opts = SyncOptions {
            strategy: Some(strategy),
            ..Default::default()
        };
        let result = orchestrator.sync(&filter, &opts)?;
        if result.has_failures() {
            println!("  {} resolution failed, see log", "✗".red());
        } else {
            println!("  {} resolved with {strategy}", "✓".green());
        }
    }

    Ok(())
}

fn rebuild_cache(full: bool) -> Result<()> {
    let config = workspace_config()?;
    let workspace = Workspace::new(&config);
    let cache = CacheStore::open(&config.cache_path())?;

    if full || cache.is_empty()? {
        cache.rebuild_full(&workspace)?;
    } else {
        cache.rebuild_incremental(&workspace.discover())?;
    }

    let count = cache.list(None)?.len();
    println!("{} cache refreshed with {count} records", "✓".green());
    Ok(())
}

fn show_report(format: &str, output: Option<&std::path::Path>) -> Result<()> {
    let Some(report) = SyncReport::load_latest()? else {
        println!("{}", "No sync report found".dimmed());
        return Ok(());
    };

    let rendered = match format {
        "json" => report.to_json()?,
        "markdown" | "md" => report.to_markdown(),
        other => anyhow::bail!("unknown format '{other}' (expected json or markdown)"),
    };

    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            println!("{} report written to {}", "✓".green(), path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}
