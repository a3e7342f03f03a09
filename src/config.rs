use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-workspace config file, committed alongside the records.
pub const WORKSPACE_CONFIG_FILE: &str = ".issue-sync.toml";

/// Per-workspace directory holding derived state (the query cache). Safe to
/// delete at any time.
pub const WORKSPACE_STATE_DIR: &str = ".issue-sync";

/// Which remote backend a workspace syncs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A second git clone holding record files (local path or SSH/HTTPS URL).
    #[default]
    Git,
    /// A hosted forge-style issue API over HTTPS.
    Forge,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Git => write!(f, "git"),
            BackendKind::Forge => write!(f, "forge"),
        }
    }
}

/// Remote settings from `.issue-sync.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Git URL or forge base URL, depending on `kind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Forge project/namespace (forge backend only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Name of the environment variable holding the API token. The token
    /// itself is never stored in config; credential storage is the caller's
    /// problem, not ours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Branch the git backend pushes to.
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Worker-pool defaults for sync runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDefaults {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    32
}

impl Default for SyncDefaults {
    fn default() -> Self {
        SyncDefaults {
            workers: default_workers(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_record_dirs() -> Vec<String> {
    vec![
        "issues".to_string(),
        "milestones".to_string(),
        "projects".to_string(),
    ]
}

/// Workspace configuration, stored at the repository root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Directories (relative to the workspace root) scanned for record files.
    #[serde(default = "default_record_dirs")]
    pub record_dirs: Vec<String>,

    #[serde(default)]
    pub sync: SyncDefaults,

    /// Workspace root; not serialized, filled in on load.
    #[serde(skip)]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        WorkspaceConfig {
            remote: RemoteConfig::default(),
            record_dirs: default_record_dirs(),
            sync: SyncDefaults::default(),
            root: PathBuf::new(),
        }
    }
}

impl WorkspaceConfig {
    /// Load the workspace config from `<root>/.issue-sync.toml`, falling back
    /// to defaults when the file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(WORKSPACE_CONFIG_FILE);

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            WorkspaceConfig::default()
        };

        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Save the workspace config.
    pub fn save(&self) -> Result<()> {
        let path = self.root.join(WORKSPACE_CONFIG_FILE);
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Path of the derived query cache for this workspace.
    pub fn cache_path(&self) -> PathBuf {
        self.root.join(WORKSPACE_STATE_DIR).join("cache.db")
    }
}

/// Cross-platform user-level paths (log file, latest sync report, default
/// clone location for the git backend).
pub struct ConfigManager;

impl ConfigManager {
    /// Get the user configuration directory following platform conventions:
    /// - Linux: $XDG_CONFIG_HOME/issue-sync or ~/.config/issue-sync
    /// - macOS: ~/Library/Application Support/issue-sync
    /// - Windows: %APPDATA%\issue-sync
    pub fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
                Ok(PathBuf::from(xdg_config).join("issue-sync"))
            } else {
                let home = dirs::home_dir().context("failed to get home directory")?;
                Ok(home.join(".config").join("issue-sync"))
            }
        }

        #[cfg(target_os = "macos")]
        {
            let home = dirs::home_dir().context("failed to get home directory")?;
            Ok(home
                .join("Library")
                .join("Application Support")
                .join("issue-sync"))
        }

        #[cfg(target_os = "windows")]
        {
            Ok(dirs::config_dir()
                .context("failed to get Windows config directory")?
                .join("issue-sync"))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            let home = dirs::home_dir().context("failed to get home directory")?;
            Ok(home.join(".issue-sync"))
        }
    }

    /// Get the log file path.
    pub fn log_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("issue-sync.log"))
    }

    /// Get the path of the most recent sync report.
    pub fn last_report_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("latest-sync-report.json"))
    }

    /// Get the default clone directory for the plain-git backend.
    pub fn default_clone_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("remote-clone"))
    }

    /// Ensure the configuration directory exists.
    pub fn ensure_config_dir() -> Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        fs::create_dir_all(&config_dir).with_context(|| {
            format!("failed to create config directory: {}", config_dir.display())
        })?;
        Ok(config_dir)
    }
}
