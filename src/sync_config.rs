//! Job configuration for ispw-sync.
//!
//! Read from `.ispw-sync/ispw-sync.toml` in the build workspace (or an explicit
//! `--config` path), then layered: file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! clear_failures = false
//! debug = false
//!
//! [ispw]
//! connection_id = "cw09"
//! credentials_id = "ispw"
//! runtime_config = "ispw"
//! stream = "PLAY"
//! app = "PLAY"
//!
//! [git]
//! credentials_id = "bitbucket"
//!
//! [cli]
//! install_dir = "/opt/Compuware/TopazCLI"
//!
//! [branch_mapping]
//! mapping = """
//! */master => MASTER, per-branch
//! */dev* => DEV1, per-branch
//! """
//!
//! [[branch_mapping.rules]]
//! pattern = "release/*"
//! level = "QA1"
//! app = "PLAYQA"
//!
//! [notify]
//! enabled = true
//! key = "ISPW-SYNC"
//!
//! [connections.cw09]
//! host = "cw09.example.com"
//! port = 47623
//! code_page = "1047"
//!
//! [credentials.ispw]
//! username = "XDEVREG"
//! password_env = "ISPW_PASSWORD"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::branch::{BranchMapping, BranchRule, parse_rules};

/// Name of the per-workspace state directory.
pub const STATE_DIR: &str = ".ispw-sync";
/// Default config file name inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "ispw-sync.toml";

/// Container creation preferences ISPW understands.
pub const CONTAINER_PREFS: &[&str] = &["per-commit", "per-branch"];

/// ISPW target settings for the job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IspwSection {
    /// Host connection id, a key of `[connections]`
    #[serde(default)]
    pub connection_id: String,
    /// Credentials id, a key of `[credentials]`
    #[serde(default)]
    pub credentials_id: String,
    /// ISPW runtime configuration (`-ispwServerConfig`), omitted when blank
    #[serde(default)]
    pub runtime_config: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub app: String,
    /// Job-wide container preference; a mapping rule may override it
    #[serde(default)]
    pub container_pref: String,
    #[serde(default)]
    pub container_desc: String,
}

/// Git repository settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitSection {
    /// Repository URL. Blank means "read the origin remote of the workspace".
    #[serde(default)]
    pub repo_url: String,
    /// Credentials id for the git host, optional
    #[serde(default)]
    pub credentials_id: String,
}

/// Location of the Topaz Workbench CLI and the paths handed to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliSection {
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
    /// Local clone the CLI works from (default: the workspace)
    #[serde(default)]
    pub git_local_path: Option<PathBuf>,
    /// Folder the CLI downloads into (default: `git_local_path`)
    #[serde(default)]
    pub target_folder: Option<PathBuf>,
    /// CLI data/workspace directory (default: `<workspace>/TopazCliWkspc`)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Branch mapping in text form and/or as structured rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchMappingSection {
    #[serde(default)]
    pub mapping: String,
    #[serde(default)]
    pub rules: Vec<BranchRule>,
    /// Level used when no rule matches
    #[serde(default)]
    pub default_level: String,
}

/// Git host commit-status notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySection {
    #[serde(default = "default_notify_enabled")]
    pub enabled: bool,
    /// REST API base. Blank means "derive from the repository URL".
    #[serde(default)]
    pub base_url: String,
    /// Build-status key shown on the commit
    #[serde(default = "default_notify_key")]
    pub key: String,
}

fn default_notify_enabled() -> bool {
    true
}

fn default_notify_key() -> String {
    "ISPW-SYNC".to_string()
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            enabled: default_notify_enabled(),
            base_url: String::new(),
            key: default_notify_key(),
        }
    }
}

/// One entry of the host connection registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConnection {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default = "default_code_page")]
    pub code_page: String,
    /// Seconds; 0 leaves the timeout to the CLI
    #[serde(default)]
    pub timeout: u32,
}

fn default_code_page() -> String {
    "1047".to_string()
}

/// One credential entry. The secret comes from an environment variable or
/// a file so the config itself can be committed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// The complete ispw-sync.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncToml {
    /// Discard queued failures before recording this build's push
    #[serde(default)]
    pub clear_failures: bool,
    /// Log resolved connection and credential values in clear
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub ispw: IspwSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub cli: CliSection,
    #[serde(default)]
    pub branch_mapping: BranchMappingSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub connections: BTreeMap<String, HostConnection>,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialEntry>,
}

impl SyncToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ispw-sync.toml")
    }

    /// Load `<state_dir>/ispw-sync.toml`, or defaults if it does not exist.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize ispw-sync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Text rules first, then structured rules.
    pub fn branch_mapping(&self) -> Result<BranchMapping> {
        let mut rules = parse_rules(&self.branch_mapping.mapping)?;
        rules.extend(self.branch_mapping.rules.iter().cloned());
        Ok(BranchMapping::new(
            rules,
            Some(self.branch_mapping.default_level.clone()),
        ))
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.ispw.connection_id.trim().is_empty() {
            warnings.push("ispw.connection_id is not set".to_string());
        } else if !self.connections.contains_key(&self.ispw.connection_id) {
            warnings.push(format!(
                "ispw.connection_id '{}' has no [connections.{}] entry",
                self.ispw.connection_id, self.ispw.connection_id
            ));
        }

        if self.ispw.credentials_id.trim().is_empty() {
            warnings.push("ispw.credentials_id is not set".to_string());
        } else if !self.credentials.contains_key(&self.ispw.credentials_id) {
            warnings.push(format!(
                "ispw.credentials_id '{}' has no [credentials.{}] entry",
                self.ispw.credentials_id, self.ispw.credentials_id
            ));
        }

        let git_id = self.git.credentials_id.trim();
        if !git_id.is_empty() && !self.credentials.contains_key(git_id) {
            warnings.push(format!(
                "git.credentials_id '{}' has no [credentials.{}] entry",
                git_id, git_id
            ));
        }

        if self.ispw.stream.trim().is_empty() {
            warnings.push("ispw.stream is not set".to_string());
        }
        if self.ispw.app.trim().is_empty() {
            warnings.push("ispw.app is not set".to_string());
        }

        match self.branch_mapping() {
            Ok(mapping) => {
                if mapping.rules().is_empty() && !mapping.has_default() {
                    warnings.push("branch_mapping has no rules; every build will fail".to_string());
                }
                for rule in mapping.rules() {
                    if let Some(pref) = &rule.container_pref
                        && !is_known_container_pref(pref)
                    {
                        warnings.push(format!(
                            "Unknown container preference '{}' for pattern '{}'",
                            pref, rule.pattern
                        ));
                    }
                }
            }
            Err(e) => warnings.push(format!("{:#}", e)),
        }

        let pref = self.ispw.container_pref.trim();
        if !pref.is_empty() && !is_known_container_pref(pref) {
            warnings.push(format!("Unknown container preference '{}' in [ispw]", pref));
        }

        for (id, entry) in &self.credentials {
            if entry.password_env.is_none()
                && entry.password_file.is_none()
                && entry.password.is_none()
            {
                warnings.push(format!("credentials.{} has no password source", id));
            }
        }

        warnings
    }
}

fn is_known_container_pref(pref: &str) -> bool {
    CONTAINER_PREFS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(pref.trim()))
}

/// Unified runtime configuration: the parsed file plus environment and CLI
/// overrides, anchored at a build workspace.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace: PathBuf,
    pub state_dir: PathBuf,
    pub toml: SyncToml,
    pub verbose: bool,
    /// CLI override: `run --clear-failures`
    pub cli_clear_failures: bool,
}

impl SyncConfig {
    /// Load the workspace's config file, or `config_file` when given (which
    /// must then exist).
    pub fn load(workspace: PathBuf, config_file: Option<&Path>) -> Result<Self> {
        let state_dir = workspace.join(STATE_DIR);
        let toml = match config_file {
            Some(path) => SyncToml::load(path)?,
            None => SyncToml::load_or_default(&state_dir)?,
        };
        Ok(Self::from_toml(workspace, toml))
    }

    pub fn from_toml(workspace: PathBuf, toml: SyncToml) -> Self {
        let state_dir = workspace.join(STATE_DIR);
        Self {
            workspace,
            state_dir,
            toml,
            verbose: false,
            cli_clear_failures: false,
        }
    }

    pub fn with_cli_args(mut self, verbose: bool, clear_failures: bool) -> Self {
        self.verbose = verbose;
        self.cli_clear_failures = clear_failures;
        self
    }

    /// CLI → env (`ISPW_CLEAR_FAILURES`) → file.
    pub fn clear_failures(&self) -> bool {
        if self.cli_clear_failures {
            return true;
        }
        env_flag("ISPW_CLEAR_FAILURES").unwrap_or(self.toml.clear_failures)
    }

    /// env (`ISPW_DEBUG`) → file.
    pub fn debug(&self) -> bool {
        env_flag("ISPW_DEBUG").unwrap_or(self.toml.debug)
    }

    /// env (`ISPW_CLI_DIR`) → file.
    pub fn cli_install_dir(&self) -> Option<PathBuf> {
        std::env::var("ISPW_CLI_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| self.toml.cli.install_dir.clone())
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn queue_file(&self) -> PathBuf {
        crate::queue::queue_file(&self.workspace)
    }

    pub fn git_local_path(&self) -> PathBuf {
        self.resolve_path(self.toml.cli.git_local_path.as_deref())
            .unwrap_or_else(|| self.workspace.clone())
    }

    pub fn target_folder(&self) -> PathBuf {
        self.resolve_path(self.toml.cli.target_folder.as_deref())
            .unwrap_or_else(|| self.git_local_path())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve_path(self.toml.cli.data_dir.as_deref())
            .unwrap_or_else(|| self.workspace.join("TopazCliWkspc"))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.cli_install_dir().is_none() {
            warnings.push("cli.install_dir is not set and ISPW_CLI_DIR is empty".to_string());
        }
        warnings
    }

    fn resolve_path(&self, path: Option<&Path>) -> Option<PathBuf> {
        let path = path.filter(|p| !p.as_os_str().is_empty())?;
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.workspace.join(path))
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
