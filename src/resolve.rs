//! Capability seams between the synchronizer and its host environment.
//!
//! The orchestrator only talks to these traits; the config-backed and
//! process-backed implementations below are what the binary wires in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::SyncError;
use crate::sync_config::{CredentialEntry, SyncToml};

/// Resolved host connection, read-only for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub protocol: Option<String>,
    pub code_page: String,
    pub timeout_secs: u32,
}

/// A username/secret pair. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"******")
            .finish()
    }
}

pub trait ConnectionResolver {
    fn resolve_connection(&self, connection_id: &str) -> Result<ConnectionDescriptor, SyncError>;
}

pub trait CredentialResolver {
    /// `Ok(None)` when `credentials_id` is blank.
    fn resolve_credentials(&self, credentials_id: &str) -> Result<Option<Credentials>, SyncError>;
}

/// Build-scoped variables and the workspace they belong to.
pub trait BuildEnvironment {
    fn var(&self, name: &str) -> Option<String>;
    fn vars(&self) -> BTreeMap<String, String>;
    fn workspace(&self) -> &Path;
}

/// Resolves connections and credentials from the `[connections]` and
/// `[credentials]` tables of the job config.
pub struct ConfigResolver<'a> {
    toml: &'a SyncToml,
    base_dir: PathBuf,
}

impl<'a> ConfigResolver<'a> {
    /// Relative `password_file` paths resolve against `base_dir`.
    pub fn new(toml: &'a SyncToml, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            toml,
            base_dir: base_dir.into(),
        }
    }

    fn read_secret(&self, id: &str, entry: &CredentialEntry) -> Result<String, SyncError> {
        if let Some(var) = &entry.password_env {
            return std::env::var(var).map_err(|_| {
                SyncError::config(
                    "CredentialResolver",
                    format!(
                        "Environment variable {} for credentials '{}' is not set",
                        var, id
                    ),
                )
            });
        }
        if let Some(file) = &entry.password_file {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                self.base_dir.join(file)
            };
            return std::fs::read_to_string(&path)
                .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
                .map_err(|e| {
                    SyncError::config(
                        "CredentialResolver",
                        format!(
                            "Cannot read password file {} for credentials '{}': {}",
                            path.display(),
                            id,
                            e
                        ),
                    )
                });
        }
        entry.password.clone().ok_or_else(|| {
            SyncError::config(
                "CredentialResolver",
                format!("Credentials '{}' have no password source", id),
            )
        })
    }
}

impl ConnectionResolver for ConfigResolver<'_> {
    fn resolve_connection(&self, connection_id: &str) -> Result<ConnectionDescriptor, SyncError> {
        let id = connection_id.trim();
        if id.is_empty() {
            return Err(SyncError::config(
                "ConnectionResolver",
                "No host connection is configured (ispw.connection_id)",
            ));
        }
        let conn = self.toml.connections.get(id).ok_or_else(|| {
            SyncError::config(
                "ConnectionResolver",
                format!("Unable to connect to host connection for connectionId: {}", id),
            )
        })?;
        if conn.host.trim().is_empty() {
            return Err(SyncError::config(
                "ConnectionResolver",
                format!("Host connection '{}' has no host", id),
            ));
        }
        Ok(ConnectionDescriptor {
            host: conn.host.trim().to_string(),
            port: conn.port,
            protocol: conn
                .protocol
                .as_ref()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            code_page: conn.code_page.trim().to_string(),
            timeout_secs: conn.timeout,
        })
    }
}

impl CredentialResolver for ConfigResolver<'_> {
    fn resolve_credentials(&self, credentials_id: &str) -> Result<Option<Credentials>, SyncError> {
        let id = credentials_id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        let entry = self.toml.credentials.get(id).ok_or_else(|| {
            SyncError::config(
                "CredentialResolver",
                format!("No credentials with id '{}' are configured", id),
            )
        })?;
        let secret = self.read_secret(id, entry)?;
        Ok(Some(Credentials::new(entry.username.trim(), secret)))
    }
}

/// Snapshot of the process environment, values trimmed.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    vars: BTreeMap<String, String>,
    workspace: PathBuf,
}

impl ProcessEnvironment {
    pub fn capture(workspace: PathBuf) -> Self {
        // Variables that are not valid UTF-8 are skipped.
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .map(|(k, v)| (k, v.trim().to_string()))
            .collect();
        Self { vars, workspace }
    }
}

impl BuildEnvironment for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn vars(&self) -> BTreeMap<String, String> {
        self.vars.clone()
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }
}

/// Fixed variable set, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    vars: BTreeMap<String, String>,
    workspace: PathBuf,
}

impl StaticEnvironment {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            vars: BTreeMap::new(),
            workspace: workspace.into(),
        }
    }

    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }
}

impl BuildEnvironment for StaticEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).filter(|v| !v.trim().is_empty()).cloned()
    }

    fn vars(&self) -> BTreeMap<String, String> {
        self.vars.clone()
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn toml() -> SyncToml {
        SyncToml::parse(
            r#"
[connections.cw09]
host = " cw09.example.com "
port = 47623
protocol = ""
timeout = 30

[credentials.inline]
username = "XDEVREG"
password = "s3cret"

[credentials.file]
username = "builder"
password_file = "git.pass"

[credentials.env]
username = "builder"
password_env = "ISPW_SYNC_TEST_UNSET_VARIABLE"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_connection_trims_and_drops_blank_protocol() {
        let toml = toml();
        let resolver = ConfigResolver::new(&toml, "/ws");
        let conn = resolver.resolve_connection("cw09").unwrap();
        assert_eq!(conn.host, "cw09.example.com");
        assert_eq!(conn.port, 47623);
        assert_eq!(conn.protocol, None);
        assert_eq!(conn.code_page, "1047");
        assert_eq!(conn.timeout_secs, 30);
    }

    #[test]
    fn test_resolve_unknown_connection_is_configuration_error() {
        let toml = toml();
        let resolver = ConfigResolver::new(&toml, "/ws");
        match resolver.resolve_connection("nope") {
            Err(SyncError::Configuration { component, message }) => {
                assert_eq!(component, "ConnectionResolver");
                assert!(message.contains("nope"));
            }
            other => panic!("Expected Configuration error, got {:?}", other),
        }
        assert!(resolver.resolve_connection("  ").is_err());
    }

    #[test]
    fn test_resolve_inline_and_file_credentials() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("git.pass"), "from-file\n").unwrap();
        let toml = toml();
        let resolver = ConfigResolver::new(&toml, dir.path());

        let inline = resolver.resolve_credentials("inline").unwrap().unwrap();
        assert_eq!(inline.username, "XDEVREG");
        assert_eq!(inline.secret, "s3cret");

        let file = resolver.resolve_credentials("file").unwrap().unwrap();
        assert_eq!(file.secret, "from-file");
    }

    #[test]
    fn test_blank_credentials_id_is_none_and_unknown_is_error() {
        let toml = toml();
        let resolver = ConfigResolver::new(&toml, "/ws");
        assert!(resolver.resolve_credentials("").unwrap().is_none());
        assert!(resolver.resolve_credentials("ghost").is_err());
        assert!(resolver.resolve_credentials("env").is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("XDEVREG", "s3cret");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("XDEVREG"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn test_static_environment_ignores_blank_values() {
        let env = StaticEnvironment::new("/ws")
            .with_var("ref", "refs/heads/main")
            .with_var("fromHash", "  ");
        assert_eq!(env.var("ref").as_deref(), Some("refs/heads/main"));
        assert_eq!(env.var("fromHash"), None);
        assert_eq!(env.workspace(), Path::new("/ws"));
    }
}
