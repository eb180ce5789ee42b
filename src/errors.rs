//! Typed error hierarchy for the ISPW synchronizer.
//!
//! - `SyncError` covers everything that can stop or fail a build pass
//! - `NotificationError` covers the git host status call, which is
//!   best-effort and never escalated

use std::path::PathBuf;
use thiserror::Error;

/// Errors from a synchronization pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Unresolvable connection, missing credentials, unmatched branch mapping,
    /// missing Git SCM. Raised before the CLI is invoked.
    #[error("{component}: {message}")]
    Configuration {
        component: &'static str,
        message: String,
    },

    #[error("An error occurred while synchronizing source to ISPW: {script} exited with value = {exit_code}")]
    TransientSyncFailure { script: String, exit_code: i32 },

    #[error("Push queue store {path} is unusable: {source}")]
    StoreCorruption {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Push queue entry {seq} could not be decoded: {source}")]
    CorruptEntry {
        seq: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn config(component: &'static str, message: impl Into<String>) -> Self {
        SyncError::Configuration {
            component,
            message: message.into(),
        }
    }

    /// Fatal errors point at the local environment; a transient failure is
    /// retried through the queue on the next build.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::TransientSyncFailure { .. })
    }
}

/// Errors from posting a commit status to the git host.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Git host unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Git host rejected status for {hash} with HTTP {status}: {body}")]
    Rejected {
        hash: String,
        status: u16,
        body: String,
    },

    #[error("Cannot derive git host API base from repository URL '{0}'")]
    InvalidBaseUrl(String),
}
