//! Repository URL discovery for the build workspace.

use std::path::Path;

use git2::Repository;
use tracing::debug;

use crate::errors::SyncError;

pub const REMOTE_NAME: &str = "origin";

/// The configured URL when set, otherwise the `origin` remote of the Git
/// repository containing `workspace`.
pub fn repository_url(workspace: &Path, configured: &str) -> Result<String, SyncError> {
    let configured = configured.trim();
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }

    let repo = Repository::discover(workspace).map_err(|e| {
        SyncError::config(
            "Scm",
            format!(
                "Git SCM is required: {} is not a Git repository and git.repo_url is not set ({})",
                workspace.display(),
                e.message()
            ),
        )
    })?;
    let url = origin_url(&repo).ok_or_else(|| {
        SyncError::config(
            "Scm",
            format!(
                "Git SCM is required: repository at {} has no '{}' remote URL",
                workspace.display(),
                REMOTE_NAME
            ),
        )
    })?;
    debug!(url = %url, "Repository URL read from origin remote");
    Ok(url)
}

fn origin_url(repo: &Repository) -> Option<String> {
    let remote = repo.find_remote(REMOTE_NAME).ok()?;
    remote
        .url()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(String::from)
}
