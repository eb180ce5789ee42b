//! Bitbucket Server build-status client.
//!
//! `POST {base}/rest/build-status/1.0/commits/{hash}` with basic auth.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use super::{CommitStatus, GitHostNotifier};
use crate::errors::NotificationError;
use crate::resolve::Credentials;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct BuildStatusBody<'a> {
    state: &'a str,
    key: &'a str,
    name: &'a str,
    url: &'a str,
    description: &'a str,
}

pub struct BitbucketNotifier {
    client: reqwest::Client,
    base: String,
    credentials: Credentials,
}

impl BitbucketNotifier {
    pub fn new(base: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Notifier for the server hosting `repo_url`, unless `base_override`
    /// names the API base explicitly.
    pub fn for_repository(
        repo_url: &str,
        base_override: &str,
        credentials: Credentials,
    ) -> Result<Self, NotificationError> {
        let base = if base_override.trim().is_empty() {
            api_base_from_repo_url(repo_url)?
        } else {
            base_override.trim().to_string()
        };
        Ok(Self::new(base, credentials))
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn status_url(&self, hash: &str) -> String {
        format!("{}/rest/build-status/1.0/commits/{}", self.base, hash)
    }
}

#[async_trait]
impl GitHostNotifier for BitbucketNotifier {
    async fn send_status(&self, hash: &str, status: &CommitStatus) -> Result<(), NotificationError> {
        let url = self.status_url(hash);
        let body = BuildStatusBody {
            state: status.state.as_str(),
            key: &status.key,
            name: &status.name,
            url: &status.url,
            description: &status.description,
        };
        debug!(url = %url, state = status.state.as_str(), "Posting build status");

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.secret))
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(NotificationError::Unreachable)?;

        let code = resp.status();
        if code.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(NotificationError::Rejected {
            hash: hash.to_string(),
            status: code.as_u16(),
            body: text,
        })
    }
}

/// `scheme://host[:port]` of the repository URL, keeping any context path
/// in front of `/scm/`. SSH URLs map to `https://host`.
///
/// - `https://bb.example.com/scm/play/play.git` -> `https://bb.example.com`
/// - `http://bb:7990/bitbucket/scm/p/r.git` -> `http://bb:7990/bitbucket`
/// - `ssh://git@bb.example.com:7999/p/r.git` -> `https://bb.example.com`
/// - `git@bb.example.com:p/r.git` -> `https://bb.example.com`
pub fn api_base_from_repo_url(repo_url: &str) -> Result<String, NotificationError> {
    let trimmed = repo_url.trim();
    let invalid = || NotificationError::InvalidBaseUrl(trimmed.to_string());

    if !trimmed.contains("://") {
        // scp-like syntax: [user@]host:path
        let (host_part, _) = trimmed.split_once(':').ok_or_else(invalid)?;
        let host = host_part.rsplit('@').next().unwrap_or(host_part);
        if host.is_empty() {
            return Err(invalid());
        }
        return Ok(format!("https://{}", host));
    }

    let url = Url::parse(trimmed).map_err(|_| invalid())?;
    let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
    match url.scheme() {
        "http" | "https" => {
            let mut base = format!("{}://{}", url.scheme(), host);
            if let Some(port) = url.port() {
                base.push_str(&format!(":{}", port));
            }
            if let Some(idx) = url.path().find("/scm/") {
                base.push_str(&url.path()[..idx]);
            }
            Ok(base)
        }
        "ssh" | "git" => Ok(format!("https://{}", host)),
        _ => Err(invalid()),
    }
}
