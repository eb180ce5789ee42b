use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of pending work: a Git commit range plus the ISPW target it
/// was mapped to when the build recorded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub from_hash: String,
    /// May hold several space-separated hashes; stored verbatim.
    pub to_hash: String,
    pub branch: String,
    pub stream: String,
    pub app: String,
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_pref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_desc: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl PushEvent {
    /// The individual commit hashes named by `to_hash`.
    pub fn to_hashes(&self) -> impl Iterator<Item = &str> {
        self.to_hash.split_whitespace()
    }

    /// Short human form used in log lines: `main abc123..def456`.
    pub fn describe(&self) -> String {
        format!(
            "{} {}..{}",
            self.branch,
            abbreviate(&self.from_hash),
            abbreviate(self.to_hash.trim())
        )
    }
}

fn abbreviate(hash: &str) -> &str {
    match hash.char_indices().nth(10) {
        Some((idx, _)) if !hash.contains(char::is_whitespace) => &hash[..idx],
        _ => hash,
    }
}

#[cfg(test)]
pub(crate) fn sample_event(git_ref: &str, from: &str, to: &str) -> PushEvent {
    PushEvent {
        git_ref: git_ref.to_string(),
        from_hash: from.to_string(),
        to_hash: to.to_string(),
        branch: git_ref.trim_start_matches("refs/heads/").to_string(),
        stream: "PLAY".to_string(),
        app: "PLAY".to_string(),
        level: "DEV1".to_string(),
        container_pref: Some("per-branch".to_string()),
        container_desc: None,
        recorded_at: Utc::now(),
    }
}
