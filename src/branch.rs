//! Branch mapping: translate a Git ref into an ISPW stream, application and
//! checkout level.
//!
//! The text form is the one ISPW users already write, one rule per line:
//!
//! ```text
//! # pattern => level, container preference, container description
//! */master => MASTER, per-branch
//! */dev*   => DEV1, per-commit
//! *        => DEV2, per-branch
//! ```

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// One mapping rule. `stream` and `app` fall back to the job-level values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRule {
    pub pattern: String,
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_pref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_desc: Option<String>,
}

impl BranchRule {
    pub fn new(pattern: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            level: level.into(),
            stream: None,
            app: None,
            container_pref: None,
            container_desc: None,
        }
    }

    /// A rule matches when its pattern matches either the full ref
    /// (`refs/heads/dev1`) or the short branch name (`dev1`).
    pub fn matches(&self, git_ref: &str) -> bool {
        pattern_matches(&self.pattern, git_ref)
            || pattern_matches(&self.pattern, branch_name(git_ref))
    }

    pub fn is_default(&self) -> bool {
        self.pattern.trim() == "*"
    }
}

/// Ordered rule table; first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchMapping {
    rules: Vec<BranchRule>,
    default_level: Option<String>,
}

impl BranchMapping {
    pub fn new(rules: Vec<BranchRule>, default_level: Option<String>) -> Self {
        let default_level = default_level.filter(|l| !l.trim().is_empty());
        Self {
            rules,
            default_level,
        }
    }

    /// Parse the ISPW text form.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self::new(parse_rules(text)?, None))
    }

    pub fn rules(&self) -> &[BranchRule] {
        &self.rules
    }

    pub fn has_default(&self) -> bool {
        self.default_level.is_some() || self.rules.iter().any(BranchRule::is_default)
    }

    /// First rule matching `git_ref`, or a synthesized catch-all built from
    /// `default_level` when nothing matches.
    pub fn resolve(&self, git_ref: &str) -> Option<BranchRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(git_ref))
            .cloned()
            .or_else(|| {
                self.default_level
                    .as_ref()
                    .map(|level| BranchRule::new("*", level.clone()))
            })
    }
}

/// Parse mapping lines of the form `pattern => level[, pref[, description]]`.
/// Blank lines and `#` comments are skipped.
pub fn parse_rules(text: &str) -> Result<Vec<BranchRule>> {
    let mut rules = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((pattern, target)) = line.split_once("=>") else {
            bail!(
                "Branch mapping line {} is missing '=>': {}",
                idx + 1,
                line
            );
        };
        let pattern = pattern.trim();
        if pattern.is_empty() {
            bail!("Branch mapping line {} has an empty branch pattern", idx + 1);
        }

        let mut parts = target.splitn(3, ',').map(str::trim);
        let level = parts.next().unwrap_or_default();
        if level.is_empty() {
            bail!("Branch mapping line {} has no ISPW level", idx + 1);
        }
        let container_pref = parts.next().filter(|s| !s.is_empty()).map(String::from);
        let container_desc = parts.next().filter(|s| !s.is_empty()).map(String::from);

        rules.push(BranchRule {
            pattern: pattern.to_string(),
            level: level.to_string(),
            stream: None,
            app: None,
            container_pref,
            container_desc,
        });
    }
    Ok(rules)
}

/// `refs/heads/feature/x` -> `feature/x`. Other refs are returned unchanged.
pub fn branch_name(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

/// Case-insensitive glob match: `*` matches any run of characters
/// (including `/`), `?` matches exactly one.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.trim().to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();
    glob_match(&pattern, &name)
}

fn glob_match(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => {
            // Collapse runs of stars.
            let rest = match rest.iter().position(|c| *c != '*') {
                Some(skip) => &rest[skip..],
                None => return true,
            };
            (0..=text.len()).any(|i| glob_match(rest, &text[i..]))
        }
        Some(('?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}
