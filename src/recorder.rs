//! Turn the current build into a queued [`PushEvent`].

use chrono::Utc;
use tracing::info;

use crate::branch::{BranchMapping, branch_name};
use crate::errors::SyncError;
use crate::queue::{PushEvent, PushQueueStore};
use crate::resolve::BuildEnvironment;
use crate::sync_config::IspwSection;

/// Webhook parameter names, with the Jenkins Git plugin variables as
/// fallbacks for builds not started by a push hook.
pub const REF_VARS: &[&str] = &["ref", "GIT_BRANCH"];
pub const FROM_HASH_VARS: &[&str] = &["fromHash", "GIT_PREVIOUS_COMMIT"];
pub const TO_HASH_VARS: &[&str] = &["toHash", "GIT_COMMIT"];

/// Hash used as `fromHash` for a newly created branch.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000";

/// The commit range this build was triggered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRange {
    pub git_ref: String,
    pub from_hash: String,
    pub to_hash: String,
}

impl CommitRange {
    pub fn from_env(env: &dyn BuildEnvironment) -> Result<Self, SyncError> {
        let git_ref = first_var(env, REF_VARS).ok_or_else(|| {
            SyncError::config(
                "PushEventRecorder",
                "The build has no Git ref (set 'ref' or GIT_BRANCH)",
            )
        })?;
        let to_hash = first_var(env, TO_HASH_VARS).ok_or_else(|| {
            SyncError::config(
                "PushEventRecorder",
                "The build has no target commit (set 'toHash' or GIT_COMMIT)",
            )
        })?;
        let from_hash = first_var(env, FROM_HASH_VARS).unwrap_or_else(|| ZERO_HASH.to_string());
        Ok(Self {
            git_ref: normalize_ref(&git_ref),
            from_hash,
            to_hash,
        })
    }
}

fn first_var(env: &dyn BuildEnvironment, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| env.var(name))
}

/// `origin/main` (as the Jenkins Git plugin reports it) becomes
/// `refs/heads/main`; full refs pass through.
fn normalize_ref(git_ref: &str) -> String {
    let git_ref = git_ref.trim();
    if git_ref.starts_with("refs/") {
        return git_ref.to_string();
    }
    let short = git_ref.strip_prefix("origin/").unwrap_or(git_ref);
    format!("refs/heads/{}", short)
}

/// Derives push events from the build and appends them to the queue.
pub struct PushEventRecorder<'a> {
    mapping: &'a BranchMapping,
    ispw: &'a IspwSection,
}

impl<'a> PushEventRecorder<'a> {
    pub fn new(mapping: &'a BranchMapping, ispw: &'a IspwSection) -> Self {
        Self { mapping, ispw }
    }

    /// Build the event for this build without touching the queue.
    pub fn derive(&self, env: &dyn BuildEnvironment) -> Result<PushEvent, SyncError> {
        let range = CommitRange::from_env(env)?;
        let rule = self.mapping.resolve(&range.git_ref).ok_or_else(|| {
            SyncError::config(
                "PushEventRecorder",
                format!(
                    "No branch mapping rule matches {} and no default rule exists",
                    range.git_ref
                ),
            )
        })?;

        let stream = non_blank(rule.stream.as_deref()).or_else(|| non_blank(Some(&self.ispw.stream)));
        let app = non_blank(rule.app.as_deref()).or_else(|| non_blank(Some(&self.ispw.app)));
        let (Some(stream), Some(app)) = (stream, app) else {
            return Err(SyncError::config(
                "PushEventRecorder",
                format!(
                    "Branch mapping rule '{}' resolves no ISPW stream/application",
                    rule.pattern
                ),
            ));
        };

        Ok(PushEvent {
            branch: branch_name(&range.git_ref).to_string(),
            git_ref: range.git_ref,
            from_hash: range.from_hash,
            to_hash: range.to_hash,
            stream,
            app,
            level: rule.level.trim().to_string(),
            container_pref: non_blank(rule.container_pref.as_deref())
                .or_else(|| non_blank(Some(&self.ispw.container_pref))),
            container_desc: non_blank(rule.container_desc.as_deref())
                .or_else(|| non_blank(Some(&self.ispw.container_desc))),
            recorded_at: Utc::now(),
        })
    }

    /// Append an event produced by [`derive`](Self::derive). One
    /// transaction, durable on return.
    pub fn record(store: &mut PushQueueStore, event: &PushEvent) -> Result<(), SyncError> {
        store.append(event)?;
        info!("Recorded push event {}", event.describe());
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
