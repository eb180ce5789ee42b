//! Post-run reporting: remaining queue contents and commit statuses.
//!
//! Reporting never changes the build result. Store problems while
//! re-reading the queue are the only errors raised; notification
//! failures are logged and counted.

pub mod bitbucket;

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::{NotificationError, SyncError};
use crate::invoke::SyncOutcome;
use crate::orchestrator::SyncReport;
use crate::queue::PushQueueStore;

pub use bitbucket::{BitbucketNotifier, api_base_from_repo_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Successful,
    Failed,
}

impl BuildState {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildState::Successful => "SUCCESSFUL",
            BuildState::Failed => "FAILED",
        }
    }
}

/// The status attached to one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatus {
    pub state: BuildState,
    pub key: String,
    pub name: String,
    pub url: String,
    pub description: String,
}

#[async_trait]
pub trait GitHostNotifier: Send + Sync {
    async fn send_status(&self, hash: &str, status: &CommitStatus) -> Result<(), NotificationError>;
}

/// Static parts of every posted status.
#[derive(Debug, Clone, Default)]
pub struct StatusTemplate {
    pub key: String,
    /// Usually `JOB_NAME #BUILD_NUMBER`
    pub name: String,
    /// Usually `BUILD_URL`
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub remaining: usize,
    pub notified: Vec<String>,
    pub failed_notifications: usize,
}

pub struct ResultReporter<'a> {
    notifier: Option<&'a dyn GitHostNotifier>,
    template: StatusTemplate,
}

impl<'a> ResultReporter<'a> {
    /// `notifier = None` skips notification.
    pub fn new(notifier: Option<&'a dyn GitHostNotifier>, template: StatusTemplate) -> Self {
        Self { notifier, template }
    }

    pub async fn report(&self, report: &SyncReport) -> Result<ReportSummary, SyncError> {
        let remaining = read_remaining(&report.queue_path)?;

        if remaining.is_empty() {
            info!("Push queue is empty");
        } else {
            warn!(
                "{} push event(s) remain queued for the next build",
                remaining.len()
            );
            for (idx, event) in remaining.iter().enumerate() {
                warn!("  {}. {} ({})", idx + 1, event.describe(), event.recorded_at.to_rfc3339());
            }
        }

        let (state, description, hashes) = match &report.outcome {
            SyncOutcome::Success => (
                BuildState::Successful,
                format!("Synchronized {} push event(s) to ISPW", report.batch.events),
                distinct(report.batch.to_hashes()),
            ),
            SyncOutcome::Failure { reason, .. } => (
                BuildState::Failed,
                format!("ISPW synchronization failed: {}", reason),
                distinct(remaining.iter().flat_map(|e| e.to_hashes())),
            ),
        };

        let mut summary = ReportSummary {
            remaining: remaining.len(),
            ..Default::default()
        };

        let Some(notifier) = self.notifier else {
            info!("Commit status notification skipped");
            return Ok(summary);
        };

        let status = CommitStatus {
            state,
            key: self.template.key.clone(),
            name: self.template.name.clone(),
            url: self.template.url.clone(),
            description,
        };
        for hash in hashes {
            match notifier.send_status(&hash, &status).await {
                Ok(()) => {
                    info!("Posted {} build status for {}", state.as_str(), hash);
                    summary.notified.push(hash);
                }
                Err(e) => {
                    warn!("Could not post build status for {}: {}", hash, e);
                    summary.failed_notifications += 1;
                }
            }
        }
        Ok(summary)
    }
}

fn read_remaining(path: &Path) -> Result<Vec<crate::queue::PushEvent>, SyncError> {
    let store = PushQueueStore::open(path)?;
    let events = store.list()?;
    store.close()?;
    Ok(events)
}

fn distinct<'h>(hashes: impl IntoIterator<Item = &'h str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for hash in hashes {
        if !out.iter().any(|h| h == hash) {
            out.push(hash.to_string());
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every status call; optionally fails them all.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub calls: Mutex<Vec<(String, BuildState)>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<(String, BuildState)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GitHostNotifier for RecordingNotifier {
        async fn send_status(
            &self,
            hash: &str,
            status: &CommitStatus,
        ) -> Result<(), NotificationError> {
            self.calls
                .lock()
                .unwrap()
                .push((hash.to_string(), status.state));
            if self.fail {
                return Err(NotificationError::InvalidBaseUrl("test".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_build_state_wire_names() {
        assert_eq!(BuildState::Successful.as_str(), "SUCCESSFUL");
        assert_eq!(BuildState::Failed.as_str(), "FAILED");
    }

    #[test]
    fn test_distinct_keeps_first_occurrence_order() {
        assert_eq!(
            distinct(["b", "a", "b", "c", "a"]),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }
}
