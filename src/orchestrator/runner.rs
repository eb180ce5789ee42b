use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::state::{StateTracker, SyncState};
use crate::errors::SyncError;
use crate::invoke::{
    Batch, CliExecutor, SyncOutcome, SyncParameters, TargetPaths, build_arguments, locate_script,
};
use crate::queue::{PushEvent, PushQueueStore};
use crate::recorder::PushEventRecorder;
use crate::resolve::{BuildEnvironment, ConnectionResolver, CredentialResolver, Credentials};
use crate::scm;
use crate::sync_config::SyncConfig;

/// What one build pass did.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub states: Vec<SyncState>,
    /// The queue as submitted to the CLI.
    pub batch: Batch,
    /// The event recorded by this build.
    pub current: PushEvent,
    pub queue_path: PathBuf,
    pub repo_url: String,
    pub git_credentials: Option<Credentials>,
}

impl SyncReport {
    pub fn final_state(&self) -> SyncState {
        self.states.last().copied().unwrap_or(SyncState::Idle)
    }

    /// `Err(TransientSyncFailure)` when the CLI failed.
    pub fn into_result(self) -> Result<Self, SyncError> {
        match &self.outcome {
            SyncOutcome::Success => Ok(self),
            SyncOutcome::Failure { exit_code, .. } => Err(SyncError::TransientSyncFailure {
                script: crate::invoke::script_name().to_string(),
                exit_code: *exit_code,
            }),
        }
    }
}

/// Everything resolved up front, before the queue is touched.
struct Prepared {
    event: PushEvent,
    script: PathBuf,
    params: SyncParameters,
}

/// Drives one build through open → [clear] → record → invoke → reconcile.
pub struct SyncOrchestrator<'a> {
    config: &'a SyncConfig,
    connections: &'a dyn ConnectionResolver,
    credentials: &'a dyn CredentialResolver,
    env: &'a dyn BuildEnvironment,
    executor: CliExecutor,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        config: &'a SyncConfig,
        connections: &'a dyn ConnectionResolver,
        credentials: &'a dyn CredentialResolver,
        env: &'a dyn BuildEnvironment,
    ) -> Self {
        Self {
            config,
            connections,
            credentials,
            env,
            executor: CliExecutor::new(env.vars()),
        }
    }

    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let mut states = StateTracker::default();
        let queue_path = self.config.queue_file();

        info!("Previous push queue file = {}", queue_path.display());
        let mut store = PushQueueStore::open(&queue_path)?;
        states.advance(SyncState::QueueOpened);

        let prepared = match self.prepare() {
            Ok(p) => p,
            Err(e) => {
                states.advance(SyncState::Aborted);
                warn!("Synchronization aborted before recording: {}", e);
                return Err(e);
            }
        };

        if self.config.clear_failures() {
            let removed = abort_on_err(&mut states, store.clear())?;
            info!("Cleared {} previously failed push event(s)", removed);
            states.advance(SyncState::Cleared);
        }

        abort_on_err(
            &mut states,
            PushEventRecorder::record(&mut store, &prepared.event),
        )?;
        states.advance(SyncState::EventRecorded);

        let queue = abort_on_err(&mut states, store.list())?;
        let Some(batch) = Batch::from_queue(&queue) else {
            // The append above committed, so the queue holds at least it.
            states.advance(SyncState::Aborted);
            return Err(SyncError::StoreCorruption {
                path: queue_path,
                source: "push queue is empty after recording an event".into(),
            });
        };
        info!(
            events = batch.events,
            "Synchronizing {} queued push event(s)",
            batch.events
        );
        for event in &queue {
            debug!("  queued: {}", event.describe());
        }
        if !batch.overridden.is_empty() {
            warn!(
                "Queued push events differ in {}; submitting all of them as {} to {}/{}/{}",
                batch.overridden.join(", "),
                batch.git_ref,
                batch.stream,
                batch.app,
                batch.level
            );
        }

        let args = build_arguments(&prepared.script, &prepared.params, &batch);
        states.advance(SyncState::Invoking);
        let outcome = match self
            .executor
            .run(&args, &prepared.params.paths.data_dir)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                states.advance(SyncState::Aborted);
                return Err(e);
            }
        };

        match &outcome {
            SyncOutcome::Success => {
                let cleared = abort_on_err(&mut states, store.clear())?;
                debug!(cleared, "Queue cleared after successful synchronization");
            }
            SyncOutcome::Failure { exit_code, .. } => {
                warn!(
                    exit_code,
                    "Synchronization failed; {} push event(s) kept for the next build",
                    queue.len()
                );
            }
        }
        abort_on_err(&mut states, store.close())?;
        states.advance(SyncState::Reconciled);

        Ok(SyncReport {
            outcome,
            states: states.history().to_vec(),
            batch,
            current: prepared.event,
            queue_path,
            repo_url: prepared.params.repo_url,
            git_credentials: prepared.params.git_credentials,
        })
    }

    fn prepare(&self) -> Result<Prepared, SyncError> {
        let toml = &self.config.toml;

        let mapping = toml
            .branch_mapping()
            .map_err(|e| SyncError::config("BranchMapping", format!("{:#}", e)))?;
        let event = PushEventRecorder::new(&mapping, &toml.ispw).derive(self.env)?;

        let script = locate_script(self.config.cli_install_dir().as_deref())?;

        let connection = self
            .connections
            .resolve_connection(&toml.ispw.connection_id)?;
        info!("Using host connection: {}:{}", connection.host, connection.port);

        let ispw_credentials = self
            .credentials
            .resolve_credentials(&toml.ispw.credentials_id)?
            .ok_or_else(|| {
                SyncError::config(
                    "CredentialResolver",
                    "The host credentials were not able to be obtained.",
                )
            })?;

        let git_credentials = match self.credentials.resolve_credentials(&toml.git.credentials_id) {
            Ok(Some(creds)) => Some(creds),
            Ok(None) => {
                info!("No git credentials configured");
                None
            }
            Err(e) => {
                warn!("The git credentials were not able to be obtained: {}", e);
                None
            }
        };

        let repo_url = scm::repository_url(self.env.workspace(), &toml.git.repo_url)?;

        if self.config.debug() {
            info!(
                "host={}, port={}, protocol={}, codePage={}, timeout={}, userId={}, password={}, containerPref={}, containerDesc={}",
                connection.host,
                connection.port,
                connection.protocol.as_deref().unwrap_or(""),
                connection.code_page,
                connection.timeout_secs,
                ispw_credentials.username,
                ispw_credentials.secret,
                event.container_pref.as_deref().unwrap_or(""),
                event.container_desc.as_deref().unwrap_or(""),
            );
            if let Some(git) = &git_credentials {
                info!(
                    "gitRepoUrl={}, gitUserId={}, gitPassword={}",
                    repo_url, git.username, git.secret
                );
            }
        }

        let paths = TargetPaths {
            target_folder: self.config.target_folder(),
            data_dir: self.config.data_dir(),
            git_local_path: self.config.git_local_path(),
        };

        Ok(Prepared {
            event,
            script,
            params: SyncParameters {
                connection,
                ispw_credentials,
                git_credentials,
                runtime_config: toml.ispw.runtime_config.clone(),
                repo_url,
                paths,
            },
        })
    }
}

/// Record `Aborted` when a queue operation fails after the store opened.
fn abort_on_err<T>(states: &mut StateTracker, result: Result<T, SyncError>) -> Result<T, SyncError> {
    result.inspect_err(|e| {
        states.advance(SyncState::Aborted);
        warn!("Synchronization aborted: {}", e);
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::invoke::executor::tests::create_fake_cli;
    use crate::notify::tests::RecordingNotifier;
    use crate::notify::{BuildState, ResultReporter, StatusTemplate};
    use crate::queue::event::sample_event;
    use crate::resolve::{ConfigResolver, StaticEnvironment};
    use crate::sync_config::SyncToml;
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        workspace: PathBuf,
        cli_dir: PathBuf,
    }

    impl Fixture {
        fn new(cli_body: &str) -> Self {
            let dir = tempdir().unwrap();
            let workspace = dir.path().join("ws");
            let cli_dir = dir.path().join("cli");
            std::fs::create_dir_all(&workspace).unwrap();
            create_fake_cli(&cli_dir, cli_body);
            Self {
                _dir: dir,
                workspace,
                cli_dir,
            }
        }

        fn toml(&self, clear_failures: bool) -> SyncToml {
            SyncToml::parse(&format!(
                r#"
clear_failures = {clear_failures}

[ispw]
connection_id = "cw09"
credentials_id = "ispw"
stream = "PLAY"
app = "PLAY"

[git]
repo_url = "https://bb.example.com/scm/play/play.git"
credentials_id = "git"

[cli]
install_dir = "{cli}"

[branch_mapping]
mapping = "*/main => MAIN, per-branch"

[connections.cw09]
host = "cw09.example.com"
port = 47623

[credentials.ispw]
username = "XDEVREG"
password = "s3cret"

[credentials.git]
username = "builder"
password = "gitsecret"
"#,
                cli = self.cli_dir.display()
            ))
            .unwrap()
        }

        fn config(&self, clear_failures: bool) -> SyncConfig {
            SyncConfig::from_toml(self.workspace.clone(), self.toml(clear_failures))
        }

        fn env(&self) -> StaticEnvironment {
            StaticEnvironment::new(&self.workspace)
                .with_var("ref", "refs/heads/main")
                .with_var("fromHash", "abc123")
                .with_var("toHash", "def456")
        }

        fn seed(&self, events: &[PushEvent]) {
            let mut store = PushQueueStore::open(&crate::queue::queue_file(&self.workspace)).unwrap();
            for event in events {
                store.append(event).unwrap();
            }
        }

        fn queue(&self) -> Vec<PushEvent> {
            PushQueueStore::open(&crate::queue::queue_file(&self.workspace))
                .unwrap()
                .list()
                .unwrap()
        }

        async fn run(&self, clear_failures: bool) -> Result<SyncReport, SyncError> {
            let config = self.config(clear_failures);
            let resolver = ConfigResolver::new(&config.toml, &self.workspace);
            let env = self.env();
            SyncOrchestrator::new(&config, &resolver, &resolver, &env)
                .run()
                .await
        }
    }

    async fn report(report: &SyncReport, notifier: &RecordingNotifier) -> crate::notify::ReportSummary {
        ResultReporter::new(Some(notifier), StatusTemplate::default())
            .report(report)
            .await
            .unwrap()
    }

    fn stale(n: usize) -> Vec<PushEvent> {
        (0..n)
            .map(|i| sample_event("refs/heads/main", "000aaa", &format!("stale{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_success_on_empty_queue_clears_and_notifies() {
        let fx = Fixture::new("exit 0");
        let result = fx.run(false).await.unwrap();

        assert_eq!(result.outcome, SyncOutcome::Success);
        assert_eq!(
            result.states,
            vec![
                SyncState::Idle,
                SyncState::QueueOpened,
                SyncState::EventRecorded,
                SyncState::Invoking,
                SyncState::Reconciled
            ]
        );
        assert!(fx.queue().is_empty());

        let notifier = RecordingNotifier::default();
        let summary = report(&result, &notifier).await;
        assert_eq!(summary.remaining, 0);
        assert_eq!(
            notifier.calls(),
            vec![("def456".to_string(), BuildState::Successful)]
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_event_and_notifies_failure() {
        let fx = Fixture::new("exit 1");
        let result = fx.run(false).await.unwrap();

        assert_eq!(result.outcome.exit_code(), 1);
        assert_eq!(result.final_state(), SyncState::Reconciled);
        let queue = fx.queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0], result.current);
        assert_eq!(queue[0].git_ref, "refs/heads/main");
        assert_eq!(queue[0].from_hash, "abc123");
        assert_eq!(queue[0].to_hash, "def456");

        let notifier = RecordingNotifier::default();
        let summary = report(&result, &notifier).await;
        assert_eq!(summary.remaining, 1);
        assert_eq!(
            notifier.calls(),
            vec![("def456".to_string(), BuildState::Failed)]
        );

        match result.into_result() {
            Err(SyncError::TransientSyncFailure { exit_code, .. }) => assert_eq!(exit_code, 1),
            other => panic!("Expected TransientSyncFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_resolves_stale_backlog_together() {
        let fx = Fixture::new("exit 0");
        fx.seed(&stale(1));

        let result = fx.run(false).await.unwrap();
        assert_eq!(result.batch.events, 2);
        assert_eq!(result.batch.to_hash, "stale0 def456");
        assert!(fx.queue().is_empty());
    }

    #[tokio::test]
    async fn test_clear_failures_discards_backlog_before_recording() {
        let fx = Fixture::new("exit 1");
        fx.seed(&stale(3));

        let result = fx.run(true).await.unwrap();
        assert!(result.states.contains(&SyncState::Cleared));
        assert_eq!(result.batch.events, 1);
        let queue = fx.queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].to_hash, "def456");
    }

    #[tokio::test]
    async fn test_failure_with_backlog_keeps_all_events() {
        let fx = Fixture::new("exit 4");
        fx.seed(&stale(2));

        let result = fx.run(false).await.unwrap();
        let queue = fx.queue();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[2], result.current);

        let notifier = RecordingNotifier::default();
        report(&result, &notifier).await;
        let hashes: Vec<String> = notifier.calls().into_iter().map(|(h, _)| h).collect();
        assert_eq!(hashes, vec!["stale0", "stale1", "def456"]);
    }

    #[tokio::test]
    async fn test_repeated_failure_submits_identical_arguments() {
        let fx = Fixture::new("");
        let seen = fx.workspace.join("argv.log");
        create_fake_cli(
            &fx.cli_dir,
            &format!("printf '%s\\n' \"$@\" >> {}\nexit 1", seen.display()),
        );

        fx.run(false).await.unwrap();
        let first = std::fs::read_to_string(&seen).unwrap();
        std::fs::remove_file(&seen).unwrap();

        // The retry queues the same push again; the summarized batch is identical.
        fx.run(false).await.unwrap();
        assert_eq!(fx.queue().len(), 2);
        let second = std::fs::read_to_string(&seen).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("-gitHash\n\"def456\"\n"));
    }

    #[tokio::test]
    async fn test_missing_cli_aborts_without_touching_queue() {
        let fx = Fixture::new("exit 0");
        fx.seed(&stale(2));
        std::fs::remove_file(fx.cli_dir.join(crate::invoke::script_name())).unwrap();

        let err = fx.run(true).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Configuration {
                component: "CliInvoker",
                ..
            }
        ));
        assert_eq!(fx.queue().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_connection_aborts_without_touching_queue() {
        let fx = Fixture::new("exit 0");
        let mut toml = fx.toml(false);
        toml.ispw.connection_id = "nope".into();
        let config = SyncConfig::from_toml(fx.workspace.clone(), toml);
        let resolver = ConfigResolver::new(&config.toml, &fx.workspace);
        let env = fx.env();

        let err = SyncOrchestrator::new(&config, &resolver, &resolver, &env)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Configuration {
                component: "ConnectionResolver",
                ..
            }
        ));
        assert!(fx.queue().is_empty());
    }

    #[tokio::test]
    async fn test_missing_git_scm_aborts() {
        let fx = Fixture::new("exit 0");
        let mut toml = fx.toml(false);
        toml.git.repo_url.clear();
        let config = SyncConfig::from_toml(fx.workspace.clone(), toml);
        let resolver = ConfigResolver::new(&config.toml, &fx.workspace);
        let env = fx.env();

        let err = SyncOrchestrator::new(&config, &resolver, &resolver, &env)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Configuration { component: "Scm", .. }));
        assert!(fx.queue().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_notifier_never_fails_report() {
        let fx = Fixture::new("exit 0");
        let result = fx.run(false).await.unwrap();

        let notifier = RecordingNotifier::failing();
        let summary = report(&result, &notifier).await;
        assert_eq!(summary.failed_notifications, 1);
        assert!(summary.notified.is_empty());
    }

    #[tokio::test]
    async fn test_cli_runs_in_data_dir_with_build_env() {
        let fx = Fixture::new("");
        let seen = fx.workspace.join("cwd.log");
        create_fake_cli(
            &fx.cli_dir,
            &format!("pwd > {0}\necho \"$toHash\" >> {0}", seen.display()),
        );
        fx.run(false).await.unwrap();

        let text = std::fs::read_to_string(&seen).unwrap();
        let mut lines = text.lines();
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            fx.workspace.join("TopazCliWkspc").canonicalize().unwrap()
        );
        assert_eq!(lines.next(), Some("def456"));
        assert!(Path::new(&fx.workspace.join("TopazCliWkspc")).is_dir());
    }

    #[tokio::test]
    async fn test_backlog_from_another_branch_uses_newest_target() {
        let fx = Fixture::new("exit 0");
        fx.seed(&[sample_event("refs/heads/dev1", "aaa111", "bbb222")]);

        let result = fx.run(false).await.unwrap();
        assert_eq!(result.batch.git_ref, "refs/heads/main");
        assert_eq!(result.batch.level, "MAIN");
        assert_eq!(result.batch.from_hash, "aaa111");
        assert_eq!(result.batch.to_hash, "bbb222 def456");
        assert_eq!(result.batch.overridden, vec!["ref", "level"]);
    }

    #[test]
    fn test_queue_error_after_open_records_aborted() {
        let mut states = StateTracker::default();
        states.advance(SyncState::QueueOpened);

        let kept = abort_on_err(&mut states, Ok::<_, SyncError>(3));
        assert_eq!(kept.unwrap(), 3);
        assert_eq!(states.current(), SyncState::QueueOpened);

        let failed = abort_on_err(
            &mut states,
            Err::<(), _>(SyncError::config("PushQueueStore", "disk full")),
        );
        assert!(failed.is_err());
        assert_eq!(states.current(), SyncState::Aborted);
        assert_eq!(
            states.history(),
            &[SyncState::Idle, SyncState::QueueOpened, SyncState::Aborted]
        );
    }
}
