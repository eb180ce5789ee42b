//! One build pass, `ispw-sync run`.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::super::Cli;

pub async fn cmd_run(cli: &Cli, workspace: PathBuf, clear_failures: bool) -> Result<()> {
    use ispw_sync::notify::{BitbucketNotifier, GitHostNotifier, ResultReporter, StatusTemplate};
    use ispw_sync::orchestrator::SyncOrchestrator;
    use ispw_sync::resolve::{BuildEnvironment, ConfigResolver, ProcessEnvironment};

    let config = super::load_config(cli, &workspace)?.with_cli_args(cli.verbose, clear_failures);
    for warning in config.validate() {
        warn!("Configuration warning: {}", warning);
    }

    // Relative password files resolve next to the config file.
    let secrets_dir = cli
        .config
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.state_dir.clone());
    let resolver = ConfigResolver::new(&config.toml, secrets_dir);
    let env = ProcessEnvironment::capture(workspace);

    let report = SyncOrchestrator::new(&config, &resolver, &resolver, &env)
        .run()
        .await?;

    let notify = &config.toml.notify;
    let notifier = match (&report.git_credentials, notify.enabled) {
        (_, false) => {
            info!("Commit status notification is disabled");
            None
        }
        (None, true) => {
            info!("No git credentials; commit status notification skipped");
            None
        }
        (Some(creds), true) => {
            match BitbucketNotifier::for_repository(&report.repo_url, &notify.base_url, creds.clone())
            {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!("Commit status notification skipped: {}", e);
                    None
                }
            }
        }
    };

    let name = match (env.var("JOB_NAME"), env.var("BUILD_NUMBER")) {
        (Some(job), Some(number)) => format!("{} #{}", job, number),
        (Some(job), None) => job,
        _ => "ispw-sync".to_string(),
    };
    let template = StatusTemplate {
        key: notify.key.clone(),
        name,
        url: env.var("BUILD_URL").unwrap_or_else(|| report.repo_url.clone()),
    };

    ResultReporter::new(
        notifier.as_ref().map(|n| n as &dyn GitHostNotifier),
        template,
    )
    .report(&report)
    .await?;

    report.into_result()?;
    Ok(())
}
