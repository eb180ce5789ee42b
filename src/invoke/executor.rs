//! Spawns the Topaz Workbench CLI and maps its exit status.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::args::ArgumentList;
use crate::errors::SyncError;

#[cfg(windows)]
pub const SCRIPT_NAME: &str = "IspwCLI.bat";
#[cfg(not(windows))]
pub const SCRIPT_NAME: &str = "IspwCLI.sh";

/// Result of one CLI call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    Failure { exit_code: i32, reason: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            SyncOutcome::Success => 0,
            SyncOutcome::Failure { exit_code, .. } => *exit_code,
        }
    }
}

/// Name of the CLI wrapper script for this OS.
pub fn script_name() -> &'static str {
    SCRIPT_NAME
}

/// Resolve the CLI script under `install_dir`.
pub fn locate_script(install_dir: Option<&Path>) -> Result<PathBuf, SyncError> {
    let install_dir = install_dir.ok_or_else(|| {
        SyncError::config(
            "CliInvoker",
            "Topaz Workbench CLI location is not configured (cli.install_dir or ISPW_CLI_DIR)",
        )
    })?;
    let script = install_dir.join(SCRIPT_NAME);
    if !script.is_file() {
        return Err(SyncError::config(
            "CliInvoker",
            format!(
                "Topaz Workbench CLI file ({}) could not be found. Check the CLI location.",
                script.display()
            ),
        ));
    }
    debug!(script = %script.display(), "Located Topaz Workbench CLI");
    Ok(script)
}

/// Runs the CLI with its stdout streamed into the build log.
#[derive(Debug, Clone, Default)]
pub struct CliExecutor {
    env: BTreeMap<String, String>,
}

impl CliExecutor {
    /// `env` is added on top of the inherited process environment.
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self { env }
    }

    /// Spawn `args`, wait for it to exit (no timeout) and map the status.
    /// A process killed by a signal reports exit code -1.
    pub async fn run(&self, args: &ArgumentList, working_dir: &Path) -> Result<SyncOutcome, SyncError> {
        std::fs::create_dir_all(working_dir)
            .with_context(|| format!("Failed to create working directory {}", working_dir.display()))?;

        info!("Shell script: {}", args);

        let program = PathBuf::from(args.program());
        let mut child = Command::new(&program)
            .args(args.arguments())
            .envs(&self.env)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SyncError::Launch {
                program: program.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout).lines();
            while let Some(line) = reader
                .next_line()
                .await
                .context("Failed to read CLI output")?
            {
                println!("{}", line);
            }
        }

        let status = child.wait().await.context("Failed to wait for the CLI")?;
        let exit_code = status.code().unwrap_or(-1);
        let script = display_name(&program);

        if exit_code == 0 {
            info!("Call {} exited with value = {}", script, exit_code);
            Ok(SyncOutcome::Success)
        } else {
            warn!("Call {} exited with value = {}", script, exit_code);
            Ok(SyncOutcome::Failure {
                exit_code,
                reason: format!("Call {} exited with value = {}", script, exit_code),
            })
        }
    }
}

fn display_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}
