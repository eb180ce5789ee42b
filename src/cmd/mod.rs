//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Run`            |
//! | `queue`  | `Queue`          |
//! | `config` | `Config`         |

pub mod config;
pub mod queue;
pub mod run;

pub use config::cmd_config;
pub use queue::cmd_queue;
pub use run::cmd_run;

use anyhow::Result;
use ispw_sync::sync_config::SyncConfig;
use std::path::Path;

use crate::Cli;

/// Load the job config honoring `--config`.
pub(crate) fn load_config(cli: &Cli, workspace: &Path) -> Result<SyncConfig> {
    SyncConfig::load(workspace.to_path_buf(), cli.config.as_deref())
}
