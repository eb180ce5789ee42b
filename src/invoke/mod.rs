//! Topaz Workbench CLI invocation: argument assembly and process execution.

pub mod args;
pub mod executor;

pub use args::{ArgumentList, Batch, SyncParameters, TargetPaths, build_arguments};
pub use executor::{CliExecutor, SyncOutcome, locate_script, script_name};
