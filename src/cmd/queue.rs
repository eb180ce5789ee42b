//! Push queue inspection, `ispw-sync queue`.

use anyhow::Result;
use std::path::Path;

use super::super::{Cli, QueueCommands};

pub fn cmd_queue(cli: &Cli, workspace: &Path, command: QueueCommands) -> Result<()> {
    use ispw_sync::queue::PushQueueStore;

    let config = super::load_config(cli, workspace)?;
    let queue_path = config.queue_file();

    if !queue_path.exists() {
        println!("No push queue at {}", queue_path.display());
        return Ok(());
    }

    match command {
        QueueCommands::List => {
            let store = PushQueueStore::open(&queue_path)?;
            let events = store.list()?;
            store.close()?;

            println!();
            println!("{}", console::style("Pending push events").bold().cyan());
            println!("Queue file: {}", queue_path.display());
            println!();
            if events.is_empty() {
                println!("  {}", console::style("(empty)").dim());
            }
            for (idx, event) in events.iter().enumerate() {
                println!(
                    "  {:>3}. {}  {}  {} {}/{}/{}",
                    idx + 1,
                    console::style(&event.branch).bold(),
                    event.describe(),
                    console::style(event.recorded_at.format("%Y-%m-%d %H:%M:%S")).dim(),
                    event.stream,
                    event.app,
                    event.level
                );
            }
            println!();
        }
        QueueCommands::Clear => {
            let mut store = PushQueueStore::open(&queue_path)?;
            let removed = store.clear()?;
            store.close()?;
            println!(
                "{} {} push event(s) from {}",
                console::style("Removed").yellow(),
                removed,
                queue_path.display()
            );
        }
    }

    Ok(())
}
