//! Popup notification inbox commands.

use airdesk_core::SnapshotStore;
use chrono::Utc;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum InboxAction {
    /// List unread popup notifications
    List,
    /// Mark notifications as read, up to and including an ID
    MarkRead {
        /// Highest notification ID to mark
        up_to: i64,
    },
    /// Show recent snapshot history (the audit log)
    History {
        /// Maximum rows
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

pub fn run(action: InboxAction) -> Result<(), Box<dyn std::error::Error>> {
    let snapshots = SnapshotStore::open()?;

    match action {
        InboxAction::List => {
            let unread = snapshots.unread_popups()?;
            println!("{}", serde_json::to_string_pretty(&unread)?);
        }
        InboxAction::MarkRead { up_to } => {
            let changed = snapshots.mark_popups_read(up_to, Utc::now())?;
            println!("{changed} notification(s) marked read");
        }
        InboxAction::History { limit } => {
            let rows = snapshots.history(limit)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}
