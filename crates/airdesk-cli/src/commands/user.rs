//! User account management commands.

use airdesk_core::{Database, Role};
use chrono::Utc;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum UserAction {
    /// Register a new account (pending approval)
    Register {
        /// Full name
        fullname: String,
        /// Unique nickname
        nickname: String,
    },
    /// Approve a pending account
    Approve {
        /// User ID to approve
        id: i64,
        /// Approving admin/deputy user ID
        #[arg(long)]
        by: i64,
    },
    /// Delete an account (writes a tombstone)
    Delete {
        /// User ID to delete
        id: i64,
    },
    /// List accounts, pending approval first
    List,
}

pub fn run(action: UserAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;
    let now = Utc::now();
    db.ensure_default_admin(now)?;

    match action {
        UserAction::Register { fullname, nickname } => {
            let user = db.register_user(&fullname, &nickname, now)?;
            println!("Account created, waiting for approval: {}", user.id);
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        UserAction::Approve { id, by } => {
            let approver = db.user(by)?.ok_or("approving user not found")?;
            if approver.role == Role::User {
                return Err("only an Admin or Deputy can approve accounts".into());
            }
            if db.approve_user(id, by, now)? {
                println!("User approved.");
            } else {
                println!("User not found or already approved.");
            }
        }
        UserAction::Delete { id } => {
            let user = db.user(id)?.ok_or("user not found")?;
            if user.role == Role::Admin && db.count_admins()? <= 1 {
                return Err("cannot delete the last Admin; reassign the role first".into());
            }
            db.delete_user(id, now)?;
            println!("User deleted.");
        }
        UserAction::List => {
            let users = db.list_users()?;
            println!("{}", serde_json::to_string_pretty(&users)?);
        }
    }
    Ok(())
}
