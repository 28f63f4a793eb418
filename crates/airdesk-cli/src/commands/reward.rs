//! Variable reward commands.

use airdesk_core::{
    parse_euro_cents, Database, PeriodKey, RewardManager, SettingsStore, SnapshotStore,
};
use chrono::Utc;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum RewardAction {
    /// Compute the reward for (user, period) without recording anything
    Compute {
        /// User ID
        user: i64,
        /// Period (YYYY-MM)
        period: String,
    },
    /// Finalize the reward for (user, period); idempotent
    Finalize {
        user: i64,
        period: String,
    },
    /// Re-derive an already-finalized reward (admin-confirmed action)
    Recompute {
        user: i64,
        period: String,
    },
    /// Set a manual override amount, e.g. "150.00"
    Override {
        user: i64,
        period: String,
        amount: String,
    },
    /// Remove a manual override
    ClearOverride {
        user: i64,
        period: String,
    },
    /// Export every finalized reward for a period
    Export {
        period: String,
    },
    /// Show one user's finalized reward
    Show {
        user: i64,
        period: String,
    },
}

fn parse_period(raw: &str) -> Result<PeriodKey, String> {
    PeriodKey::parse(raw).ok_or(format!("invalid period '{raw}'"))
}

pub fn run(action: RewardAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;
    let snapshots = SnapshotStore::open()?;
    let settings = SettingsStore::open()?;
    let manager = RewardManager::new(&db, &snapshots, &settings);
    let now = Utc::now();

    match action {
        RewardAction::Compute { user, period } => {
            let cents = manager.compute_reward(user, &parse_period(&period)?)?;
            println!("{}.{:02}", cents / 100, (cents % 100).abs());
        }
        RewardAction::Finalize { user, period } => {
            let reward = manager.finalize_reward(user, &parse_period(&period)?, now)?;
            println!("{}", serde_json::to_string_pretty(&reward)?);
        }
        RewardAction::Recompute { user, period } => {
            let reward = manager.recompute_reward(user, &parse_period(&period)?, now)?;
            println!("{}", serde_json::to_string_pretty(&reward)?);
        }
        RewardAction::Override {
            user,
            period,
            amount,
        } => {
            let cents =
                parse_euro_cents(&amount).ok_or(format!("invalid amount '{amount}'"))?;
            db.set_override(user, &parse_period(&period)?, cents, now)?;
            println!("Override set. An already-finalized reward changes only on recompute.");
        }
        RewardAction::ClearOverride { user, period } => {
            if db.clear_override(user, &parse_period(&period)?)? {
                println!("Override removed.");
            } else {
                println!("No override was set.");
            }
        }
        RewardAction::Export { period } => {
            let rewards = manager.export_rewards(&parse_period(&period)?)?;
            println!("{}", serde_json::to_string_pretty(&rewards)?);
        }
        RewardAction::Show { user, period } => {
            match manager.export_reward(user, &parse_period(&period)?)? {
                Some(reward) => println!("{}", serde_json::to_string_pretty(&reward)?),
                None => println!("No finalized reward for this user and period."),
            }
        }
    }
    Ok(())
}
