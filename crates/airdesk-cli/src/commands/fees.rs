//! Monthly fee total commands.

use airdesk_core::{parse_euro_cents, Database, PeriodKey};
use chrono::Utc;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum FeesAction {
    /// Set a user's airport-fee total for a period, e.g. "2400.00"
    Set {
        /// User ID
        user: i64,
        /// Period (YYYY-MM)
        period: String,
        /// Fee total
        amount: String,
    },
    /// List fee totals for a period
    List {
        period: String,
    },
}

pub fn run(action: FeesAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;

    match action {
        FeesAction::Set {
            user,
            period,
            amount,
        } => {
            let period = PeriodKey::parse(&period).ok_or(format!("invalid period '{period}'"))?;
            let cents = parse_euro_cents(&amount).ok_or(format!("invalid amount '{amount}'"))?;
            db.set_fee_total(user, &period, cents, Utc::now())?;
            println!("ok");
        }
        FeesAction::List { period } => {
            let period = PeriodKey::parse(&period).ok_or(format!("invalid period '{period}'"))?;
            let totals = db.fee_totals_for(&period)?;
            println!("{}", serde_json::to_string_pretty(&totals)?);
        }
    }
    Ok(())
}
