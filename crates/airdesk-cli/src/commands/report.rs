//! Report export recording commands.

use airdesk_core::{parse_euro_cents, Database, PeriodKey, ReportKind, REPORT_TZ};
use chrono::Utc;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ReportAction {
    /// Record a daily report export
    RecordDaily {
        /// Period (YYYY-MM-DD), default today
        #[arg(long)]
        period: Option<String>,
        /// Number of sales entries in the report
        #[arg(long, default_value = "0")]
        entries: i64,
        /// Total amount, e.g. "1234.50"
        #[arg(long, default_value = "0")]
        total: String,
        /// Exporting user ID
        #[arg(long)]
        by: Option<i64>,
    },
    /// Record a monthly report export
    RecordMonthly {
        /// Period (YYYY-MM), default current month
        #[arg(long)]
        period: Option<String>,
        #[arg(long, default_value = "0")]
        entries: i64,
        #[arg(long, default_value = "0")]
        total: String,
        #[arg(long)]
        by: Option<i64>,
    },
    /// List recorded exports
    List,
}

fn parse_period(raw: Option<String>, default: PeriodKey) -> Result<PeriodKey, String> {
    match raw {
        Some(s) => PeriodKey::parse(&s).ok_or(format!("invalid period '{s}'")),
        None => Ok(default),
    }
}

fn parse_amount(raw: &str) -> Result<i64, String> {
    parse_euro_cents(raw).ok_or(format!("invalid amount '{raw}'"))
}

pub fn run(action: ReportAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;
    let now = Utc::now();

    match action {
        ReportAction::RecordDaily {
            period,
            entries,
            total,
            by,
        } => {
            let period = parse_period(period, PeriodKey::day_of(now, REPORT_TZ))?;
            let export = db.record_report_export(
                ReportKind::Daily,
                &period,
                entries,
                parse_amount(&total)?,
                by,
                now,
            )?;
            println!("{}", serde_json::to_string_pretty(&export)?);
        }
        ReportAction::RecordMonthly {
            period,
            entries,
            total,
            by,
        } => {
            let period = parse_period(period, PeriodKey::month_of(now, REPORT_TZ))?;
            let export = db.record_report_export(
                ReportKind::Monthly,
                &period,
                entries,
                parse_amount(&total)?,
                by,
                now,
            )?;
            println!("{}", serde_json::to_string_pretty(&export)?);
        }
        ReportAction::List => {
            let exports = db.report_exports()?;
            println!("{}", serde_json::to_string_pretty(&exports)?);
        }
    }
    Ok(())
}
