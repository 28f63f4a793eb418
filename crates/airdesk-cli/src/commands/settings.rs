//! Account settings commands.

use airdesk_core::{ConditionKind, MailSettings, SettingsStore, Template};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Get a raw setting value
    Get {
        /// Setting key, e.g. "reward.commission_rate_bps"
        key: String,
    },
    /// Set a raw setting value
    Set {
        key: String,
        value: String,
    },
    /// Replace the notification recipient list (up to 10 addresses)
    Recipients {
        /// Email addresses
        emails: Vec<String>,
    },
    /// Set the notification template for a condition kind
    Template {
        /// Condition kind, e.g. DAILY_REPORT_MISSING
        kind: String,
        /// Subject line (placeholders allowed)
        #[arg(long)]
        subject: String,
        /// Body text (placeholders allowed)
        #[arg(long)]
        body: String,
    },
    /// Revert a condition kind to its built-in template
    ClearTemplate {
        kind: String,
    },
    /// Set mail credentials (overrides SMTP_* environment variables)
    Mail {
        #[arg(long)]
        host: String,
        #[arg(long, default_value = "587")]
        port: u16,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long, default_value = "")]
        sender: String,
    },
}

fn parse_kind(raw: &str) -> Result<ConditionKind, String> {
    ConditionKind::parse(raw).ok_or(format!("unknown condition kind '{raw}'"))
}

pub fn run(action: SettingsAction) -> Result<(), Box<dyn std::error::Error>> {
    let settings = SettingsStore::open()?;

    match action {
        SettingsAction::Get { key } => match settings.get(&key)? {
            Some(value) => println!("{value}"),
            None => {
                eprintln!("unknown key: {key}");
                std::process::exit(1);
            }
        },
        SettingsAction::Set { key, value } => {
            settings.set(&key, &value)?;
            println!("ok");
        }
        SettingsAction::Recipients { emails } => {
            settings.set_recipients(&emails)?;
            println!("{} recipient(s) configured", emails.len());
        }
        SettingsAction::Template {
            kind,
            subject,
            body,
        } => {
            settings.set_template(parse_kind(&kind)?, &Template { subject, body })?;
            println!("ok");
        }
        SettingsAction::ClearTemplate { kind } => {
            settings.clear_template(parse_kind(&kind)?)?;
            println!("ok");
        }
        SettingsAction::Mail {
            host,
            port,
            user,
            password,
            sender,
        } => {
            settings.set_mail_settings(&MailSettings {
                host,
                port,
                user,
                password,
                sender,
            })?;
            println!("ok");
        }
    }
    Ok(())
}
