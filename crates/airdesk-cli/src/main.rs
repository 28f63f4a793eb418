use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "airdesk-cli", version, about = "Airdesk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a check point: evaluate triggers, deliver notifications
    Check {
        /// Evaluate at a fixed RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<String>,
    },
    /// User account management
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Report export recording
    Report {
        #[command(subcommand)]
        action: commands::report::ReportAction,
    },
    /// Variable reward management
    Reward {
        #[command(subcommand)]
        action: commands::reward::RewardAction,
    },
    /// Monthly fee totals per user
    Fees {
        #[command(subcommand)]
        action: commands::fees::FeesAction,
    },
    /// Account settings management
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Popup notification inbox
    Inbox {
        #[command(subcommand)]
        action: commands::inbox::InboxAction,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Check { at } => commands::check::run(at),
        Commands::User { action } => commands::user::run(action),
        Commands::Report { action } => commands::report::run(action),
        Commands::Reward { action } => commands::reward::run(action),
        Commands::Fees { action } => commands::fees::run(action),
        Commands::Settings { action } => commands::settings::run(action),
        Commands::Inbox { action } => commands::inbox::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
