//! Check-point command: evaluate triggers and deliver notifications.

use airdesk_core::{Engine, REPORT_TZ};
use chrono::{DateTime, Utc};

pub fn run(at: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let at = match at {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| format!("invalid --at instant '{raw}': {e}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let engine = Engine::open()?;
    let summary = engine.check_and_notify(at, REPORT_TZ)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
