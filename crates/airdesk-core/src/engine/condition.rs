//! Trackable condition kinds.

use serde::{Deserialize, Serialize};

/// Enumerated category of trackable event. Together with a period key and an
/// optional subject id it forms the snapshot dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    UserCreated,
    UserDeleted,
    DailyReportCreated,
    DailyReportMissing,
    MonthlyReportCreated,
    MonthlyReportMissing,
    RewardComputed,
}

impl ConditionKind {
    /// Database string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::UserCreated => "USER_CREATED",
            ConditionKind::UserDeleted => "USER_DELETED",
            ConditionKind::DailyReportCreated => "DAILY_REPORT_CREATED",
            ConditionKind::DailyReportMissing => "DAILY_REPORT_MISSING",
            ConditionKind::MonthlyReportCreated => "MONTHLY_REPORT_CREATED",
            ConditionKind::MonthlyReportMissing => "MONTHLY_REPORT_MISSING",
            ConditionKind::RewardComputed => "REWARD_COMPUTED",
        }
    }

    /// Parse a database string back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER_CREATED" => Some(ConditionKind::UserCreated),
            "USER_DELETED" => Some(ConditionKind::UserDeleted),
            "DAILY_REPORT_CREATED" => Some(ConditionKind::DailyReportCreated),
            "DAILY_REPORT_MISSING" => Some(ConditionKind::DailyReportMissing),
            "MONTHLY_REPORT_CREATED" => Some(ConditionKind::MonthlyReportCreated),
            "MONTHLY_REPORT_MISSING" => Some(ConditionKind::MonthlyReportMissing),
            "REWARD_COMPUTED" => Some(ConditionKind::RewardComputed),
            _ => None,
        }
    }

    /// Short human label used by the popup fallback rendering.
    pub fn label(self) -> &'static str {
        match self {
            ConditionKind::UserCreated => "New account pending approval",
            ConditionKind::UserDeleted => "User account deleted",
            ConditionKind::DailyReportCreated => "Daily report exported",
            ConditionKind::DailyReportMissing => "Daily report missing",
            ConditionKind::MonthlyReportCreated => "Monthly report exported",
            ConditionKind::MonthlyReportMissing => "Monthly report missing",
            ConditionKind::RewardComputed => "Variable reward finalized",
        }
    }

    /// All kinds, in evaluation order.
    pub fn all() -> [ConditionKind; 7] {
        [
            ConditionKind::UserCreated,
            ConditionKind::UserDeleted,
            ConditionKind::DailyReportCreated,
            ConditionKind::DailyReportMissing,
            ConditionKind::MonthlyReportCreated,
            ConditionKind::MonthlyReportMissing,
            ConditionKind::RewardComputed,
        ]
    }
}
