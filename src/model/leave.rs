use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::errors::ApiError;
use crate::model::work_settings::WorkSettings;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveType {
    Paid,
    Sick,
    Unpaid,
}

/// Review state shared by leaves and join requests.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Leave {
    pub id: u64,
    pub company_id: u64,
    pub user_id: u64,
    #[schema(example = "SICK")]
    pub leave_type: String,
    #[schema(value_type = String, format = "date", example = "2025-10-06")]
    pub start_date: NaiveDate,
    #[schema(value_type = String, format = "date", example = "2025-10-07")]
    pub end_date: NaiveDate,
    pub days: u32,
    pub reason: Option<String>,
    #[schema(example = "PENDING")]
    pub status: String,
    pub reviewed_by: Option<u64>,
    pub review_note: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const SELECT_LEAVE: &str = r#"
    SELECT id, company_id, user_id, leave_type, start_date, end_date, days, reason,
           status, reviewed_by, review_note, reviewed_at, created_at
    FROM leaves
"#;

/// Checks the range and returns the number of working days it covers.
pub fn requested_days(
    settings: &WorkSettings,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<u32, ApiError> {
    if start > end {
        return Err(ApiError::bad_request("start_date cannot be after end_date"));
    }
    let days = settings.count_working_days(start, end);
    if days == 0 {
        return Err(ApiError::bad_request("Leave range contains no working days"));
    }
    Ok(days)
}

#[derive(Debug, Serialize, ToSchema, PartialEq)]
pub struct BalanceLine {
    #[schema(example = "PAID")]
    pub leave_type: LeaveType,
    pub allocated: Option<u32>,
    pub used: u32,
    pub remaining: Option<u32>,
}

impl BalanceLine {
    pub fn new(leave_type: LeaveType, allocated: Option<u32>, used: u32) -> Self {
        Self {
            leave_type,
            allocated,
            used,
            remaining: allocated.map(|a| a.saturating_sub(used)),
        }
    }
}

/// Yearly allocation for a leave type; `None` means uncapped.
pub fn allocation(settings: &WorkSettings, leave_type: LeaveType) -> Option<u32> {
    match leave_type {
        LeaveType::Paid => Some(settings.paid_leave_days),
        LeaveType::Sick => Some(settings.sick_leave_days),
        LeaveType::Unpaid => None,
    }
}

/// Fails when a capped leave type would exceed its allocation.
pub fn ensure_within_allocation(
    settings: &WorkSettings,
    leave_type: LeaveType,
    used: u32,
    requested: u32,
) -> Result<(), ApiError> {
    match allocation(settings, leave_type) {
        Some(allocated) if used + requested > allocated => Err(ApiError::bad_request(format!(
            "Insufficient {} leave balance: {} remaining, {} requested",
            leave_type.as_ref().to_lowercase(),
            allocated.saturating_sub(used),
            requested
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn start_after_end_is_rejected() {
        let s = WorkSettings::defaults(1);
        let err = requested_days(&s, date(2025, 10, 10), date(2025, 10, 9)).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn single_day_and_weekend_spanning_ranges() {
        let s = WorkSettings::defaults(1);
        assert_eq!(requested_days(&s, date(2025, 10, 6), date(2025, 10, 6)).unwrap(), 1);
        // Fri..Mon covers two working days.
        assert_eq!(requested_days(&s, date(2025, 10, 3), date(2025, 10, 6)).unwrap(), 2);
        assert!(requested_days(&s, date(2025, 10, 4), date(2025, 10, 5)).is_err());
    }

    #[test]
    fn allocation_caps_paid_and_sick_only() {
        let s = WorkSettings::defaults(1);
        assert!(ensure_within_allocation(&s, LeaveType::Sick, 5, 2).is_ok());
        assert!(ensure_within_allocation(&s, LeaveType::Sick, 5, 3).is_err());
        assert!(ensure_within_allocation(&s, LeaveType::Unpaid, 300, 30).is_ok());
    }

    #[test]
    fn balance_line_saturates() {
        let line = BalanceLine::new(LeaveType::Paid, Some(24), 30);
        assert_eq!(line.remaining, Some(0));
        let line = BalanceLine::new(LeaveType::Unpaid, None, 3);
        assert_eq!(line.remaining, None);
    }

    #[test]
    fn enum_names_match_storage() {
        assert_eq!(LeaveType::from_str("UNPAID").unwrap(), LeaveType::Unpaid);
        assert_eq!(ReviewStatus::Approved.as_ref(), "APPROVED");
    }
}
