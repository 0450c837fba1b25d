use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    HalfDay,
    OnLeave,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Attendance {
    pub id: u64,
    pub company_id: u64,
    pub user_id: u64,
    #[schema(value_type = String, format = "date", example = "2025-10-01")]
    pub date: NaiveDate,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_in: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_out: Option<DateTime<Utc>>,
    #[schema(example = "PRESENT")]
    pub status: String,
    pub is_late: bool,
    pub work_hours: Option<f64>,
}

pub const SELECT_ATTENDANCE: &str = r#"
    SELECT id, company_id, user_id, date, check_in, check_out, status, is_late, work_hours
    FROM attendance
"#;

/// Hours between check-in and check-out, rounded to two decimals.
pub fn worked_hours(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> f64 {
    let seconds = (check_out - check_in).num_seconds().max(0) as f64;
    (seconds / 36.0).round() / 100.0
}

/// Day status once the employee checks out.
pub fn classify_day(hours: f64, half_day_hours: f64) -> AttendanceStatus {
    if hours < half_day_hours {
        AttendanceStatus::HalfDay
    } else {
        AttendanceStatus::Present
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hours_are_rounded() {
        let start = Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 10, 1, 17, 20, 0).unwrap();
        assert_eq!(worked_hours(start, end), 8.33);
        assert_eq!(worked_hours(end, start), 0.0);
    }

    #[test]
    fn short_days_are_half_days() {
        assert_eq!(classify_day(3.5, 4.0), AttendanceStatus::HalfDay);
        assert_eq!(classify_day(4.0, 4.0), AttendanceStatus::Present);
        assert_eq!(AttendanceStatus::OnLeave.as_ref(), "ON_LEAVE");
    }
}
