use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc,
    Weekday,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct WorkSettings {
    pub company_id: u64,
    #[schema(value_type = String, example = "09:00:00")]
    pub work_start: NaiveTime,
    #[schema(value_type = String, example = "18:00:00")]
    pub work_end: NaiveTime,
    pub grace_minutes: u32,
    pub half_day_hours: f64,
    #[schema(example = "MON,TUE,WED,THU,FRI")]
    pub working_days: String,
    pub paid_leave_days: u32,
    pub sick_leave_days: u32,
    pub pf_rate_percent: f64,
    pub professional_tax: f64,
    pub session_timeout_minutes: u32,
    pub screenshot_interval_seconds: u32,
    pub utc_offset_minutes: i32,
}

pub const SELECT_WORK_SETTINGS: &str = r#"
    SELECT company_id, work_start, work_end, grace_minutes, half_day_hours, working_days,
           paid_leave_days, sick_leave_days, pf_rate_percent, professional_tax,
           session_timeout_minutes, screenshot_interval_seconds, utc_offset_minutes
    FROM work_settings
    WHERE company_id = ?
"#;

fn parse_weekday(token: &str) -> Option<Weekday> {
    match token.trim().to_ascii_uppercase().as_str() {
        "MON" => Some(Weekday::Mon),
        "TUE" => Some(Weekday::Tue),
        "WED" => Some(Weekday::Wed),
        "THU" => Some(Weekday::Thu),
        "FRI" => Some(Weekday::Fri),
        "SAT" => Some(Weekday::Sat),
        "SUN" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parses `MON,TUE,...`; `None` when a token is unknown or the set is empty.
pub fn parse_working_days(raw: &str) -> Option<Vec<Weekday>> {
    let mut days = Vec::new();
    for token in raw.split(',').filter(|t| !t.trim().is_empty()) {
        let day = parse_weekday(token)?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() { None } else { Some(days) }
}

impl WorkSettings {
    pub fn defaults(company_id: u64) -> Self {
        Self {
            company_id,
            work_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            work_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            grace_minutes: 15,
            half_day_hours: 4.0,
            working_days: "MON,TUE,WED,THU,FRI".to_string(),
            paid_leave_days: 24,
            sick_leave_days: 7,
            pf_rate_percent: 12.0,
            professional_tax: 200.0,
            session_timeout_minutes: 30,
            screenshot_interval_seconds: 10,
            utc_offset_minutes: 0,
        }
    }

    pub fn weekdays(&self) -> Vec<Weekday> {
        parse_working_days(&self.working_days)
            .unwrap_or_else(|| vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri])
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.weekdays().contains(&date.weekday())
    }

    /// Working days in `[start, end]`, both inclusive.
    pub fn count_working_days(&self, start: NaiveDate, end: NaiveDate) -> u32 {
        if start > end {
            return 0;
        }
        let weekdays = self.weekdays();
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| weekdays.contains(&d.weekday()))
            .count() as u32
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Company wall-clock time for a UTC instant.
    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.with_timezone(&self.offset()).naive_local()
    }

    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local_time(now).date()
    }

    /// Late when the check-in falls after work start plus the grace period.
    pub fn is_late(&self, local_check_in: NaiveTime) -> bool {
        let deadline = self.work_start + Duration::minutes(i64::from(self.grace_minutes));
        // Overflow past midnight means nobody can be late.
        if deadline < self.work_start {
            return false;
        }
        local_check_in > deadline
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.work_start >= self.work_end {
            return Err(ApiError::bad_request("work_start must be before work_end"));
        }
        if !(0.0..=100.0).contains(&self.pf_rate_percent) {
            return Err(ApiError::bad_request("pf_rate_percent must be between 0 and 100"));
        }
        if self.professional_tax < 0.0 {
            return Err(ApiError::bad_request("professional_tax cannot be negative"));
        }
        if self.half_day_hours < 0.0 {
            return Err(ApiError::bad_request("half_day_hours cannot be negative"));
        }
        if self.session_timeout_minutes == 0 {
            return Err(ApiError::bad_request("session_timeout_minutes must be at least 1"));
        }
        if self.screenshot_interval_seconds == 0 {
            return Err(ApiError::bad_request("screenshot_interval_seconds must be at least 1"));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(ApiError::bad_request("utc_offset_minutes out of range"));
        }
        if parse_working_days(&self.working_days).is_none() {
            return Err(ApiError::bad_request(
                "working_days must be a comma separated list of MON..SUN",
            ));
        }
        Ok(())
    }
}

/// Loads the company's settings, falling back to defaults when no row exists.
pub async fn load(pool: &sqlx::MySqlPool, company_id: u64) -> Result<WorkSettings, sqlx::Error> {
    let settings = sqlx::query_as::<_, WorkSettings>(SELECT_WORK_SETTINGS)
        .bind(company_id)
        .fetch_optional(pool)
        .await?;
    Ok(settings.unwrap_or_else(|| WorkSettings::defaults(company_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn working_days_parse_and_dedupe() {
        let days = parse_working_days("mon, TUE,Mon").unwrap();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Tue]);
        assert!(parse_working_days("").is_none());
        assert!(parse_working_days("MON,FUNDAY").is_none());
    }

    #[test]
    fn counts_weekdays_only() {
        let s = WorkSettings::defaults(1);
        // 2025-10-01 is a Wednesday; October 2025 has 23 weekdays.
        assert_eq!(s.count_working_days(date(2025, 10, 1), date(2025, 10, 31)), 23);
        // Saturday + Sunday
        assert_eq!(s.count_working_days(date(2025, 10, 4), date(2025, 10, 5)), 0);
        assert_eq!(s.count_working_days(date(2025, 10, 6), date(2025, 10, 6)), 1);
        assert_eq!(s.count_working_days(date(2025, 10, 7), date(2025, 10, 6)), 0);
    }

    #[test]
    fn six_day_week_counts_saturdays() {
        let mut s = WorkSettings::defaults(1);
        s.working_days = "MON,TUE,WED,THU,FRI,SAT".into();
        assert_eq!(s.count_working_days(date(2025, 10, 4), date(2025, 10, 5)), 1);
    }

    #[test]
    fn late_after_grace_period() {
        let s = WorkSettings::defaults(1);
        assert!(!s.is_late(NaiveTime::from_hms_opt(9, 15, 0).unwrap()));
        assert!(s.is_late(NaiveTime::from_hms_opt(9, 15, 1).unwrap()));
        assert!(!s.is_late(NaiveTime::from_hms_opt(8, 0, 0).unwrap()));
    }

    #[test]
    fn local_date_honours_offset() {
        let mut s = WorkSettings::defaults(1);
        s.utc_offset_minutes = 330; // UTC+05:30
        let now = Utc.with_ymd_and_hms(2025, 10, 1, 20, 0, 0).unwrap();
        assert_eq!(s.local_date(now), date(2025, 10, 2));
        assert_eq!(s.local_time(now).time(), NaiveTime::from_hms_opt(1, 30, 0).unwrap());
    }

    #[test]
    fn validation_rejects_inverted_hours_and_bad_rates() {
        let mut s = WorkSettings::defaults(1);
        assert!(s.validate().is_ok());

        s.work_end = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert!(s.validate().is_err());

        let mut s = WorkSettings::defaults(1);
        s.pf_rate_percent = 120.0;
        assert!(s.validate().is_err());

        let mut s = WorkSettings::defaults(1);
        s.working_days = "NOPE".into();
        assert!(s.validate().is_err());
    }
}
