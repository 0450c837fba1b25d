use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::errors::ApiError;
use crate::model::work_settings::WorkSettings;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PayrollStatus {
    Draft,
    Paid,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Payroll {
    pub id: u64,
    pub company_id: u64,
    pub user_id: u64,
    #[schema(value_type = String, format = "date", example = "2025-10-01")]
    pub period: NaiveDate,
    pub working_days: u32,
    pub unpaid_days: u32,
    #[schema(example = 50000.0)]
    pub basic_salary: f64,
    pub unpaid_deduction: f64,
    pub gross_salary: f64,
    #[schema(example = 6000.0)]
    pub pf: f64,
    #[schema(example = 200.0)]
    pub professional_tax: f64,
    #[schema(example = 43800.0)]
    pub net_salary: f64,
    #[schema(example = "DRAFT")]
    pub status: String,
    pub generated_by: u64,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub paid_at: Option<DateTime<Utc>>,
}

pub const SELECT_PAYROLL: &str = r#"
    SELECT id, company_id, user_id, period, working_days, unpaid_days, basic_salary,
           unpaid_deduction, gross_salary, pf, professional_tax, net_salary, status,
           generated_by, created_at, paid_at
    FROM payrolls
"#;

/// A payroll month, stored as its first day.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Period {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
}

impl Period {
    /// Parses `YYYY-MM`.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let first_day = NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
            .map_err(|_| ApiError::bad_request("period must be formatted as YYYY-MM"))?;
        Self::from_first_day(first_day)
    }

    pub fn containing(date: NaiveDate) -> Self {
        let first_day = date.with_day(1).unwrap_or(date);
        let last_day = last_day_of_month(first_day).unwrap_or(first_day);
        Self { first_day, last_day }
    }

    fn from_first_day(first_day: NaiveDate) -> Result<Self, ApiError> {
        let last_day = last_day_of_month(first_day)
            .ok_or_else(|| ApiError::bad_request("period out of range"))?;
        Ok(Self { first_day, last_day })
    }

    pub fn label(&self) -> String {
        self.first_day.format("%Y-%m").to_string()
    }

    /// Clips `[start, end]` to this month; `None` when they do not meet.
    pub fn intersect(&self, start: NaiveDate, end: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let from = start.max(self.first_day);
        let to = end.min(self.last_day);
        (from <= to).then_some((from, to))
    }
}

fn last_day_of_month(first_day: NaiveDate) -> Option<NaiveDate> {
    let (y, m) = if first_day.month() == 12 {
        (first_day.year() + 1, 1)
    } else {
        (first_day.year(), first_day.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)?.pred_opt()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PayrollBreakdown {
    pub working_days: u32,
    pub unpaid_days: u32,
    pub basic_salary: f64,
    pub unpaid_deduction: f64,
    pub gross_salary: f64,
    pub pf: f64,
    pub professional_tax: f64,
    pub net_salary: f64,
}

impl PayrollBreakdown {
    /// gross = basic - unpaid deduction, pf = basic * rate, net = gross - pf - tax.
    pub fn compute(
        basic_salary: f64,
        working_days: u32,
        unpaid_days: u32,
        settings: &WorkSettings,
    ) -> Self {
        let basic_salary = round2(basic_salary.max(0.0));
        let unpaid_days = unpaid_days.min(working_days);
        let unpaid_deduction = if working_days == 0 {
            0.0
        } else {
            round2(basic_salary / f64::from(working_days) * f64::from(unpaid_days))
        };
        let gross_salary = round2(basic_salary - unpaid_deduction);
        let pf = round2(basic_salary * settings.pf_rate_percent / 100.0);
        let professional_tax = round2(settings.professional_tax);
        let net_salary = round2((gross_salary - pf - professional_tax).max(0.0));

        Self {
            working_days,
            unpaid_days,
            basic_salary,
            unpaid_deduction,
            gross_salary,
            pf,
            professional_tax,
            net_salary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_is_gross_minus_pf_minus_tax() {
        let s = WorkSettings::defaults(1);
        let p = PayrollBreakdown::compute(50_000.0, 22, 0, &s);
        assert_eq!(p.gross_salary, 50_000.0);
        assert_eq!(p.pf, 6_000.0);
        assert_eq!(p.professional_tax, 200.0);
        assert_eq!(p.net_salary, 43_800.0);
        assert_eq!(p.net_salary, p.gross_salary - p.pf - p.professional_tax);
    }

    #[test]
    fn unpaid_days_reduce_gross_but_not_pf() {
        let s = WorkSettings::defaults(1);
        let p = PayrollBreakdown::compute(22_000.0, 22, 2, &s);
        assert_eq!(p.unpaid_deduction, 2_000.0);
        assert_eq!(p.gross_salary, 20_000.0);
        assert_eq!(p.pf, 2_640.0);
        assert_eq!(p.net_salary, 17_160.0);
    }

    #[test]
    fn net_never_goes_negative() {
        let s = WorkSettings::defaults(1);
        let p = PayrollBreakdown::compute(100.0, 20, 20, &s);
        assert_eq!(p.gross_salary, 0.0);
        assert_eq!(p.net_salary, 0.0);
    }

    #[test]
    fn custom_rates_are_used() {
        let mut s = WorkSettings::defaults(1);
        s.pf_rate_percent = 10.0;
        s.professional_tax = 0.0;
        let p = PayrollBreakdown::compute(30_000.0, 0, 0, &s);
        assert_eq!(p.unpaid_deduction, 0.0);
        assert_eq!(p.net_salary, 27_000.0);
    }

    #[test]
    fn period_parsing_and_bounds() {
        let p = Period::parse("2024-02").unwrap();
        assert_eq!(p.first_day, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(p.last_day, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(p.label(), "2024-02");

        let dec = Period::parse("2025-12").unwrap();
        assert_eq!(dec.last_day, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());

        assert!(Period::parse("2025-13").is_err());
        assert!(Period::parse("October").is_err());
    }

    #[test]
    fn intersect_clips_to_month() {
        let p = Period::parse("2025-10").unwrap();
        let d = |m, d| NaiveDate::from_ymd_opt(2025, m, d).unwrap();
        assert_eq!(p.intersect(d(9, 28), d(10, 2)), Some((d(10, 1), d(10, 2))));
        assert_eq!(p.intersect(d(9, 1), d(9, 30)), None);
        assert_eq!(Period::containing(d(10, 17)), p);
    }
}
