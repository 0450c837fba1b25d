use crate::{
    auth::{auth::AuthUser, handlers::client_ip},
    db::is_unique_violation,
    errors::{ApiError, ApiResult},
    model::{
        activity_log::{self, ActivityKind},
        attendance::{Attendance, AttendanceStatus, SELECT_ATTENDANCE, classify_day, worked_hours},
        leave::ReviewStatus,
        payroll::Period,
        role::{Scope, USER_MANAGERS},
        work_settings::{self, WorkSettings},
    },
    utils::pagination::{Filter, FilterValue, Pagination, bind_filters},
};
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
pub struct AttendanceRangeQuery {
    /// Inclusive, defaults to the first day of the current month.
    #[param(value_type = Option<String>, format = "date")]
    pub from: Option<NaiveDate>,
    /// Inclusive, defaults to the last day of the current month.
    #[param(value_type = Option<String>, format = "date")]
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AttendanceQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    #[param(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    pub user_id: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct AttendanceListResponse {
    pub data: Vec<Attendance>,
    pub page: u64,
    pub per_page: u64,
    pub total: i64,
}

#[derive(Debug, Serialize, ToSchema, PartialEq)]
pub struct TodaySummary {
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub working_day: bool,
    pub headcount: i64,
    pub present: i64,
    pub late: i64,
    pub on_leave: i64,
    pub absent: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct CorrectAttendance {
    pub status: Option<AttendanceStatus>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_in: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_out: Option<DateTime<Utc>>,
    pub is_late: Option<bool>,
}

async fn find_for_day(pool: &MySqlPool, user_id: u64, date: NaiveDate) -> Result<Option<Attendance>, sqlx::Error> {
    sqlx::query_as::<_, Attendance>(&format!("{SELECT_ATTENDANCE} WHERE user_id = ? AND date = ?"))
        .bind(user_id)
        .bind(date)
        .fetch_optional(pool)
        .await
}

async fn find_in_company(pool: &MySqlPool, company_id: u64, id: u64) -> ApiResult<Attendance> {
    sqlx::query_as::<_, Attendance>(&format!("{SELECT_ATTENDANCE} WHERE id = ? AND company_id = ?"))
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Attendance record not found"))
}

/// Check-in. Repeated calls on the same local day return the first record.
#[utoipa::path(
    post,
    path = "/api/attendance/mark",
    responses(
        (status = 201, description = "Checked in", body = Attendance),
        (status = 200, description = "Already checked in today", body = Attendance),
        (status = 403, description = "No company")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn mark_attendance(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let settings = work_settings::load(pool.get_ref(), company_id).await?;

    let now = Utc::now();
    let today = settings.local_date(now);

    if let Some(existing) = find_for_day(pool.get_ref(), auth.user_id, today).await? {
        return Ok(HttpResponse::Ok().json(existing));
    }

    let is_late = settings.is_late(settings.local_time(now).time());

    let inserted = sqlx::query(
        r#"
        INSERT INTO attendance (company_id, user_id, date, check_in, status, is_late)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(auth.user_id)
    .bind(today)
    .bind(now)
    .bind(AttendanceStatus::Present.as_ref())
    .bind(is_late)
    .execute(pool.get_ref())
    .await;

    match inserted {
        Ok(_) => {}
        // A concurrent mark won the race.
        Err(e) if is_unique_violation(&e) => {
            let existing = find_for_day(pool.get_ref(), auth.user_id, today)
                .await?
                .ok_or_else(|| ApiError::internal("attendance row missing after conflict"))?;
            return Ok(HttpResponse::Ok().json(existing));
        }
        Err(e) => {
            error!(error = %e, user_id = auth.user_id, "Check-in failed");
            return Err(e.into());
        }
    }

    activity_log::record(
        pool.get_ref(),
        Some(company_id),
        auth.user_id,
        ActivityKind::CheckIn,
        is_late.then(|| "late".to_string()),
        client_ip(&req),
    )
    .await;

    let record = find_for_day(pool.get_ref(), auth.user_id, today)
        .await?
        .ok_or_else(|| ApiError::internal("attendance row missing after insert"))?;

    info!(user_id = auth.user_id, %today, is_late, "Checked in");

    Ok(HttpResponse::Created().json(record))
}

#[utoipa::path(
    post,
    path = "/api/attendance/checkout",
    responses(
        (status = 200, description = "Checked out", body = Attendance),
        (status = 400, description = "No open check-in today"),
        (status = 403, description = "No company")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn checkout(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let settings = work_settings::load(pool.get_ref(), company_id).await?;

    let now = Utc::now();
    let today = settings.local_date(now);

    let open = find_for_day(pool.get_ref(), auth.user_id, today)
        .await?
        .filter(|a| a.check_out.is_none());
    let check_in = match open.as_ref().and_then(|a| a.check_in) {
        Some(t) => t,
        None => return Err(ApiError::bad_request("No open check-in found for today")),
    };

    let hours = worked_hours(check_in, now);
    let status = classify_day(hours, settings.half_day_hours);

    let result = sqlx::query(
        r#"
        UPDATE attendance
        SET check_out = ?, work_hours = ?, status = ?
        WHERE user_id = ? AND date = ? AND check_out IS NULL
        "#,
    )
    .bind(now)
    .bind(hours)
    .bind(status.as_ref())
    .bind(auth.user_id)
    .bind(today)
    .execute(pool.get_ref())
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("No open check-in found for today"));
    }

    activity_log::record(
        pool.get_ref(),
        Some(company_id),
        auth.user_id,
        ActivityKind::CheckOut,
        Some(format!("{hours}h")),
        client_ip(&req),
    )
    .await;

    let record = find_for_day(pool.get_ref(), auth.user_id, today)
        .await?
        .ok_or_else(|| ApiError::internal("attendance row missing after checkout"))?;

    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    get,
    path = "/api/attendance/me",
    params(AttendanceRangeQuery),
    responses(
        (status = 200, description = "Own attendance", body = [Attendance]),
        (status = 400, description = "from is after to")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn my_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AttendanceRangeQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_company()?;

    let month = Period::containing(Utc::now().date_naive());
    let from = query.from.unwrap_or(month.first_day);
    let to = query.to.unwrap_or(month.last_day);
    if from > to {
        return Err(ApiError::bad_request("from cannot be after to"));
    }

    let records = sqlx::query_as::<_, Attendance>(&format!(
        "{SELECT_ATTENDANCE} WHERE user_id = ? AND date BETWEEN ? AND ? ORDER BY date DESC"
    ))
    .bind(auth.user_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(records))
}

#[utoipa::path(
    get,
    path = "/api/attendance",
    params(AttendanceQuery),
    responses(
        (status = 200, description = "Attendance in scope", body = AttendanceListResponse),
        (status = 403, description = "Employees use /attendance/me")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AttendanceQuery>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let scope = auth.directory_scope();
    if let Scope::Own(_) = scope {
        return Err(ApiError::forbidden("Not allowed to list attendance"));
    }
    let pagination = Pagination::new(query.page, query.per_page);

    let mut filter = Filter::new();
    filter.push("company_id = ?", FilterValue::U64(company_id));
    if let Some((predicate, bind)) = scope.user_predicate("user_id") {
        filter.push(predicate, FilterValue::U64(bind));
    }
    if let Some(date) = query.date {
        filter.push("date = ?", FilterValue::Date(date));
    }
    if let Some(user_id) = query.user_id {
        filter.push("user_id = ?", FilterValue::U64(user_id));
    }

    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM attendance{where_clause}");
    let total: i64 = bind_filters!(sqlx::query_scalar(&count_sql), &filter.args)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql =
        format!("{SELECT_ATTENDANCE}{where_clause} ORDER BY date DESC, user_id LIMIT ? OFFSET ?");
    let data = bind_filters!(sqlx::query_as::<_, Attendance>(&data_sql), &filter.args)
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(AttendanceListResponse {
        data,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    }))
}

/// Present, late, on-leave and absent counts for the caller's scope today.
pub(crate) async fn today_summary(
    pool: &MySqlPool,
    company_id: u64,
    scope: Scope,
    settings: &WorkSettings,
) -> Result<TodaySummary, sqlx::Error> {
    let today = settings.local_date(Utc::now());

    // Every query joins `users u`; the scope applies to `u.id`.
    let scoped = |table_company: &str| {
        let mut filter = Filter::new();
        filter.push(format!("{table_company} = ?"), FilterValue::U64(company_id));
        if let Some((predicate, bind)) = scope.user_predicate("u.id") {
            filter.push(predicate, FilterValue::U64(bind));
        }
        filter
    };

    let mut filter = scoped("u.company_id");
    filter.push_raw("u.is_active = TRUE");
    let sql = format!("SELECT COUNT(*) FROM users u{}", filter.where_clause());
    let headcount: i64 = bind_filters!(sqlx::query_scalar(&sql), &filter.args)
        .fetch_one(pool)
        .await?;

    let mut filter = scoped("a.company_id");
    filter.push("a.date = ?", FilterValue::Date(today));
    filter.push_raw("a.check_in IS NOT NULL");
    let sql = format!(
        "SELECT COUNT(*), CAST(COALESCE(SUM(a.is_late), 0) AS SIGNED) \
         FROM attendance a JOIN users u ON u.id = a.user_id{}",
        filter.where_clause()
    );
    let (present, late): (i64, i64) = bind_filters!(sqlx::query_as(&sql), &filter.args)
        .fetch_one(pool)
        .await?;

    let mut filter = scoped("l.company_id");
    filter.push("l.status = ?", FilterValue::Str(ReviewStatus::Approved.as_ref().to_string()));
    filter.push_many(
        "l.start_date <= ? AND l.end_date >= ?",
        [FilterValue::Date(today), FilterValue::Date(today)],
    );
    let sql = format!(
        "SELECT COUNT(DISTINCT l.user_id) FROM leaves l JOIN users u ON u.id = l.user_id{}",
        filter.where_clause()
    );
    let on_leave: i64 = bind_filters!(sqlx::query_scalar(&sql), &filter.args)
        .fetch_one(pool)
        .await?;

    let working_day = settings.is_working_day(today);
    let absent = if working_day {
        (headcount - present - on_leave).max(0)
    } else {
        0
    };

    Ok(TodaySummary {
        date: today,
        working_day,
        headcount,
        present,
        late,
        on_leave,
        absent,
    })
}

#[utoipa::path(
    get,
    path = "/api/attendance/today",
    responses((status = 200, description = "Today's counts", body = TodaySummary)),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn today_attendance(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let settings = work_settings::load(pool.get_ref(), company_id).await?;
    let summary = today_summary(pool.get_ref(), company_id, auth.directory_scope(), &settings).await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// Applies a correction on top of the stored row and recomputes hours.
fn apply_correction(
    record: &Attendance,
    body: &CorrectAttendance,
    half_day_hours: f64,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>, AttendanceStatus, bool, Option<f64>), ApiError> {
    let check_in = body.check_in.or(record.check_in);
    let check_out = body.check_out.or(record.check_out);

    let work_hours = match (check_in, check_out) {
        (Some(i), Some(o)) if o <= i => {
            return Err(ApiError::bad_request("check_out must be after check_in"));
        }
        (Some(i), Some(o)) => Some(worked_hours(i, o)),
        (None, Some(_)) => return Err(ApiError::bad_request("check_out requires a check_in")),
        _ => record.work_hours,
    };

    let status = match (body.status, work_hours) {
        (Some(s), _) => s,
        (None, Some(h)) if body.check_in.is_some() || body.check_out.is_some() => {
            classify_day(h, half_day_hours)
        }
        _ => record
            .status
            .parse::<AttendanceStatus>()
            .unwrap_or(AttendanceStatus::Present),
    };

    Ok((check_in, check_out, status, body.is_late.unwrap_or(record.is_late), work_hours))
}

#[utoipa::path(
    put,
    path = "/api/attendance/{id}",
    params(("id" = u64, Path, description = "Attendance id")),
    request_body = CorrectAttendance,
    responses(
        (status = 200, description = "Corrected record", body = Attendance),
        (status = 400, description = "check_out before check_in"),
        (status = 403, description = "Admin or HR only"),
        (status = 404, description = "Record not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn correct_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<CorrectAttendance>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(USER_MANAGERS)?;
    if let (Some(i), Some(o)) = (body.check_in, body.check_out) {
        if o <= i {
            return Err(ApiError::bad_request("check_out must be after check_in"));
        }
    }

    let id = path.into_inner();
    let record = find_in_company(pool.get_ref(), company_id, id).await?;
    let settings = work_settings::load(pool.get_ref(), company_id).await?;
    let (check_in, check_out, status, is_late, work_hours) =
        apply_correction(&record, &body, settings.half_day_hours)?;

    sqlx::query(
        r#"
        UPDATE attendance
        SET check_in = ?, check_out = ?, status = ?, is_late = ?, work_hours = ?
        WHERE id = ? AND company_id = ?
        "#,
    )
    .bind(check_in)
    .bind(check_out)
    .bind(status.as_ref())
    .bind(is_late)
    .bind(work_hours)
    .bind(id)
    .bind(company_id)
    .execute(pool.get_ref())
    .await?;

    info!(attendance_id = id, corrected_by = auth.user_id, status = %status, "Attendance corrected");

    let record = find_in_company(pool.get_ref(), company_id, id).await?;
    Ok(HttpResponse::Ok().json(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> Attendance {
        Attendance {
            id: 1,
            company_id: 1,
            user_id: 2,
            date: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            check_in: Some(Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0).unwrap()),
            check_out: None,
            status: "PRESENT".into(),
            is_late: false,
            work_hours: None,
        }
    }

    fn correction(check_out: Option<DateTime<Utc>>, status: Option<AttendanceStatus>) -> CorrectAttendance {
        CorrectAttendance {
            status,
            check_in: None,
            check_out,
            is_late: None,
        }
    }

    #[test]
    fn correction_recomputes_hours_and_status() {
        let out = Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap();
        let (_, check_out, status, _, hours) =
            apply_correction(&record(), &correction(Some(out), None), 4.0).unwrap();
        assert_eq!(check_out, Some(out));
        assert_eq!(hours, Some(3.0));
        assert_eq!(status, AttendanceStatus::HalfDay);
    }

    #[test]
    fn explicit_status_wins() {
        let out = Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap();
        let (_, _, status, _, _) =
            apply_correction(&record(), &correction(Some(out), Some(AttendanceStatus::Present)), 4.0)
                .unwrap();
        assert_eq!(status, AttendanceStatus::Present);
    }

    #[test]
    fn check_out_must_follow_check_in() {
        let out = Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap();
        assert!(matches!(
            apply_correction(&record(), &correction(Some(out), None), 4.0),
            Err(ApiError::BadRequest(_))
        ));
    }
}
