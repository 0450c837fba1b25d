use crate::{
    auth::{auth::AuthUser, handlers::client_ip},
    errors::{ApiError, ApiResult},
    model::{
        activity_log::{self, ActivityKind},
        leave::{
            BalanceLine, Leave, LeaveType, ReviewStatus, SELECT_LEAVE, allocation,
            ensure_within_allocation, requested_days,
        },
        role::{LEAVE_REVIEWERS, Role, Scope},
        work_settings::{self, WorkSettings},
    },
    models::MessageResponse,
    utils::pagination::{Filter, FilterValue, Pagination, bind_filters},
};
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct ApplyLeave {
    #[schema(example = "SICK")]
    pub leave_type: LeaveType,
    #[schema(value_type = String, format = "date", example = "2025-10-06")]
    pub start_date: NaiveDate,
    #[schema(value_type = String, format = "date", example = "2025-10-07")]
    pub end_date: NaiveDate,
    #[schema(example = "Fever")]
    pub reason: Option<String>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct ReviewLeave {
    #[schema(example = "Get well soon")]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LeaveQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub status: Option<ReviewStatus>,
    pub user_id: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BalanceQuery {
    /// Defaults to the current year.
    pub year: Option<i32>,
}

#[derive(Serialize, ToSchema)]
pub struct LeaveListResponse {
    pub data: Vec<Leave>,
    pub page: u64,
    pub per_page: u64,
    pub total: i64,
}

#[derive(Serialize, ToSchema)]
pub struct LeaveBalance {
    #[schema(example = 2025)]
    pub year: i32,
    pub balances: Vec<BalanceLine>,
}

async fn find_in_company(pool: &MySqlPool, company_id: u64, id: u64) -> ApiResult<Leave> {
    sqlx::query_as::<_, Leave>(&format!("{SELECT_LEAVE} WHERE id = ? AND company_id = ?"))
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Leave not found"))
}

/// Whether `user_id` reports directly to `manager_id`.
pub(crate) async fn is_report(pool: &MySqlPool, manager_id: u64, user_id: u64) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ? AND manager_id = ?")
        .bind(user_id)
        .bind(manager_id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Whether a caller with `scope` may see records belonging to `owner_id`.
pub(crate) async fn can_see(pool: &MySqlPool, scope: Scope, caller_id: u64, owner_id: u64) -> Result<bool, sqlx::Error> {
    if owner_id == caller_id {
        return Ok(true);
    }
    match scope {
        Scope::Company => Ok(true),
        Scope::Team(manager_id) => is_report(pool, manager_id, owner_id).await,
        Scope::Own(_) => Ok(false),
    }
}

/// Days of one leave type booked in a year, counted by start date.
async fn booked_days(
    pool: &MySqlPool,
    user_id: u64,
    leave_type: LeaveType,
    year: i32,
    statuses: &[ReviewStatus],
) -> Result<u32, sqlx::Error> {
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        r#"
        SELECT CAST(COALESCE(SUM(days), 0) AS SIGNED)
        FROM leaves
        WHERE user_id = ? AND leave_type = ? AND YEAR(start_date) = ? AND status IN ({placeholders})
        "#
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql)
        .bind(user_id)
        .bind(leave_type.as_ref())
        .bind(year);
    for status in statuses {
        query = query.bind(status.as_ref());
    }
    let total = query.fetch_one(pool).await?;
    Ok(u32::try_from(total.max(0)).unwrap_or(u32::MAX))
}

/// Allocated, approved and remaining days per leave type.
pub(crate) async fn leave_balance(
    pool: &MySqlPool,
    settings: &WorkSettings,
    user_id: u64,
    year: i32,
) -> Result<Vec<BalanceLine>, sqlx::Error> {
    let mut lines = Vec::with_capacity(3);
    for leave_type in [LeaveType::Paid, LeaveType::Sick, LeaveType::Unpaid] {
        let used = booked_days(pool, user_id, leave_type, year, &[ReviewStatus::Approved]).await?;
        lines.push(BalanceLine::new(leave_type, allocation(settings, leave_type), used));
    }
    Ok(lines)
}

#[utoipa::path(
    post,
    path = "/api/leave",
    request_body = ApplyLeave,
    responses(
        (status = 201, description = "Leave requested", body = Leave),
        (status = 400, description = "Invalid range or insufficient balance"),
        (status = 409, description = "Overlaps an existing leave")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn apply_leave(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<ApplyLeave>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    if body.start_date > body.end_date {
        return Err(ApiError::bad_request("start_date cannot be after end_date"));
    }

    let settings = work_settings::load(pool.get_ref(), company_id).await?;
    let days = requested_days(&settings, body.start_date, body.end_date)?;

    let overlapping: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM leaves
        WHERE user_id = ? AND status IN (?, ?) AND start_date <= ? AND end_date >= ?
        "#,
    )
    .bind(auth.user_id)
    .bind(ReviewStatus::Pending.as_ref())
    .bind(ReviewStatus::Approved.as_ref())
    .bind(body.end_date)
    .bind(body.start_date)
    .fetch_one(pool.get_ref())
    .await?;

    if overlapping > 0 {
        return Err(ApiError::conflict("Leave overlaps an existing request"));
    }

    let used = booked_days(
        pool.get_ref(),
        auth.user_id,
        body.leave_type,
        body.start_date.year(),
        &[ReviewStatus::Pending, ReviewStatus::Approved],
    )
    .await?;
    ensure_within_allocation(&settings, body.leave_type, used, days)?;

    let result = sqlx::query(
        r#"
        INSERT INTO leaves (company_id, user_id, leave_type, start_date, end_date, days, reason, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(auth.user_id)
    .bind(body.leave_type.as_ref())
    .bind(body.start_date)
    .bind(body.end_date)
    .bind(days)
    .bind(body.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()))
    .bind(ReviewStatus::Pending.as_ref())
    .execute(pool.get_ref())
    .await?;

    let leave_id = result.last_insert_id();

    activity_log::record(
        pool.get_ref(),
        Some(company_id),
        auth.user_id,
        ActivityKind::LeaveApplied,
        Some(format!("leave {leave_id}: {} x{days}", body.leave_type)),
        client_ip(&req),
    )
    .await;

    info!(leave_id, user_id = auth.user_id, days, "Leave requested");

    let leave = find_in_company(pool.get_ref(), company_id, leave_id).await?;
    Ok(HttpResponse::Created().json(leave))
}

#[utoipa::path(
    get,
    path = "/api/leave",
    params(LeaveQuery),
    responses((status = 200, description = "Leaves in scope", body = LeaveListResponse)),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn list_leaves(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<LeaveQuery>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let pagination = Pagination::new(query.page, query.per_page);

    let mut filter = Filter::new();
    filter.push("company_id = ?", FilterValue::U64(company_id));
    if let Some((predicate, bind)) = auth.review_scope().user_predicate("user_id") {
        filter.push(predicate, FilterValue::U64(bind));
    }
    if let Some(status) = query.status {
        filter.push("status = ?", FilterValue::Str(status.as_ref().to_string()));
    }
    if let Some(user_id) = query.user_id {
        filter.push("user_id = ?", FilterValue::U64(user_id));
    }

    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM leaves{where_clause}");
    let total: i64 = bind_filters!(sqlx::query_scalar(&count_sql), &filter.args)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!("{SELECT_LEAVE}{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
    let data = bind_filters!(sqlx::query_as::<_, Leave>(&data_sql), &filter.args)
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(LeaveListResponse {
        data,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/api/leave/{id}",
    params(("id" = u64, Path, description = "Leave id")),
    responses(
        (status = 200, description = "Leave", body = Leave),
        (status = 403, description = "Outside the caller's scope"),
        (status = 404, description = "Leave not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn get_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let leave = find_in_company(pool.get_ref(), company_id, path.into_inner()).await?;

    if !can_see(pool.get_ref(), auth.review_scope(), auth.user_id, leave.user_id).await? {
        return Err(ApiError::forbidden("Not allowed to view this leave"));
    }
    Ok(HttpResponse::Ok().json(leave))
}

async fn review_leave(
    req: &HttpRequest,
    auth: &AuthUser,
    pool: &MySqlPool,
    leave_id: u64,
    decision: ReviewStatus,
    note: Option<String>,
) -> ApiResult<Leave> {
    let company_id = auth.require_company()?;
    auth.require_any(LEAVE_REVIEWERS)?;

    let leave = find_in_company(pool, company_id, leave_id).await?;
    if leave.user_id == auth.user_id {
        return Err(ApiError::forbidden("You cannot review your own leave"));
    }
    if auth.role == Role::Manager && !is_report(pool, auth.user_id, leave.user_id).await? {
        return Err(ApiError::forbidden("Managers can only review their team's leave"));
    }
    if leave.status != ReviewStatus::Pending.as_ref() {
        return Err(ApiError::bad_request(format!("Leave is already {}", leave.status)));
    }

    if decision == ReviewStatus::Approved {
        let leave_type: LeaveType = leave
            .leave_type
            .parse()
            .map_err(|_| ApiError::internal(format!("unknown leave type '{}'", leave.leave_type)))?;
        let settings = work_settings::load(pool, company_id).await?;
        let approved = booked_days(
            pool,
            leave.user_id,
            leave_type,
            leave.start_date.year(),
            &[ReviewStatus::Approved],
        )
        .await?;
        ensure_within_allocation(&settings, leave_type, approved, leave.days)?;
    }

    let result = sqlx::query(
        r#"
        UPDATE leaves
        SET status = ?, reviewed_by = ?, review_note = ?, reviewed_at = UTC_TIMESTAMP()
        WHERE id = ? AND company_id = ? AND status = ?
        "#,
    )
    .bind(decision.as_ref())
    .bind(auth.user_id)
    .bind(note)
    .bind(leave_id)
    .bind(company_id)
    .bind(ReviewStatus::Pending.as_ref())
    .execute(pool)
    .await?;

    // Lost a race with another reviewer.
    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("Leave is no longer pending"));
    }

    activity_log::record(
        pool,
        Some(company_id),
        auth.user_id,
        ActivityKind::LeaveReviewed,
        Some(format!("leave {leave_id} {decision}")),
        client_ip(req),
    )
    .await;

    info!(leave_id, reviewer = auth.user_id, decision = %decision, "Leave reviewed");

    find_in_company(pool, company_id, leave_id).await
}

#[utoipa::path(
    put,
    path = "/api/leave/{id}/approve",
    params(("id" = u64, Path, description = "Leave id")),
    request_body = ReviewLeave,
    responses(
        (status = 200, description = "Leave approved", body = Leave),
        (status = 400, description = "Not pending or over allocation"),
        (status = 403, description = "Not a reviewer, or own leave")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn approve_leave(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewLeave>>,
) -> ApiResult<HttpResponse> {
    let note = body.map(|b| b.into_inner()).unwrap_or_default().note;
    let leave = review_leave(&req, &auth, pool.get_ref(), path.into_inner(), ReviewStatus::Approved, note).await?;
    Ok(HttpResponse::Ok().json(leave))
}

#[utoipa::path(
    put,
    path = "/api/leave/{id}/reject",
    params(("id" = u64, Path, description = "Leave id")),
    request_body = ReviewLeave,
    responses(
        (status = 200, description = "Leave rejected", body = Leave),
        (status = 400, description = "Not pending"),
        (status = 403, description = "Not a reviewer, or own leave")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn reject_leave(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewLeave>>,
) -> ApiResult<HttpResponse> {
    let note = body.map(|b| b.into_inner()).unwrap_or_default().note;
    let leave = review_leave(&req, &auth, pool.get_ref(), path.into_inner(), ReviewStatus::Rejected, note).await?;
    Ok(HttpResponse::Ok().json(leave))
}

/// The owner withdraws a leave that has not been reviewed yet.
#[utoipa::path(
    delete,
    path = "/api/leave/{id}",
    params(("id" = u64, Path, description = "Leave id")),
    responses(
        (status = 200, description = "Leave cancelled", body = MessageResponse),
        (status = 400, description = "Already reviewed"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Leave not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn cancel_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let leave_id = path.into_inner();
    let leave = find_in_company(pool.get_ref(), company_id, leave_id).await?;

    if leave.user_id != auth.user_id {
        return Err(ApiError::forbidden("Only the requester can cancel a leave"));
    }

    let result = sqlx::query("DELETE FROM leaves WHERE id = ? AND user_id = ? AND status = ?")
        .bind(leave_id)
        .bind(auth.user_id)
        .bind(ReviewStatus::Pending.as_ref())
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("Only pending leaves can be cancelled"));
    }

    Ok(HttpResponse::Ok().json(MessageResponse::new("Leave cancelled")))
}

#[utoipa::path(
    get,
    path = "/api/leave/balance",
    params(BalanceQuery),
    responses((status = 200, description = "Leave balance", body = LeaveBalance)),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn my_balance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<BalanceQuery>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let year = query.year.unwrap_or_else(|| Utc::now().year());

    let settings = work_settings::load(pool.get_ref(), company_id).await?;
    let balances = leave_balance(pool.get_ref(), &settings, auth.user_id, year).await?;

    Ok(HttpResponse::Ok().json(LeaveBalance { year, balances }))
}
