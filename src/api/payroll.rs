use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{auth::AuthUser, handlers::client_ip};
use crate::errors::{ApiError, ApiResult};
use crate::model::{
    activity_log::{self, ActivityKind},
    leave::{LeaveType, ReviewStatus},
    payroll::{Payroll, PayrollBreakdown, PayrollStatus, Period, SELECT_PAYROLL},
    role::PAYROLL_RUNNERS,
    work_settings::{self, WorkSettings},
};
use crate::utils::pagination::{Filter, FilterValue, Pagination, bind_filters};

#[derive(Deserialize, ToSchema)]
pub struct GeneratePayroll {
    #[schema(example = "2025-10")]
    pub period: String,
    /// Limit the run to one employee.
    pub user_id: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateSummary {
    #[schema(example = "2025-10")]
    pub period: String,
    pub working_days: u32,
    pub generated: u32,
    /// Employees whose payslip for the month is already paid.
    pub skipped_paid: u32,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PayrollQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// `YYYY-MM`
    pub period: Option<String>,
    pub user_id: Option<u64>,
    pub status: Option<PayrollStatus>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatsQuery {
    /// `YYYY-MM`, defaults to the current month.
    pub period: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct PayrollListResponse {
    pub data: Vec<Payroll>,
    pub page: u64,
    pub per_page: u64,
    pub total: i64,
}

#[derive(Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct PayrollStats {
    #[sqlx(skip)]
    #[schema(example = "2025-10")]
    pub period: String,
    pub employees: i64,
    pub total_gross: f64,
    pub total_pf: f64,
    pub total_professional_tax: f64,
    pub total_net: f64,
    pub paid: i64,
    pub draft: i64,
}

#[derive(sqlx::FromRow)]
struct Payee {
    id: u64,
    basic_salary: f64,
}

#[derive(sqlx::FromRow)]
struct LeaveRange {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

/// Working days of approved unpaid leave falling inside the month.
async fn unpaid_days(
    pool: &MySqlPool,
    settings: &WorkSettings,
    user_id: u64,
    period: &Period,
) -> Result<u32, sqlx::Error> {
    let ranges = sqlx::query_as::<_, LeaveRange>(
        r#"
        SELECT start_date, end_date
        FROM leaves
        WHERE user_id = ? AND leave_type = ? AND status = ? AND start_date <= ? AND end_date >= ?
        "#,
    )
    .bind(user_id)
    .bind(LeaveType::Unpaid.as_ref())
    .bind(ReviewStatus::Approved.as_ref())
    .bind(period.last_day)
    .bind(period.first_day)
    .fetch_all(pool)
    .await?;

    Ok(ranges
        .iter()
        .filter_map(|r| period.intersect(r.start_date, r.end_date))
        .map(|(from, to)| settings.count_working_days(from, to))
        .sum())
}

async fn find_in_company(pool: &MySqlPool, company_id: u64, id: u64) -> ApiResult<Payroll> {
    sqlx::query_as::<_, Payroll>(&format!("{SELECT_PAYROLL} WHERE id = ? AND company_id = ?"))
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Payslip not found"))
}

/// Creates or refreshes DRAFT payslips for a month. PAID payslips are final.
#[utoipa::path(
    post,
    path = "/api/payroll/generate",
    request_body = GeneratePayroll,
    responses(
        (status = 200, description = "Payroll generated", body = GenerateSummary),
        (status = 400, description = "Invalid period"),
        (status = 403, description = "Admin or Payroll Officer only"),
        (status = 404, description = "Employee not found or has no salary")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn generate_payroll(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<GeneratePayroll>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(PAYROLL_RUNNERS)?;
    let period = Period::parse(&body.period)?;

    let settings = work_settings::load(pool.get_ref(), company_id).await?;
    let working_days = settings.count_working_days(period.first_day, period.last_day);

    let mut sql = String::from(
        "SELECT id, basic_salary FROM users WHERE company_id = ? AND is_active = TRUE AND basic_salary > 0",
    );
    if body.user_id.is_some() {
        sql.push_str(" AND id = ?");
    }
    let mut query = sqlx::query_as::<_, Payee>(&sql).bind(company_id);
    if let Some(user_id) = body.user_id {
        query = query.bind(user_id);
    }
    let payees = query.fetch_all(pool.get_ref()).await?;

    if body.user_id.is_some() && payees.is_empty() {
        return Err(ApiError::not_found("Active employee with a salary not found"));
    }

    let mut generated = 0;
    let mut skipped_paid = 0;

    // Existing payslips stay locked until commit, so a concurrent mark_paid
    // waits and cannot be overwritten.
    let mut tx = pool.begin().await?;

    for payee in &payees {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM payrolls WHERE user_id = ? AND period = ? FOR UPDATE")
                .bind(payee.id)
                .bind(period.first_day)
                .fetch_optional(&mut *tx)
                .await?;
        if status.as_deref() == Some(PayrollStatus::Paid.as_ref()) {
            skipped_paid += 1;
            continue;
        }

        let unpaid = unpaid_days(pool.get_ref(), &settings, payee.id, &period).await?;
        let slip = PayrollBreakdown::compute(payee.basic_salary, working_days, unpaid, &settings);

        sqlx::query(
            r#"
            INSERT INTO payrolls
                (company_id, user_id, period, working_days, unpaid_days, basic_salary,
                 unpaid_deduction, gross_salary, pf, professional_tax, net_salary, status,
                 generated_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                working_days = VALUES(working_days),
                unpaid_days = VALUES(unpaid_days),
                basic_salary = VALUES(basic_salary),
                unpaid_deduction = VALUES(unpaid_deduction),
                gross_salary = VALUES(gross_salary),
                pf = VALUES(pf),
                professional_tax = VALUES(professional_tax),
                net_salary = VALUES(net_salary),
                generated_by = VALUES(generated_by)
            "#,
        )
        .bind(company_id)
        .bind(payee.id)
        .bind(period.first_day)
        .bind(slip.working_days)
        .bind(slip.unpaid_days)
        .bind(slip.basic_salary)
        .bind(slip.unpaid_deduction)
        .bind(slip.gross_salary)
        .bind(slip.pf)
        .bind(slip.professional_tax)
        .bind(slip.net_salary)
        .bind(PayrollStatus::Draft.as_ref())
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = payee.id, period = %period.label(), "Failed to write payslip");
            ApiError::from(e)
        })?;

        generated += 1;
    }

    tx.commit().await?;

    activity_log::record(
        pool.get_ref(),
        Some(company_id),
        auth.user_id,
        ActivityKind::PayrollGenerated,
        Some(format!("{}: {generated} generated, {skipped_paid} already paid", period.label())),
        client_ip(&req),
    )
    .await;

    info!(company_id, period = %period.label(), generated, skipped_paid, "Payroll generated");

    Ok(HttpResponse::Ok().json(GenerateSummary {
        period: period.label(),
        working_days,
        generated,
        skipped_paid,
    }))
}

#[utoipa::path(
    get,
    path = "/api/payroll",
    params(PayrollQuery),
    responses(
        (status = 200, description = "Payslips", body = PayrollListResponse),
        (status = 403, description = "Admin or Payroll Officer only")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn list_payrolls(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PayrollQuery>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(PAYROLL_RUNNERS)?;
    let pagination = Pagination::new(query.page, query.per_page);

    let mut filter = Filter::new();
    filter.push("company_id = ?", FilterValue::U64(company_id));
    if let Some(raw) = query.period.as_deref() {
        let period = Period::parse(raw)?;
        filter.push("period = ?", FilterValue::Date(period.first_day));
    }
    if let Some(user_id) = query.user_id {
        filter.push("user_id = ?", FilterValue::U64(user_id));
    }
    if let Some(status) = query.status {
        filter.push("status = ?", FilterValue::Str(status.as_ref().to_string()));
    }

    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM payrolls{where_clause}");
    let total: i64 = bind_filters!(sqlx::query_scalar(&count_sql), &filter.args)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!("{SELECT_PAYROLL}{where_clause} ORDER BY period DESC, user_id LIMIT ? OFFSET ?");
    let data = bind_filters!(sqlx::query_as::<_, Payroll>(&data_sql), &filter.args)
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(PayrollListResponse {
        data,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/api/payroll/me",
    responses((status = 200, description = "Own payslips", body = [Payroll])),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn my_payrolls(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;

    let slips = sqlx::query_as::<_, Payroll>(&format!(
        "{SELECT_PAYROLL} WHERE company_id = ? AND user_id = ? ORDER BY period DESC"
    ))
    .bind(company_id)
    .bind(auth.user_id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(slips))
}

#[utoipa::path(
    get,
    path = "/api/payroll/{id}",
    params(("id" = u64, Path, description = "Payslip id")),
    responses(
        (status = 200, description = "Payslip", body = Payroll),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Payslip not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn get_payroll(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let slip = find_in_company(pool.get_ref(), company_id, path.into_inner()).await?;

    if slip.user_id != auth.user_id {
        auth.require_any(PAYROLL_RUNNERS)?;
    }
    Ok(HttpResponse::Ok().json(slip))
}

#[utoipa::path(
    put,
    path = "/api/payroll/{id}/pay",
    params(("id" = u64, Path, description = "Payslip id")),
    responses(
        (status = 200, description = "Marked as paid", body = Payroll),
        (status = 400, description = "Already paid"),
        (status = 403, description = "Admin or Payroll Officer only"),
        (status = 404, description = "Payslip not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn mark_paid(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(PAYROLL_RUNNERS)?;
    let id = path.into_inner();

    let result = sqlx::query(
        r#"
        UPDATE payrolls
        SET status = ?, paid_at = UTC_TIMESTAMP()
        WHERE id = ? AND company_id = ? AND status = ?
        "#,
    )
    .bind(PayrollStatus::Paid.as_ref())
    .bind(id)
    .bind(company_id)
    .bind(PayrollStatus::Draft.as_ref())
    .execute(pool.get_ref())
    .await?;

    let slip = find_in_company(pool.get_ref(), company_id, id).await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("Payslip is already paid"));
    }

    info!(payroll_id = id, paid_by = auth.user_id, "Payslip paid");

    Ok(HttpResponse::Ok().json(slip))
}

/// Totals for one month of a company.
pub(crate) async fn payroll_stats(
    pool: &MySqlPool,
    company_id: u64,
    period: &Period,
) -> Result<PayrollStats, sqlx::Error> {
    let mut stats = sqlx::query_as::<_, PayrollStats>(
        r#"
        SELECT COUNT(*) AS employees,
               CAST(COALESCE(SUM(gross_salary), 0) AS DOUBLE) AS total_gross,
               CAST(COALESCE(SUM(pf), 0) AS DOUBLE) AS total_pf,
               CAST(COALESCE(SUM(professional_tax), 0) AS DOUBLE) AS total_professional_tax,
               CAST(COALESCE(SUM(net_salary), 0) AS DOUBLE) AS total_net,
               CAST(COALESCE(SUM(status = ?), 0) AS SIGNED) AS paid,
               CAST(COALESCE(SUM(status = ?), 0) AS SIGNED) AS draft
        FROM payrolls
        WHERE company_id = ? AND period = ?
        "#,
    )
    .bind(PayrollStatus::Paid.as_ref())
    .bind(PayrollStatus::Draft.as_ref())
    .bind(company_id)
    .bind(period.first_day)
    .fetch_one(pool)
    .await?;

    stats.period = period.label();
    Ok(stats)
}

#[utoipa::path(
    get,
    path = "/api/payroll/stats",
    params(StatsQuery),
    responses(
        (status = 200, description = "Monthly totals", body = PayrollStats),
        (status = 403, description = "Admin or Payroll Officer only")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn stats(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<StatsQuery>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(PAYROLL_RUNNERS)?;

    let period = match query.period.as_deref() {
        Some(raw) => Period::parse(raw)?,
        None => Period::containing(Utc::now().date_naive()),
    };

    let stats = payroll_stats(pool.get_ref(), company_id, &period).await?;
    Ok(HttpResponse::Ok().json(stats))
}
