use actix_web::{HttpResponse, web};
use chrono::{Datelike, Utc};
use serde::Serialize;
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::api::attendance::{TodaySummary, today_summary};
use crate::api::leave::leave_balance;
use crate::api::payroll::{PayrollStats, payroll_stats};
use crate::auth::auth::AuthUser;
use crate::errors::ApiResult;
use crate::model::leave::{BalanceLine, ReviewStatus};
use crate::model::payroll::{Payroll, Period, SELECT_PAYROLL};
use crate::model::role::{Role, Scope};
use crate::model::work_settings;

/// Summary shaped by the caller's role; `role` tells the variants apart.
#[derive(Serialize, ToSchema)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dashboard {
    Admin {
        employees: i64,
        today: TodaySummary,
        pending_leaves: i64,
        pending_join_requests: i64,
        active_sessions: i64,
    },
    HrOfficer {
        employees: i64,
        today: TodaySummary,
        pending_leaves: i64,
    },
    PayrollOfficer {
        payroll: PayrollStats,
    },
    Manager {
        team_size: i64,
        today: TodaySummary,
        pending_leaves: i64,
    },
    Employee {
        days_present_this_month: i64,
        leave_balance: Vec<BalanceLine>,
        latest_payslip: Option<Payroll>,
    },
}

async fn count(pool: &MySqlPool, sql: &str, binds: &[&str], ids: &[u64]) -> Result<i64, sqlx::Error> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    for id in ids {
        query = query.bind(*id);
    }
    for value in binds {
        query = query.bind(*value);
    }
    query.fetch_one(pool).await
}

async fn pending_leaves(pool: &MySqlPool, company_id: u64, scope: Scope) -> Result<i64, sqlx::Error> {
    match scope.user_predicate("user_id") {
        Some((predicate, bind)) => {
            let sql = format!("SELECT COUNT(*) FROM leaves WHERE company_id = ? AND {predicate} AND status = ?");
            count(pool, &sql, &[ReviewStatus::Pending.as_ref()], &[company_id, bind]).await
        }
        None => {
            count(
                pool,
                "SELECT COUNT(*) FROM leaves WHERE company_id = ? AND status = ?",
                &[ReviewStatus::Pending.as_ref()],
                &[company_id],
            )
            .await
        }
    }
}

async fn employees(pool: &MySqlPool, company_id: u64) -> Result<i64, sqlx::Error> {
    count(
        pool,
        "SELECT COUNT(*) FROM users WHERE company_id = ? AND is_active = TRUE",
        &[],
        &[company_id],
    )
    .await
}

#[utoipa::path(
    get,
    path = "/api/dashboard",
    responses(
        (status = 200, description = "Role-shaped summary", body = Dashboard),
        (status = 403, description = "No company")
    ),
    security(("bearer_auth" = [])),
    tag = "Dashboard"
)]
pub async fn dashboard(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let pool = pool.get_ref();
    let settings = work_settings::load(pool, company_id).await?;
    let month = Period::containing(settings.local_date(Utc::now()));

    let body = match auth.role {
        Role::Admin => Dashboard::Admin {
            employees: employees(pool, company_id).await?,
            today: today_summary(pool, company_id, Scope::Company, &settings).await?,
            pending_leaves: pending_leaves(pool, company_id, Scope::Company).await?,
            pending_join_requests: count(
                pool,
                "SELECT COUNT(*) FROM user_requests WHERE company_id = ? AND status = ?",
                &[ReviewStatus::Pending.as_ref()],
                &[company_id],
            )
            .await?,
            active_sessions: count(
                pool,
                "SELECT COUNT(*) FROM user_sessions WHERE company_id = ? AND is_active = TRUE",
                &[],
                &[company_id],
            )
            .await?,
        },
        Role::HrOfficer => Dashboard::HrOfficer {
            employees: employees(pool, company_id).await?,
            today: today_summary(pool, company_id, Scope::Company, &settings).await?,
            pending_leaves: pending_leaves(pool, company_id, Scope::Company).await?,
        },
        Role::PayrollOfficer => Dashboard::PayrollOfficer {
            payroll: payroll_stats(pool, company_id, &month).await?,
        },
        Role::Manager => {
            let team = Scope::Team(auth.user_id);
            Dashboard::Manager {
                team_size: count(
                    pool,
                    "SELECT COUNT(*) FROM users WHERE company_id = ? AND manager_id = ? AND is_active = TRUE",
                    &[],
                    &[company_id, auth.user_id],
                )
                .await?,
                today: today_summary(pool, company_id, team, &settings).await?,
                pending_leaves: pending_leaves(pool, company_id, team).await?,
            }
        }
        Role::Employee => {
            let days_present_this_month: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*)
                FROM attendance
                WHERE user_id = ? AND date BETWEEN ? AND ? AND check_in IS NOT NULL
                "#,
            )
            .bind(auth.user_id)
            .bind(month.first_day)
            .bind(month.last_day)
            .fetch_one(pool)
            .await?;

            let latest_payslip = sqlx::query_as::<_, Payroll>(&format!(
                "{SELECT_PAYROLL} WHERE user_id = ? ORDER BY period DESC LIMIT 1"
            ))
            .bind(auth.user_id)
            .fetch_optional(pool)
            .await?;

            Dashboard::Employee {
                days_present_this_month,
                leave_balance: leave_balance(pool, &settings, auth.user_id, month.first_day.year()).await?,
                latest_payslip,
            }
        }
    };

    Ok(HttpResponse::Ok().json(body))
}
