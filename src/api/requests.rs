use actix_web::{HttpResponse, web};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::api::company::company_code_of;
use crate::auth::auth::AuthUser;
use crate::auth::login_id::{LOGIN_ID_KEY, MAX_SERIAL_ATTEMPTS, login_id_prefix, next_serial, with_serial};
use crate::db::violates_key;
use crate::errors::{ApiError, ApiResult};
use crate::model::leave::ReviewStatus;
use crate::model::role::{Role, USER_MANAGERS};
use crate::model::user;
use crate::model::user_request::{SELECT_USER_REQUEST, UserRequest};

#[derive(Deserialize, ToSchema)]
pub struct CreateJoinRequest {
    #[schema(example = "Odoo India")]
    pub company_name: String,
    #[schema(example = "I joined the sales team this week")]
    pub message: Option<String>,
}

/// Terms the reviewer sets for the new member.
#[derive(Deserialize, ToSchema, Default)]
pub struct ApproveJoinRequest {
    /// Defaults to EMPLOYEE.
    pub role: Option<Role>,
    pub basic_salary: Option<f64>,
    pub manager_id: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RequestQuery {
    pub status: Option<ReviewStatus>,
}

#[derive(sqlx::FromRow)]
struct Applicant {
    company_id: Option<u64>,
    first_name: String,
    last_name: String,
}

async fn find_request(pool: &MySqlPool, id: u64) -> ApiResult<UserRequest> {
    sqlx::query_as::<_, UserRequest>(&format!("{SELECT_USER_REQUEST} WHERE r.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Request not found"))
}

fn validate_terms(auth: &AuthUser, terms: &ApproveJoinRequest) -> Result<Role, ApiError> {
    let role = terms.role.unwrap_or(Role::Employee);
    if !auth.role.can_assign(role) {
        return Err(ApiError::forbidden(format!("{} cannot assign role {}", auth.role, role)));
    }
    if let Some(salary) = terms.basic_salary {
        if !salary.is_finite() || salary < 0.0 {
            return Err(ApiError::bad_request("basic_salary must be a non-negative number"));
        }
        if !auth.role.editable_user_columns().contains(&"basic_salary") {
            return Err(ApiError::forbidden("Salary is managed by payroll"));
        }
    }
    Ok(role)
}

#[utoipa::path(
    post,
    path = "/api/requests",
    request_body = CreateJoinRequest,
    responses(
        (status = 201, description = "Join request submitted", body = UserRequest),
        (status = 404, description = "Company not found"),
        (status = 409, description = "Already in a company or a request is pending")
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn create_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<CreateJoinRequest>,
) -> ApiResult<HttpResponse> {
    if auth.company_id.is_some() {
        return Err(ApiError::conflict("You already belong to a company"));
    }
    let name = body.company_name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("company_name is required"));
    }

    let company_id: u64 = sqlx::query_scalar("SELECT id FROM companies WHERE name = ?")
        .bind(name)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| ApiError::not_found("Company not found"))?;

    // The token can predate an approval.
    let current = sqlx::query_scalar::<_, Option<u64>>("SELECT company_id FROM users WHERE id = ?")
        .bind(auth.user_id)
        .fetch_optional(pool.get_ref())
        .await?
        .flatten();
    if current.is_some() {
        return Err(ApiError::conflict("You already belong to a company"));
    }

    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_requests WHERE user_id = ? AND status = ?")
        .bind(auth.user_id)
        .bind(ReviewStatus::Pending.as_ref())
        .fetch_one(pool.get_ref())
        .await?;
    if pending > 0 {
        return Err(ApiError::conflict("A join request is already pending"));
    }

    let result = sqlx::query("INSERT INTO user_requests (user_id, company_id, message, status) VALUES (?, ?, ?, ?)")
        .bind(auth.user_id)
        .bind(company_id)
        .bind(body.message.as_deref().map(str::trim).filter(|m| !m.is_empty()))
        .bind(ReviewStatus::Pending.as_ref())
        .execute(pool.get_ref())
        .await?;

    info!(user_id = auth.user_id, company_id, "Join request submitted");

    let request = find_request(pool.get_ref(), result.last_insert_id()).await?;
    Ok(HttpResponse::Created().json(request))
}

/// Admin and HR see requests addressed to their company; everyone else sees
/// their own.
#[utoipa::path(
    get,
    path = "/api/requests",
    params(RequestQuery),
    responses((status = 200, description = "Join requests", body = [UserRequest])),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn list_requests(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<RequestQuery>,
) -> ApiResult<HttpResponse> {
    let (mut sql, owner) = match auth.company_id {
        Some(company_id) if USER_MANAGERS.contains(&auth.role) => {
            (format!("{SELECT_USER_REQUEST} WHERE r.company_id = ?"), company_id)
        }
        _ => (format!("{SELECT_USER_REQUEST} WHERE r.user_id = ?"), auth.user_id),
    };
    if query.status.is_some() {
        sql.push_str(" AND r.status = ?");
    }
    sql.push_str(" ORDER BY r.created_at DESC, r.id DESC");

    let mut q = sqlx::query_as::<_, UserRequest>(&sql).bind(owner);
    if let Some(status) = &query.status {
        q = q.bind(status.as_ref());
    }
    let requests = q.fetch_all(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(requests))
}

#[utoipa::path(
    put,
    path = "/api/requests/{id}/approve",
    params(("id" = u64, Path, description = "Request id")),
    request_body = ApproveJoinRequest,
    responses(
        (status = 200, description = "Request approved, user joined", body = UserRequest),
        (status = 400, description = "Not pending"),
        (status = 403, description = "Admin or HR only"),
        (status = 404, description = "Request not found"),
        (status = 409, description = "User already joined a company")
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn approve_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ApproveJoinRequest>>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(USER_MANAGERS)?;
    let terms = body.map(|b| b.into_inner()).unwrap_or_default();
    let role = validate_terms(&auth, &terms)?;
    let request_id = path.into_inner();

    if let Some(manager_id) = terms.manager_id {
        if user::find_in_company(pool.get_ref(), company_id, manager_id).await?.is_none() {
            return Err(ApiError::bad_request("manager_id does not belong to this company"));
        }
    }
    let code = company_code_of(pool.get_ref(), company_id).await?;

    let mut tx = pool.begin().await?;

    let request = sqlx::query_as::<_, (u64, String)>(
        "SELECT user_id, status FROM user_requests WHERE id = ? AND company_id = ? FOR UPDATE",
    )
    .bind(request_id)
    .bind(company_id)
    .fetch_optional(&mut *tx)
    .await?;
    let (user_id, status) = request.ok_or_else(|| ApiError::not_found("Request not found"))?;
    if status != ReviewStatus::Pending.as_ref() {
        return Err(ApiError::bad_request(format!("Request is already {status}")));
    }

    let applicant = sqlx::query_as::<_, Applicant>(
        "SELECT company_id, first_name, last_name FROM users WHERE id = ? FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Requesting user no longer exists"))?;
    if applicant.company_id.is_some() {
        return Err(ApiError::conflict("User already belongs to a company"));
    }

    let today = Utc::now().date_naive();
    let prefix = login_id_prefix(&code, &applicant.first_name, &applicant.last_name, today.year());
    let first_serial = next_serial(&mut *tx, company_id, today.year(), &prefix).await?;
    let mut joined = false;

    for attempt in 0..MAX_SERIAL_ATTEMPTS {
        let login_id = with_serial(&prefix, first_serial + attempt);
        let updated = sqlx::query(
            r#"
            UPDATE users
            SET company_id = ?, role = ?, login_id = ?, date_of_joining = ?,
                basic_salary = COALESCE(?, basic_salary), manager_id = ?
            WHERE id = ?
            "#,
        )
        .bind(company_id)
        .bind(role.as_ref())
        .bind(&login_id)
        .bind(today)
        .bind(terms.basic_salary)
        .bind(terms.manager_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await;

        match updated {
            Ok(_) => {
                joined = true;
                break;
            }
            Err(e) if violates_key(&e, LOGIN_ID_KEY) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if !joined {
        return Err(ApiError::conflict("Could not allocate a login id, retry"));
    }

    sqlx::query(
        r#"
        UPDATE user_requests
        SET status = ?, reviewed_by = ?, reviewed_at = UTC_TIMESTAMP()
        WHERE id = ?
        "#,
    )
    .bind(ReviewStatus::Approved.as_ref())
    .bind(auth.user_id)
    .bind(request_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(request_id, user_id, company_id, role = %role, approved_by = auth.user_id, "Join request approved");

    let request = find_request(pool.get_ref(), request_id).await?;
    Ok(HttpResponse::Ok().json(request))
}

#[utoipa::path(
    put,
    path = "/api/requests/{id}/reject",
    params(("id" = u64, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request rejected", body = UserRequest),
        (status = 400, description = "Not pending"),
        (status = 403, description = "Admin or HR only"),
        (status = 404, description = "Request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn reject_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(USER_MANAGERS)?;
    let request_id = path.into_inner();

    let result = sqlx::query(
        r#"
        UPDATE user_requests
        SET status = ?, reviewed_by = ?, reviewed_at = UTC_TIMESTAMP()
        WHERE id = ? AND company_id = ? AND status = ?
        "#,
    )
    .bind(ReviewStatus::Rejected.as_ref())
    .bind(auth.user_id)
    .bind(request_id)
    .bind(company_id)
    .bind(ReviewStatus::Pending.as_ref())
    .execute(pool.get_ref())
    .await?;

    let request = find_request(pool.get_ref(), request_id).await?;
    if request.company_id != company_id {
        return Err(ApiError::not_found("Request not found"));
    }
    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request(format!("Request is already {}", request.status)));
    }

    Ok(HttpResponse::Ok().json(request))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reviewer(role: Role) -> AuthUser {
        AuthUser {
            user_id: 1,
            email: "hr@odoo.in".into(),
            role,
            session_id: 1,
            company_id: Some(1),
        }
    }

    #[test]
    fn default_terms_make_an_employee() {
        let terms = ApproveJoinRequest::default();
        assert_eq!(validate_terms(&reviewer(Role::HrOfficer), &terms).unwrap(), Role::Employee);
    }

    #[test]
    fn hr_terms_are_limited() {
        let hr = reviewer(Role::HrOfficer);
        let admin_terms = ApproveJoinRequest {
            role: Some(Role::Admin),
            ..Default::default()
        };
        assert!(matches!(validate_terms(&hr, &admin_terms), Err(ApiError::Forbidden(_))));

        let salary_terms = ApproveJoinRequest {
            basic_salary: Some(30_000.0),
            ..Default::default()
        };
        assert!(matches!(validate_terms(&hr, &salary_terms), Err(ApiError::Forbidden(_))));
        assert!(validate_terms(&reviewer(Role::Admin), &salary_terms).is_ok());
    }
}
