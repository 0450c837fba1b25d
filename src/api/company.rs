use actix_web::{HttpResponse, web};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::info;
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::auth::login_id::{
    LOGIN_ID_KEY, MAX_SERIAL_ATTEMPTS, company_code, login_id_prefix, next_serial, with_serial,
};
use crate::db::{is_unique_violation, violates_key};
use crate::errors::{ApiError, ApiResult};
use crate::model::company::{Company, SELECT_COMPANY};
use crate::model::role::Role;

#[derive(Deserialize, ToSchema)]
pub struct CompanyPayload {
    #[schema(example = "Odoo India")]
    pub name: String,
}

/// Inserts a company and its default work settings. Returns id and code.
pub async fn create_company_tx(
    tx: &mut Transaction<'_, MySql>,
    name: &str,
) -> Result<(u64, String), ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Company name is required"));
    }
    let code = company_code(name);

    let inserted = sqlx::query("INSERT INTO companies (name, code) VALUES (?, ?)")
        .bind(name)
        .bind(&code)
        .execute(&mut **tx)
        .await;

    let company_id = match inserted {
        Ok(r) => r.last_insert_id(),
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::conflict("Company name already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    sqlx::query("INSERT INTO work_settings (company_id) VALUES (?)")
        .bind(company_id)
        .execute(&mut **tx)
        .await?;

    Ok((company_id, code))
}

async fn fetch_company(pool: &MySqlPool, company_id: u64) -> ApiResult<Company> {
    sqlx::query_as::<_, Company>(&format!("{SELECT_COMPANY} WHERE id = ?"))
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Company not found"))
}

/// Login-id prefix of a company.
pub async fn company_code_of(pool: &MySqlPool, company_id: u64) -> ApiResult<String> {
    sqlx::query_scalar::<_, String>("SELECT code FROM companies WHERE id = ?")
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Company not found"))
}

#[derive(sqlx::FromRow)]
struct Founder {
    company_id: Option<u64>,
    first_name: String,
    last_name: String,
}

/// A company-less user founds a company and becomes its admin. The caller
/// must refresh their token to pick up the new role.
#[utoipa::path(
    post,
    path = "/api/companies",
    request_body = CompanyPayload,
    responses(
        (status = 201, description = "Company created", body = Company),
        (status = 409, description = "Name taken or user already in a company")
    ),
    security(("bearer_auth" = [])),
    tag = "Company"
)]
pub async fn create_company(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<CompanyPayload>,
) -> ApiResult<HttpResponse> {
    let mut tx = pool.begin().await?;

    let founder = sqlx::query_as::<_, Founder>(
        "SELECT company_id, first_name, last_name FROM users WHERE id = ? FOR UPDATE",
    )
    .bind(auth.user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    if founder.company_id.is_some() {
        return Err(ApiError::conflict("User already belongs to a company"));
    }

    let (company_id, code) = create_company_tx(&mut tx, &body.name).await?;
    let today = Utc::now().date_naive();
    let prefix = login_id_prefix(&code, &founder.first_name, &founder.last_name, today.year());
    let first_serial = next_serial(&mut *tx, company_id, today.year(), &prefix).await?;
    let mut joined = false;

    for attempt in 0..MAX_SERIAL_ATTEMPTS {
        let updated = sqlx::query(
            r#"
            UPDATE users
            SET company_id = ?, role = ?, login_id = ?, date_of_joining = COALESCE(date_of_joining, ?)
            WHERE id = ?
            "#,
        )
        .bind(company_id)
        .bind(Role::Admin.as_ref())
        .bind(with_serial(&prefix, first_serial + attempt))
        .bind(today)
        .bind(auth.user_id)
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

    tx.commit().await?;

    info!(company_id, user_id = auth.user_id, "Company created");

    let company = fetch_company(pool.get_ref(), company_id).await?;
    Ok(HttpResponse::Created().json(company))
}

#[utoipa::path(
    get,
    path = "/api/companies/me",
    responses(
        (status = 200, description = "Caller's company", body = Company),
        (status = 403, description = "No company")
    ),
    security(("bearer_auth" = [])),
    tag = "Company"
)]
pub async fn get_my_company(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let company = fetch_company(pool.get_ref(), company_id).await?;
    Ok(HttpResponse::Ok().json(company))
}

/// Renames the company. The login-id code is kept so existing ids stay stable.
#[utoipa::path(
    put,
    path = "/api/companies/me",
    request_body = CompanyPayload,
    responses(
        (status = 200, description = "Company renamed", body = Company),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Name taken")
    ),
    security(("bearer_auth" = [])),
    tag = "Company"
)]
pub async fn update_my_company(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<CompanyPayload>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let company_id = auth.require_company()?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Company name is required"));
    }

    let updated = sqlx::query("UPDATE companies SET name = ? WHERE id = ?")
        .bind(name)
        .bind(company_id)
        .execute(pool.get_ref())
        .await;

    match updated {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::conflict("Company name already exists"));
        }
        Err(e) => return Err(e.into()),
    }

    let company = fetch_company(pool.get_ref(), company_id).await?;
    Ok(HttpResponse::Ok().json(company))
}
