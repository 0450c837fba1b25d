use crate::{
    api::company::create_company_tx,
    auth::{
        auth::AuthUser,
        jwt::{TokenSubject, bearer_token, generate_access_token, generate_refresh_token, verify_token},
        login_id::{LOGIN_ID_KEY, MAX_SERIAL_ATTEMPTS, login_id_prefix, next_serial, with_serial},
        password::{hash_password, verify_password},
    },
    config::Config,
    db::{is_unique_violation, violates_key},
    errors::{ApiError, ApiResult},
    model::{
        activity_log::{self, ActivityKind},
        role::Role,
        user::{self, MIN_PASSWORD_LEN, User, UserCredentials, is_valid_email},
        user_session::{EndReason, end_session},
    },
    models::{LoginReqDto, LoginResponse, MessageResponse, RegisterReq, TokenType},
    utils::email_index,
};
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use std::str::FromStr;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

pub fn client_ip(req: &HttpRequest) -> Option<String> {
    req.connection_info().realip_remote_addr().map(str::to_string)
}

fn user_agent(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.chars().take(255).collect())
}

fn validate_registration(body: &RegisterReq) -> Result<(), ApiError> {
    if body.first_name.trim().is_empty()
        || body.last_name.trim().is_empty()
        || body.email.trim().is_empty()
        || body.password.is_empty()
    {
        return Err(ApiError::bad_request(
            "first_name, last_name, email and password are required",
        ));
    }
    if !is_valid_email(body.email.trim()) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if let Some(name) = &body.company_name {
        if name.trim().is_empty() {
            return Err(ApiError::bad_request("company_name cannot be blank"));
        }
    }
    Ok(())
}

/// User registration. With `company_name` the user founds a company and
/// becomes its admin; otherwise they stay company-less until a join request
/// is approved.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterReq,
    responses(
        (status = 201, description = "User registered", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email or company already exists")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_register", skip(pool, body), fields(email = %body.email))]
pub async fn register(body: web::Json<RegisterReq>, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    validate_registration(&body)?;

    let email = email_index::normalize(&body.email);

    if !email_index::is_available(pool.get_ref(), &email).await? {
        return Err(ApiError::conflict("Email already registered"));
    }

    let hashed = hash_password(&body.password)
        .map_err(|e| ApiError::internal(format!("password hashing failed: {e}")))?;

    let mut tx = pool.begin().await?;

    // Founders get a login id; everyone else receives one when they join.
    let (company_id, role, login_id, today) = match body.company_name.as_deref() {
        Some(name) => {
            let (company_id, code) = create_company_tx(&mut tx, name).await?;
            let today = Utc::now().date_naive();
            let prefix = login_id_prefix(&code, &body.first_name, &body.last_name, today.year());
            let serial = next_serial(&mut *tx, company_id, today.year(), &prefix).await?;
            (Some(company_id), Role::Admin, Some((prefix, serial)), Some(today))
        }
        None => (None, Role::Employee, None, None),
    };

    let mut registered = false;
    for attempt in 0..MAX_SERIAL_ATTEMPTS {
        let inserted = sqlx::query(
            r#"
            INSERT INTO users
                (company_id, login_id, email, password, first_name, last_name, role, date_of_joining)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(company_id)
        .bind(login_id.as_ref().map(|(prefix, serial)| with_serial(prefix, serial + attempt)))
        .bind(&email)
        .bind(&hashed)
        .bind(body.first_name.trim())
        .bind(body.last_name.trim())
        .bind(role.as_ref())
        .bind(today)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                registered = true;
                break;
            }
            Err(e) if violates_key(&e, LOGIN_ID_KEY) => {
                debug!(attempt, "Login id taken, trying the next serial");
                continue;
            }
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::conflict("Email already registered"));
            }
            Err(e) => return Err(e.into()),
        }
    }
    if !registered {
        return Err(ApiError::conflict("Could not allocate a login id, retry"));
    }

    tx.commit().await?;
    email_index::remember(&email).await;

    info!(company_id = ?company_id, role = %role, "User registered");

    Ok(HttpResponse::Created().json(MessageResponse::new(match company_id {
        Some(_) => "Company and admin account created",
        None => "User registered successfully",
    })))
}

async fn open_session(
    pool: &MySqlPool,
    user_id: u64,
    company_id: Option<u64>,
    ip: Option<String>,
    agent: Option<String>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO user_sessions (user_id, company_id, ip_address, user_agent, started_at, last_activity_at)
        VALUES (?, ?, ?, ?, UTC_TIMESTAMP(), UTC_TIMESTAMP())
        "#,
    )
    .bind(user_id)
    .bind(company_id)
    .bind(ip)
    .bind(agent)
    .execute(pool)
    .await?;

    Ok(result.last_insert_id())
}

/// Mints an access/refresh pair and stores the refresh jti.
async fn issue_tokens(
    pool: &MySqlPool,
    config: &Config,
    subject: &TokenSubject,
) -> Result<(String, String), ApiError> {
    let access_token = generate_access_token(subject, &config.jwt_secret, config.access_token_ttl)?;
    let (refresh_token, refresh_claims) =
        generate_refresh_token(subject, &config.jwt_secret, config.refresh_token_ttl)?;

    debug!(user_id = subject.user_id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, session_id, jti, expires_at)
        VALUES (?, ?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(subject.user_id)
    .bind(subject.session_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(pool)
    .await?;

    Ok((access_token, refresh_token))
}

fn parse_role(raw: &str) -> Result<Role, ApiError> {
    Role::from_str(raw).map_err(|_| ApiError::internal(format!("unknown role '{raw}' in users table")))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Tokens issued", body = LoginResponse),
        (status = 400, description = "Login and password required"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_login", skip(req, pool, config, body), fields(login = %body.login))]
pub async fn login(
    req: HttpRequest,
    body: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    info!("Login request received");

    let login = body.login.trim();
    if login.is_empty() || body.password.is_empty() {
        info!("Validation failed: empty login or password");
        return Err(ApiError::bad_request("Login and password required"));
    }

    debug!("Fetching user from database");

    let creds = sqlx::query_as::<_, UserCredentials>(
        r#"
        SELECT id, email, password, role, company_id, is_active
        FROM users
        WHERE email = ? OR login_id = ?
        LIMIT 1
        "#,
    )
    .bind(login.to_lowercase())
    .bind(login.to_uppercase())
    .fetch_optional(pool.get_ref())
    .await
    .map_err(|e| {
        error!(error = %e, "Database error while fetching user");
        ApiError::from(e)
    })?;

    let creds = match creds {
        Some(c) => c,
        None => {
            info!("Invalid credentials: user not found");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    if let Err(e) = verify_password(&body.password, &creds.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    if !creds.is_active {
        info!(user_id = creds.id, "Login refused: account disabled");
        return Err(ApiError::unauthorized("Account is disabled"));
    }

    let role = parse_role(&creds.role)?;
    let ip = client_ip(&req);
    let session_id = open_session(
        pool.get_ref(),
        creds.id,
        creds.company_id,
        ip.clone(),
        user_agent(&req),
    )
    .await?;

    let subject = TokenSubject {
        user_id: creds.id,
        email: creds.email.clone(),
        role,
        company_id: creds.company_id,
        session_id,
    };
    let (access_token, refresh_token) = issue_tokens(pool.get_ref(), &config, &subject).await?;

    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = UTC_TIMESTAMP() WHERE id = ?")
        .bind(creds.id)
        .execute(pool.get_ref())
        .await
    {
        // not fatal for the login itself
        error!(error = %e, "Failed to update last_login_at");
    }

    activity_log::record(
        pool.get_ref(),
        creds.company_id,
        creds.id,
        ActivityKind::Login,
        Some(format!("session {session_id}")),
        ip,
    )
    .await;

    let user = user::find_by_id(pool.get_ref(), creds.id)
        .await?
        .ok_or_else(|| ApiError::internal("user vanished during login"))?;

    info!(user_id = creds.id, session_id, "Login successful");

    Ok(HttpResponse::Ok().json(LoginResponse {
        access_token,
        refresh_token,
        session_id,
        user,
    }))
}

#[derive(sqlx::FromRow)]
struct RefreshRecord {
    id: u64,
    user_id: u64,
    session_id: u64,
    revoked: bool,
}

#[derive(Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Rotates a refresh token. Role and company are re-read so promotions and
/// company changes take effect without a new login.
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Invalid, revoked or ended refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let header = req.headers().get("Authorization").and_then(|h| h.to_str().ok());
    let token = bearer_token(header).ok_or_else(|| ApiError::unauthorized("No token"))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| ApiError::unauthorized("Invalid token"))?;

    if claims.token_type != TokenType::Refresh {
        return Err(ApiError::unauthorized("Refresh token required"));
    }

    let record = sqlx::query_as::<_, RefreshRecord>(
        "SELECT id, user_id, session_id, revoked FROM refresh_tokens WHERE jti = ?",
    )
    .bind(&claims.jti)
    .fetch_optional(pool.get_ref())
    .await?;

    let record = match record {
        Some(r) if !r.revoked => r,
        _ => return Err(ApiError::unauthorized("Refresh token revoked")),
    };

    let session_active: Option<bool> =
        sqlx::query_scalar("SELECT is_active FROM user_sessions WHERE id = ?")
            .bind(record.session_id)
            .fetch_optional(pool.get_ref())
            .await?;

    if session_active != Some(true) {
        return Err(ApiError::unauthorized("Session ended"));
    }

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(record.id)
        .execute(pool.get_ref())
        .await?;

    let creds = sqlx::query_as::<_, UserCredentials>(
        "SELECT id, email, password, role, company_id, is_active FROM users WHERE id = ?",
    )
    .bind(record.user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .filter(|c| c.is_active)
    .ok_or_else(|| ApiError::unauthorized("Account unavailable"))?;

    sqlx::query(
        "UPDATE user_sessions SET last_activity_at = UTC_TIMESTAMP(), company_id = ? WHERE id = ?",
    )
    .bind(creds.company_id)
    .bind(record.session_id)
    .execute(pool.get_ref())
    .await?;

    let subject = TokenSubject {
        user_id: creds.id,
        email: creds.email,
        role: parse_role(&creds.role)?,
        company_id: creds.company_id,
        session_id: record.session_id,
    };
    let (access_token, refresh_token) = issue_tokens(pool.get_ref(), &config, &subject).await?;

    Ok(HttpResponse::Ok().json(TokenPair {
        access_token,
        refresh_token,
    }))
}

/// Ends the caller's session. Always answers 204, even for unknown tokens.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    auth: Option<AuthUser>,
    pool: web::Data<MySqlPool>,
) -> HttpResponse {
    if let Some(auth) = auth {
        match end_session(pool.get_ref(), auth.session_id, EndReason::Logout).await {
            Ok(_) => {
                activity_log::record(
                    pool.get_ref(),
                    auth.company_id,
                    auth.user_id,
                    ActivityKind::Logout,
                    Some(format!("session {}", auth.session_id)),
                    client_ip(&req),
                )
                .await;
            }
            Err(e) => error!(error = %e, session_id = auth.session_id, "Failed to end session"),
        }
    }

    HttpResponse::NoContent().finish()
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let user = user::find_by_id(pool.get_ref(), auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(HttpResponse::Ok().json(user))
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
}

#[utoipa::path(
    put,
    path = "/api/auth/password",
    request_body = ChangePassword,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "New password too short"),
        (status = 401, description = "Current password incorrect")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn change_password(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<ChangePassword>,
) -> ApiResult<HttpResponse> {
    if body.new_password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let current: String = sqlx::query_scalar("SELECT password FROM users WHERE id = ?")
        .bind(auth.user_id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    verify_password(&body.current_password, &current)
        .map_err(|_| ApiError::unauthorized("Current password is incorrect"))?;

    let hashed = hash_password(&body.new_password)
        .map_err(|e| ApiError::internal(format!("password hashing failed: {e}")))?;

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed)
        .bind(auth.user_id)
        .execute(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Password changed")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(email: &str, password: &str, company: Option<&str>) -> RegisterReq {
        RegisterReq {
            first_name: "John".into(),
            last_name: "Doe".into(),
            email: email.into(),
            password: password.into(),
            company_name: company.map(str::to_string),
        }
    }

    #[test]
    fn registration_validation() {
        assert!(validate_registration(&req("john@odoo.in", "longenough", None)).is_ok());
        assert!(validate_registration(&req("john@odoo.in", "short", None)).is_err());
        assert!(validate_registration(&req("john", "longenough", None)).is_err());
        assert!(validate_registration(&req("john@odoo.in", "longenough", Some("  "))).is_err());
        assert!(validate_registration(&req("john@odoo.in", "longenough", Some("Odoo India"))).is_ok());
    }
}
