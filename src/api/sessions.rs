use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::Serialize;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::errors::{ApiError, ApiResult};
use crate::model::role::MONITORS;
use crate::model::user_session::{EndReason, SELECT_SESSION, UserSession, end_session};
use crate::model::work_settings;
use crate::models::MessageResponse;

#[derive(Serialize, ToSchema)]
pub struct Heartbeat {
    pub session_id: u64,
    /// Idle minutes after which the session is closed.
    #[schema(example = 30)]
    pub timeout_minutes: u32,
}

/// Keeps the caller's session alive. An ended or idle-expired session
/// answers 401 so the client logs out.
#[utoipa::path(
    post,
    path = "/api/sessions/heartbeat",
    responses(
        (status = 200, description = "Session refreshed", body = Heartbeat),
        (status = 401, description = "Session ended or timed out")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn heartbeat(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let session = sqlx::query_as::<_, UserSession>(&format!("{SELECT_SESSION} WHERE id = ? AND user_id = ?"))
        .bind(auth.session_id)
        .bind(auth.user_id)
        .fetch_optional(pool.get_ref())
        .await?
        .filter(|s| s.is_active)
        .ok_or_else(|| ApiError::unauthorized("Session ended"))?;

    let timeout_minutes = match auth.company_id {
        Some(company_id) => work_settings::load(pool.get_ref(), company_id)
            .await?
            .session_timeout_minutes,
        None => config.session_timeout_minutes,
    };

    if session.is_idle_expired(Utc::now(), timeout_minutes) {
        end_session(pool.get_ref(), session.id, EndReason::Timeout).await?;
        info!(session_id = session.id, user_id = auth.user_id, "Session timed out");
        return Err(ApiError::unauthorized("Session timed out"));
    }

    sqlx::query("UPDATE user_sessions SET last_activity_at = UTC_TIMESTAMP() WHERE id = ? AND is_active = TRUE")
        .bind(session.id)
        .execute(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(Heartbeat {
        session_id: session.id,
        timeout_minutes,
    }))
}

#[utoipa::path(
    get,
    path = "/api/sessions/me",
    responses((status = 200, description = "Recent own sessions", body = [UserSession])),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn my_sessions(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let sessions = sqlx::query_as::<_, UserSession>(&format!(
        "{SELECT_SESSION} WHERE user_id = ? ORDER BY started_at DESC LIMIT 50"
    ))
    .bind(auth.user_id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(sessions))
}

/// Active sessions: the whole company for admins, the team for managers.
#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "Active sessions", body = [UserSession]),
        (status = 403, description = "Admin or Manager only")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn list_active_sessions(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(MONITORS)?;

    let mut sql = format!("{SELECT_SESSION} WHERE company_id = ? AND is_active = TRUE");
    let scope = auth.directory_scope().user_predicate("user_id");
    if let Some((predicate, _)) = &scope {
        sql.push_str(&format!(" AND {predicate}"));
    }
    sql.push_str(" ORDER BY last_activity_at DESC");

    let mut query = sqlx::query_as::<_, UserSession>(&sql).bind(company_id);
    if let Some((_, bind)) = scope {
        query = query.bind(bind);
    }
    let sessions = query.fetch_all(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(sessions))
}

#[utoipa::path(
    delete,
    path = "/api/sessions/{id}",
    params(("id" = u64, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session terminated", body = MessageResponse),
        (status = 400, description = "Session already ended"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Session not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn terminate_session(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let company_id = auth.require_company()?;
    let session_id = path.into_inner();

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_sessions WHERE id = ? AND company_id = ?")
        .bind(session_id)
        .bind(company_id)
        .fetch_one(pool.get_ref())
        .await?;
    if exists == 0 {
        return Err(ApiError::not_found("Session not found"));
    }

    if !end_session(pool.get_ref(), session_id, EndReason::Terminated).await? {
        return Err(ApiError::bad_request("Session already ended"));
    }

    info!(session_id, terminated_by = auth.user_id, "Session terminated");

    Ok(HttpResponse::Ok().json(MessageResponse::new("Session terminated")))
}
