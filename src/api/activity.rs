use actix_web::{HttpRequest, HttpResponse, web};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

use crate::api::leave::is_report;
use crate::auth::{auth::AuthUser, handlers::client_ip};
use crate::config::Config;
use crate::errors::{ApiError, ApiResult};
use crate::model::activity_log::{self, ActivityKind, ActivityLog, SELECT_ACTIVITY, ScreenCapture};
use crate::model::role::{MONITORS, Role};
use crate::model::{user, work_settings};
use crate::utils::pagination::{Filter, FilterValue, Pagination, bind_filters};

#[derive(Deserialize, ToSchema)]
pub struct ReportActivity {
    #[schema(example = "PAGE_VIEW")]
    pub kind: ActivityKind,
    #[schema(example = "/dashboard")]
    pub details: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActivityQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub user_id: Option<u64>,
    pub kind: Option<ActivityKind>,
}

#[derive(Serialize, ToSchema)]
pub struct ActivityListResponse {
    pub data: Vec<ActivityLog>,
    pub page: u64,
    pub per_page: u64,
    pub total: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct UploadScreenshot {
    /// Base64 image, optionally as a `data:` URL.
    pub image_base64: String,
}

#[derive(Serialize, ToSchema)]
pub struct ScreenshotAccepted {
    pub id: u64,
    pub bytes: usize,
}

#[derive(Serialize, ToSchema)]
pub struct MonitorSettings {
    #[schema(example = 10)]
    pub screenshot_interval_seconds: u32,
    #[schema(example = 30)]
    pub session_timeout_minutes: u32,
    pub max_screenshot_bytes: usize,
}

/// Strips an optional `data:image/...;base64,` prefix and checks the payload
/// decodes within `max_bytes`. Returns the bare base64 and decoded size.
fn decode_screenshot(raw: &str, max_bytes: usize) -> Result<(&str, usize), ApiError> {
    let encoded = match raw.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => raw,
    }
    .trim();

    if encoded.is_empty() {
        return Err(ApiError::bad_request("image_base64 is required"));
    }
    // Reject before decoding anything obviously too large.
    if encoded.len() / 4 * 3 > max_bytes + 3 {
        return Err(ApiError::bad_request(format!("Screenshot exceeds {max_bytes} bytes")));
    }

    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| ApiError::bad_request("image_base64 is not valid base64"))?;
    if decoded.len() > max_bytes {
        return Err(ApiError::bad_request(format!("Screenshot exceeds {max_bytes} bytes")));
    }
    Ok((encoded, decoded.len()))
}

#[utoipa::path(
    post,
    path = "/api/activity",
    request_body = ReportActivity,
    responses(
        (status = 201, description = "Activity recorded", body = ActivityLog),
        (status = 400, description = "Kind is recorded by the server only")
    ),
    security(("bearer_auth" = [])),
    tag = "Activity"
)]
pub async fn report_activity(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<ReportActivity>,
) -> ApiResult<HttpResponse> {
    if !body.kind.is_client_reported() {
        return Err(ApiError::bad_request(format!("{} cannot be reported by clients", body.kind)));
    }
    let details = body
        .details
        .as_deref()
        .map(|d| d.chars().take(1000).collect::<String>());

    let result = sqlx::query(
        "INSERT INTO activity_logs (company_id, user_id, kind, details, ip_address) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(auth.company_id)
    .bind(auth.user_id)
    .bind(body.kind.as_ref())
    .bind(details)
    .bind(client_ip(&req))
    .execute(pool.get_ref())
    .await?;

    let log = sqlx::query_as::<_, ActivityLog>(&format!("{SELECT_ACTIVITY} WHERE id = ?"))
        .bind(result.last_insert_id())
        .fetch_one(pool.get_ref())
        .await?;

    Ok(HttpResponse::Created().json(log))
}

#[utoipa::path(
    get,
    path = "/api/activity",
    params(ActivityQuery),
    responses((status = 200, description = "Activity in scope", body = ActivityListResponse)),
    security(("bearer_auth" = [])),
    tag = "Activity"
)]
pub async fn list_activity(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ActivityQuery>,
) -> ApiResult<HttpResponse> {
    let pagination = Pagination::new(query.page, query.per_page);

    let mut filter = Filter::new();
    match auth.company_id {
        Some(company_id) => {
            filter.push("company_id = ?", FilterValue::U64(company_id));
            if let Some((predicate, bind)) = auth.review_scope().user_predicate("user_id") {
                filter.push(predicate, FilterValue::U64(bind));
            }
        }
        None => filter.push("user_id = ?", FilterValue::U64(auth.user_id)),
    }
    if let Some(user_id) = query.user_id {
        filter.push("user_id = ?", FilterValue::U64(user_id));
    }
    if let Some(kind) = query.kind {
        filter.push("kind = ?", FilterValue::Str(kind.as_ref().to_string()));
    }

    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM activity_logs{where_clause}");
    let total: i64 = bind_filters!(sqlx::query_scalar(&count_sql), &filter.args)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!("{SELECT_ACTIVITY}{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
    let data = bind_filters!(sqlx::query_as::<_, ActivityLog>(&data_sql), &filter.args)
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(ActivityListResponse {
        data,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    }))
}

#[utoipa::path(
    post,
    path = "/api/monitor/screenshot",
    request_body = UploadScreenshot,
    responses(
        (status = 201, description = "Screenshot stored", body = ScreenshotAccepted),
        (status = 400, description = "Invalid or oversized image"),
        (status = 403, description = "No company")
    ),
    security(("bearer_auth" = [])),
    tag = "Monitor"
)]
pub async fn upload_screenshot(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    body: web::Json<UploadScreenshot>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let (encoded, bytes) = decode_screenshot(&body.image_base64, config.max_screenshot_bytes)?;

    let result = sqlx::query(
        "INSERT INTO screen_captures (company_id, user_id, session_id, image_data) VALUES (?, ?, ?, ?)",
    )
    .bind(company_id)
    .bind(auth.user_id)
    .bind(auth.session_id)
    .bind(encoded)
    .execute(pool.get_ref())
    .await?;

    debug!(user_id = auth.user_id, bytes, "Screenshot stored");
    activity_log::record(
        pool.get_ref(),
        Some(company_id),
        auth.user_id,
        ActivityKind::Screenshot,
        Some(format!("capture {} ({bytes} bytes)", result.last_insert_id())),
        client_ip(&req),
    )
    .await;

    Ok(HttpResponse::Created().json(ScreenshotAccepted {
        id: result.last_insert_id(),
        bytes,
    }))
}

/// Latest capture of a user. Admins see the company, managers their team.
#[utoipa::path(
    get,
    path = "/api/monitor/{user_id}/latest",
    params(("user_id" = u64, Path, description = "Monitored user")),
    responses(
        (status = 200, description = "Latest capture", body = ScreenCapture),
        (status = 403, description = "Admin or the user's manager only"),
        (status = 404, description = "No capture yet")
    ),
    security(("bearer_auth" = [])),
    tag = "Monitor"
)]
pub async fn latest_screenshot(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(MONITORS)?;
    let user_id = path.into_inner();

    if user::find_in_company(pool.get_ref(), company_id, user_id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }
    if auth.role == Role::Manager
        && user_id != auth.user_id
        && !is_report(pool.get_ref(), auth.user_id, user_id).await?
    {
        return Err(ApiError::forbidden("Managers can only monitor their team"));
    }

    let capture = sqlx::query_as::<_, ScreenCapture>(
        r#"
        SELECT id, company_id, user_id, session_id, image_data, captured_at
        FROM screen_captures
        WHERE user_id = ? AND company_id = ?
        ORDER BY captured_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(company_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("No screenshot yet"))?;

    Ok(HttpResponse::Ok().json(capture))
}

#[utoipa::path(
    get,
    path = "/api/monitor/settings",
    responses((status = 200, description = "Client monitoring settings", body = MonitorSettings)),
    security(("bearer_auth" = [])),
    tag = "Monitor"
)]
pub async fn monitor_settings(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let settings = work_settings::load(pool.get_ref(), company_id).await?;

    Ok(HttpResponse::Ok().json(MonitorSettings {
        screenshot_interval_seconds: settings.screenshot_interval_seconds,
        session_timeout_minutes: settings.session_timeout_minutes,
        max_screenshot_bytes: config.max_screenshot_bytes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_data_url_base64() {
        let plain = STANDARD.encode(b"png-bytes");
        assert_eq!(decode_screenshot(&plain, 1024).unwrap(), (plain.as_str(), 9));

        let url = format!("data:image/png;base64,{plain}");
        assert_eq!(decode_screenshot(&url, 1024).unwrap().0, plain);
    }

    #[test]
    fn rejects_garbage_and_oversized_images() {
        assert!(matches!(decode_screenshot("", 1024), Err(ApiError::BadRequest(_))));
        assert!(matches!(decode_screenshot("***", 1024), Err(ApiError::BadRequest(_))));

        let big = STANDARD.encode(vec![0u8; 2048]);
        assert!(matches!(decode_screenshot(&big, 1024), Err(ApiError::BadRequest(_))));
        assert!(decode_screenshot(&big, 2048).is_ok());
    }
}
