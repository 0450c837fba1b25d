use actix_web::{HttpResponse, web};
use chrono::NaiveTime;
use serde::Deserialize;
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::errors::ApiResult;
use crate::model::work_settings::{self, WorkSettings};

/// Partial update; omitted fields keep their current value.
#[derive(Deserialize, ToSchema)]
pub struct UpdateWorkSettings {
    #[schema(value_type = Option<String>, example = "09:30:00")]
    pub work_start: Option<NaiveTime>,
    #[schema(value_type = Option<String>, example = "18:30:00")]
    pub work_end: Option<NaiveTime>,
    pub grace_minutes: Option<u32>,
    pub half_day_hours: Option<f64>,
    #[schema(example = "MON,TUE,WED,THU,FRI,SAT")]
    pub working_days: Option<String>,
    pub paid_leave_days: Option<u32>,
    pub sick_leave_days: Option<u32>,
    pub pf_rate_percent: Option<f64>,
    pub professional_tax: Option<f64>,
    pub session_timeout_minutes: Option<u32>,
    pub screenshot_interval_seconds: Option<u32>,
    pub utc_offset_minutes: Option<i32>,
}

impl UpdateWorkSettings {
    pub fn apply(self, mut current: WorkSettings) -> WorkSettings {
        if let Some(v) = self.work_start {
            current.work_start = v;
        }
        if let Some(v) = self.work_end {
            current.work_end = v;
        }
        if let Some(v) = self.grace_minutes {
            current.grace_minutes = v;
        }
        if let Some(v) = self.half_day_hours {
            current.half_day_hours = v;
        }
        if let Some(v) = self.working_days {
            current.working_days = v.to_uppercase().replace(' ', "");
        }
        if let Some(v) = self.paid_leave_days {
            current.paid_leave_days = v;
        }
        if let Some(v) = self.sick_leave_days {
            current.sick_leave_days = v;
        }
        if let Some(v) = self.pf_rate_percent {
            current.pf_rate_percent = v;
        }
        if let Some(v) = self.professional_tax {
            current.professional_tax = v;
        }
        if let Some(v) = self.session_timeout_minutes {
            current.session_timeout_minutes = v;
        }
        if let Some(v) = self.screenshot_interval_seconds {
            current.screenshot_interval_seconds = v;
        }
        if let Some(v) = self.utc_offset_minutes {
            current.utc_offset_minutes = v;
        }
        current
    }
}

#[utoipa::path(
    get,
    path = "/api/settings/work",
    responses(
        (status = 200, description = "Company work settings", body = WorkSettings),
        (status = 403, description = "No company")
    ),
    security(("bearer_auth" = [])),
    tag = "Settings"
)]
pub async fn get_work_settings(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let settings = work_settings::load(pool.get_ref(), company_id).await?;
    Ok(HttpResponse::Ok().json(settings))
}

#[utoipa::path(
    put,
    path = "/api/settings/work",
    request_body = UpdateWorkSettings,
    responses(
        (status = 200, description = "Updated settings", body = WorkSettings),
        (status = 400, description = "Invalid settings"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Settings"
)]
pub async fn update_work_settings(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<UpdateWorkSettings>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let company_id = auth.require_company()?;

    let current = work_settings::load(pool.get_ref(), company_id).await?;
    let next = body.into_inner().apply(current);
    next.validate()?;

    sqlx::query(
        r#"
        INSERT INTO work_settings
            (company_id, work_start, work_end, grace_minutes, half_day_hours, working_days,
             paid_leave_days, sick_leave_days, pf_rate_percent, professional_tax,
             session_timeout_minutes, screenshot_interval_seconds, utc_offset_minutes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            work_start = VALUES(work_start),
            work_end = VALUES(work_end),
            grace_minutes = VALUES(grace_minutes),
            half_day_hours = VALUES(half_day_hours),
            working_days = VALUES(working_days),
            paid_leave_days = VALUES(paid_leave_days),
            sick_leave_days = VALUES(sick_leave_days),
            pf_rate_percent = VALUES(pf_rate_percent),
            professional_tax = VALUES(professional_tax),
            session_timeout_minutes = VALUES(session_timeout_minutes),
            screenshot_interval_seconds = VALUES(screenshot_interval_seconds),
            utc_offset_minutes = VALUES(utc_offset_minutes)
        "#,
    )
    .bind(company_id)
    .bind(next.work_start)
    .bind(next.work_end)
    .bind(next.grace_minutes)
    .bind(next.half_day_hours)
    .bind(&next.working_days)
    .bind(next.paid_leave_days)
    .bind(next.sick_leave_days)
    .bind(next.pf_rate_percent)
    .bind(next.professional_tax)
    .bind(next.session_timeout_minutes)
    .bind(next.screenshot_interval_seconds)
    .bind(next.utc_offset_minutes)
    .execute(pool.get_ref())
    .await?;

    tracing::info!(company_id, user_id = auth.user_id, "Work settings updated");

    Ok(HttpResponse::Ok().json(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_only_touches_provided_fields() {
        let patch: UpdateWorkSettings =
            serde_json::from_value(serde_json::json!({ "pf_rate_percent": 10.0, "working_days": "mon, tue" }))
                .unwrap();
        let next = patch.apply(WorkSettings::defaults(3));
        assert_eq!(next.pf_rate_percent, 10.0);
        assert_eq!(next.working_days, "MON,TUE");
        assert_eq!(next.professional_tax, 200.0);
        assert_eq!(next.company_id, 3);
        assert!(next.validate().is_ok());
    }
}
