use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    Login,
    Logout,
    CheckIn,
    CheckOut,
    LeaveApplied,
    LeaveReviewed,
    PayrollGenerated,
    PageView,
    Idle,
    Screenshot,
}

impl ActivityKind {
    /// Kinds a client may post itself; the rest are written by the server.
    pub fn is_client_reported(self) -> bool {
        matches!(self, ActivityKind::PageView | ActivityKind::Idle)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct ActivityLog {
    pub id: u64,
    pub company_id: Option<u64>,
    pub user_id: u64,
    #[schema(example = "CHECK_IN")]
    pub kind: String,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const SELECT_ACTIVITY: &str = r#"
    SELECT id, company_id, user_id, kind, details, ip_address, created_at
    FROM activity_logs
"#;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct ScreenCapture {
    pub id: u64,
    pub company_id: u64,
    pub user_id: u64,
    pub session_id: Option<u64>,
    /// Base64 encoded image as uploaded by the client.
    pub image_data: String,
    #[schema(value_type = String, format = "date-time")]
    pub captured_at: DateTime<Utc>,
}

/// Appends an activity row. Failures are logged and swallowed so the
/// calling request still succeeds.
pub async fn record(
    pool: &sqlx::MySqlPool,
    company_id: Option<u64>,
    user_id: u64,
    kind: ActivityKind,
    details: Option<String>,
    ip_address: Option<String>,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO activity_logs (company_id, user_id, kind, details, ip_address)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(user_id)
    .bind(kind.as_ref())
    .bind(details)
    .bind(ip_address)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, user_id, kind = %kind, "Failed to record activity");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clients_cannot_forge_server_events() {
        assert!(ActivityKind::PageView.is_client_reported());
        assert!(ActivityKind::Idle.is_client_reported());
        assert!(!ActivityKind::Login.is_client_reported());
        assert!(!ActivityKind::Screenshot.is_client_reported());
    }
}
