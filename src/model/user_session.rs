use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::auth::ended_sessions;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    Logout,
    Timeout,
    Terminated,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct UserSession {
    pub id: u64,
    pub user_id: u64,
    pub company_id: Option<u64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub started_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub last_activity_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
    pub is_active: bool,
}

pub const SELECT_SESSION: &str = r#"
    SELECT id, user_id, company_id, ip_address, user_agent, started_at, last_activity_at,
           ended_at, end_reason, is_active
    FROM user_sessions
"#;

impl UserSession {
    /// Idle longer than the timeout, measured from the last heartbeat.
    pub fn is_idle_expired(&self, now: DateTime<Utc>, timeout_minutes: u32) -> bool {
        now - self.last_activity_at > Duration::minutes(i64::from(timeout_minutes))
    }
}

/// Ends a session and revokes every refresh token minted for it.
pub async fn end_session(
    pool: &sqlx::MySqlPool,
    session_id: u64,
    reason: EndReason,
) -> Result<bool, sqlx::Error> {
    let ended = sqlx::query(
        r#"
        UPDATE user_sessions
        SET is_active = FALSE, ended_at = UTC_TIMESTAMP(), end_reason = ?
        WHERE id = ? AND is_active = TRUE
        "#,
    )
    .bind(reason.as_ref())
    .bind(session_id)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE session_id = ?")
        .bind(session_id)
        .execute(pool)
        .await?;

    ended_sessions::mark_ended(session_id).await;

    Ok(ended.rows_affected() > 0)
}

/// Ends every open session of a user, for deactivation and deletion.
/// Returns how many were open.
pub async fn end_user_sessions(
    pool: &sqlx::MySqlPool,
    user_id: u64,
    reason: EndReason,
) -> Result<usize, sqlx::Error> {
    let open: Vec<u64> =
        sqlx::query_scalar("SELECT id FROM user_sessions WHERE user_id = ? AND is_active = TRUE")
            .bind(user_id)
            .fetch_all(pool)
            .await?;

    sqlx::query(
        r#"
        UPDATE user_sessions
        SET is_active = FALSE, ended_at = UTC_TIMESTAMP(), end_reason = ?
        WHERE user_id = ? AND is_active = TRUE
        "#,
    )
    .bind(reason.as_ref())
    .bind(user_id)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    let count = open.len();
    ended_sessions::mark_all_ended(open).await;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(last_activity_at: DateTime<Utc>) -> UserSession {
        UserSession {
            id: 1,
            user_id: 1,
            company_id: Some(1),
            ip_address: None,
            user_agent: None,
            started_at: last_activity_at,
            last_activity_at,
            ended_at: None,
            end_reason: None,
            is_active: true,
        }
    }

    #[test]
    fn idle_expiry_is_strictly_after_timeout() {
        let last = Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0).unwrap();
        let s = session(last);
        assert!(!s.is_idle_expired(last + Duration::minutes(30), 30));
        assert!(s.is_idle_expired(last + Duration::minutes(31), 30));
    }
}
