use sqlx::MySqlPool;
use std::time::Duration;

use crate::auth::ended_sessions;
use crate::config::Config;
use crate::model::user_session::EndReason;

/// Closes sessions idle past their company's timeout (or the configured
/// default for company-less users). Returns the number of sessions closed.
pub async fn close_idle_sessions(pool: &MySqlPool, default_timeout_minutes: u32) -> Result<u64, sqlx::Error> {
    let closed = sqlx::query(
        r#"
        UPDATE user_sessions s
        LEFT JOIN work_settings w ON w.company_id = s.company_id
        SET s.is_active = FALSE, s.ended_at = UTC_TIMESTAMP(), s.end_reason = ?
        WHERE s.is_active = TRUE
          AND s.last_activity_at < UTC_TIMESTAMP() - INTERVAL COALESCE(w.session_timeout_minutes, ?) MINUTE
        "#,
    )
    .bind(EndReason::Timeout.as_ref())
    .bind(default_timeout_minutes)
    .execute(pool)
    .await?
    .rows_affected();

    if closed > 0 {
        sqlx::query(
            r#"
            UPDATE refresh_tokens t
            JOIN user_sessions s ON s.id = t.session_id
            SET t.revoked = TRUE
            WHERE s.is_active = FALSE AND t.revoked = FALSE
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(closed)
}

pub async fn purge_screen_captures(pool: &MySqlPool, retention_hours: u32) -> Result<u64, sqlx::Error> {
    let purged = sqlx::query(
        "DELETE FROM screen_captures WHERE captured_at < UTC_TIMESTAMP() - INTERVAL ? HOUR",
    )
    .bind(retention_hours)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(purged)
}

/// Runs forever on the actix runtime; one failed tick is logged and the
/// next one tries again.
pub async fn run(pool: MySqlPool, config: Config) {
    let period = Duration::from_secs(config.session_reaper_interval_secs.max(1));
    let mut ticker = actix_web::rt::time::interval(period);

    loop {
        ticker.tick().await;

        match close_idle_sessions(&pool, config.session_timeout_minutes).await {
            Ok(0) => {}
            Ok(n) => {
                tracing::info!(closed = n, "Closed idle sessions");
                // Wide enough to include everything this tick closed.
                let window = period * 2 + Duration::from_secs(60);
                if let Err(e) = ended_sessions::load_recent(&pool, window).await {
                    tracing::error!(error = %e, "Failed to block closed sessions");
                }
            }
            Err(e) => tracing::error!(error = %e, "Session reaper failed"),
        }

        match purge_screen_captures(&pool, config.screenshot_retention_hours).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(purged = n, "Purged old screen captures"),
            Err(e) => tracing::error!(error = %e, "Screen capture purge failed"),
        }
    }
}
