//! Sessions that ended before their access tokens expired.
//!
//! Access tokens carry their session id, and the auth guard rejects any id
//! listed here. Entries outlive the longest access token, after which the
//! token itself is expired.

use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::time::Duration;

use crate::config::MAX_ACCESS_TOKEN_TTL;
use crate::utils::warmup::in_batches;

pub const REMEMBER_FOR: Duration = Duration::from_secs(MAX_ACCESS_TOKEN_TTL);

static ENDED: Lazy<Cache<u64, ()>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(1_000_000)
        .time_to_live(REMEMBER_FOR)
        .build()
});

pub async fn mark_ended(session_id: u64) {
    ENDED.insert(session_id, ()).await;
}

pub async fn mark_all_ended(session_ids: impl IntoIterator<Item = u64>) {
    for id in session_ids {
        ENDED.insert(id, ()).await;
    }
}

/// Sync so the request extractor can call it.
pub fn is_ended(session_id: u64) -> bool {
    ENDED.contains_key(&session_id)
}

/// Reloads sessions that ended recently enough to still have live access
/// tokens, so a restart does not revive them.
pub async fn warmup(pool: &MySqlPool) -> Result<usize, sqlx::Error> {
    let total = load_recent(pool, REMEMBER_FOR).await?;
    tracing::info!(total, "Ended sessions loaded");
    Ok(total)
}

/// Marks every session that ended within `window`. Used after bulk closes
/// that do not return the ids they touched.
pub async fn load_recent(pool: &MySqlPool, window: Duration) -> Result<usize, sqlx::Error> {
    let rows = sqlx::query_scalar::<_, u64>(
        r#"
        SELECT id FROM user_sessions
        WHERE is_active = FALSE AND ended_at >= UTC_TIMESTAMP() - INTERVAL ? SECOND
        "#,
    )
    .bind(window.as_secs())
    .fetch(pool);

    in_batches(rows, 500, |ids| mark_all_ended(ids)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn marked_sessions_are_ended() {
        assert!(!is_ended(910_001));
        mark_ended(910_001).await;
        assert!(is_ended(910_001));

        mark_all_ended([910_002, 910_003]).await;
        assert!(is_ended(910_002) && is_ended(910_003));
        assert!(!is_ended(910_004));
    }
}
