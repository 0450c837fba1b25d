//! Email availability without a query in the common cases.
//!
//! The cuckoo filter holds every registered address, so a miss proves the
//! address is free. The moka set holds addresses confirmed taken. At startup it
//! is seeded with active company members who joined or logged in recently,
//! since those are the addresses that get registered a second time.

use autoscale_cuckoo_filter::CuckooFilter;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::RwLock;
use std::time::Duration;

use crate::utils::warmup::in_batches;

const FILTER_CAPACITY: usize = 100_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;
const TAKEN_CAPACITY: u64 = 200_000;
const TAKEN_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Never registered.
    Free,
    /// Confirmed taken.
    Taken,
    /// The filter says maybe; only the database knows.
    Unknown,
}

struct EmailIndex {
    filter: RwLock<CuckooFilter<String>>,
    taken: Cache<String, ()>,
}

impl EmailIndex {
    fn new(filter_capacity: usize, taken_capacity: u64) -> Self {
        Self {
            filter: RwLock::new(CuckooFilter::new(filter_capacity, FALSE_POSITIVE_RATE)),
            taken: Cache::builder()
                .max_capacity(taken_capacity)
                .time_to_live(TAKEN_TTL)
                .build(),
        }
    }

    /// Expects a normalized address.
    fn lookup(&self, email: &str) -> Lookup {
        // A poisoned filter cannot prove absence.
        let maybe = self.filter.read().map(|f| f.contains(email)).unwrap_or(true);
        if !maybe {
            Lookup::Free
        } else if self.taken.contains_key(email) {
            Lookup::Taken
        } else {
            Lookup::Unknown
        }
    }

    async fn remember(&self, email: String) {
        if let Ok(mut filter) = self.filter.write() {
            filter.add(&email);
        }
        self.taken.insert(email, ()).await;
    }

    async fn forget(&self, email: &str) {
        if let Ok(mut filter) = self.filter.write() {
            filter.remove(email);
        }
        self.taken.invalidate(email).await;
    }

    /// Adds a batch under one write lock; `hot` rows also go to the taken set.
    async fn seed(&self, rows: Vec<(String, i64)>) {
        if let Ok(mut filter) = self.filter.write() {
            for (email, _) in &rows {
                filter.add(email);
            }
        }
        for (email, hot) in rows {
            if hot != 0 {
                self.taken.insert(email, ()).await;
            }
        }
    }
}

static INDEX: Lazy<EmailIndex> = Lazy::new(|| EmailIndex::new(FILTER_CAPACITY, TAKEN_CAPACITY));

#[inline]
pub fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn lookup(email: &str) -> Lookup {
    INDEX.lookup(&normalize(email))
}

/// True when no account uses `email`. Falls back to the database only when
/// the in-memory index cannot decide, and caches a positive answer.
pub async fn is_available(pool: &MySqlPool, email: &str) -> Result<bool, sqlx::Error> {
    let email = normalize(email);
    match INDEX.lookup(&email) {
        Lookup::Free => return Ok(true),
        Lookup::Taken => return Ok(false),
        Lookup::Unknown => {}
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        INDEX.taken.insert(email, ()).await;
        return Ok(false);
    }
    Ok(true)
}

/// Records a freshly inserted account.
pub async fn remember(email: &str) {
    INDEX.remember(normalize(email)).await;
}

/// Drops a deleted account so the address can be registered again.
pub async fn forget(email: &str) {
    INDEX.forget(&normalize(email)).await;
}

/// One pass over `users`: every address goes into the filter, and active
/// company members seen within `hot_days` go into the taken set.
pub async fn warmup(pool: &MySqlPool, hot_days: u32, batch_size: usize) -> Result<usize, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT LOWER(TRIM(email)),
               CAST(company_id IS NOT NULL AND is_active = TRUE
                    AND GREATEST(created_at, COALESCE(last_login_at, created_at))
                        >= UTC_TIMESTAMP() - INTERVAL ? DAY AS SIGNED)
        FROM users
        "#,
    )
    .bind(hot_days)
    .fetch(pool);

    let total = in_batches(rows, batch_size, |batch| INDEX.seed(batch)).await?;
    tracing::info!(total, hot_days, "Email index warmed up");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn unseen_addresses_are_free() {
        let index = EmailIndex::new(1_000, 100);
        assert_eq!(index.lookup("nobody@example.invalid"), Lookup::Free);
    }

    #[actix_web::test]
    async fn remembered_addresses_are_taken_until_forgotten() {
        let index = EmailIndex::new(1_000, 100);
        index.remember(normalize(" Ravi@Odoo.in ")).await;
        assert_eq!(index.lookup("ravi@odoo.in"), Lookup::Taken);

        index.forget("ravi@odoo.in").await;
        assert_eq!(index.lookup("ravi@odoo.in"), Lookup::Free);
    }

    #[actix_web::test]
    async fn cold_seeded_rows_need_the_database() {
        let index = EmailIndex::new(1_000, 100);
        index
            .seed(vec![("old@odoo.in".into(), 0), ("new@odoo.in".into(), 1)])
            .await;

        assert_eq!(index.lookup("old@odoo.in"), Lookup::Unknown);
        assert_eq!(index.lookup("new@odoo.in"), Lookup::Taken);
    }

    #[actix_web::test]
    async fn module_level_helpers_normalize() {
        remember("Index.Test@Example.com").await;
        assert_eq!(lookup("index.test@example.com"), Lookup::Taken);
        forget("INDEX.TEST@example.com").await;
        assert_eq!(lookup("index.test@example.com"), Lookup::Free);
    }
}
