use sqlx::MySqlPool;
use sqlx::migrate::Migrator;
use sqlx::mysql::MySqlPoolOptions;

use crate::config::Config;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_db(config: &Config) -> Result<MySqlPool, sqlx::Error> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    if config.run_migrations {
        MIGRATOR.run(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    Ok(pool)
}

/// True when the error is a duplicate-key violation (SQLSTATE 23000 / 1062).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Duplicate-key violation on a specific unique index, e.g. `uq_users_login_id`.
pub fn violates_key(err: &sqlx::Error, key: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation() && db_err.message().contains(key),
        _ => false,
    }
}
