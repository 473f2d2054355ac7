use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

pub mod queries;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Creates the `trips`, `users`, `zones` and `user_targets` tables when they
/// do not exist yet.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(queries::CREATE_USERS_TABLE).execute(pool).await?;
    sqlx::query(queries::CREATE_TRIPS_TABLE).execute(pool).await?;
    sqlx::query(queries::CREATE_ZONES_TABLE).execute(pool).await?;
    sqlx::query(queries::CREATE_USER_TARGETS_TABLE).execute(pool).await?;
    Ok(())
}
