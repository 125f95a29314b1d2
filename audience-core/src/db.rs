use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create the append-only observation log if it does not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observations (
            seq         BIGSERIAL,
            id          UUID PRIMARY KEY,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            date        DATE NOT NULL,
            identity    TEXT NOT NULL,
            platform    TEXT NOT NULL,
            account     TEXT NOT NULL,
            followers   BIGINT NOT NULL,
            evolution   BIGINT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS observations_account_identity_idx ON observations (account, identity)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
