//! Postgres pool setup and migrations.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use siphon_core::config::PostgresConfig;

pub async fn init_pg_pool(config: &PostgresConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!(
        host = %config.host,
        database = %config.database,
        "postgres pool ready, migrations applied"
    );
    Ok(pool)
}
