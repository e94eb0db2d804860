use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
};

pub async fn connect(config: &EngineConfig) -> EngineResult<PgPool> {
    let Some(url) = config.database_url.as_deref() else {
        return Err(EngineError::Dependency(
            "KPI database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        ));
    };

    PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections.max(1))
        .min_connections(config.db_pool_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
        .connect(url)
        .await
        .map_err(|error| EngineError::Dependency(format!("Could not connect to database: {error}")))
}

pub async fn run_migrations(pool: &PgPool) -> EngineResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|error| EngineError::Dependency(format!("KPI migrations failed: {error}")))?;
    tracing::info!("KPI engine migrations applied");
    Ok(())
}
