use std::env;

pub const DEFAULT_FEE_PERCENT: f64 = 12.0;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub default_fee_percent: f64,
    pub kpi_lock_timeout_ms: u64,
    pub kpi_max_tx_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_pool_max_connections: 5,
            db_pool_min_connections: 1,
            db_pool_acquire_timeout_seconds: 5,
            db_pool_idle_timeout_seconds: 600,
            default_fee_percent: DEFAULT_FEE_PERCENT,
            kpi_lock_timeout_ms: 5000,
            kpi_max_tx_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_opt("SUPABASE_DB_URL").or_else(|| env_opt("DATABASE_URL")),
            db_pool_max_connections: env_parse_or(
                "DB_POOL_MAX_CONNECTIONS",
                defaults.db_pool_max_connections,
            ),
            db_pool_min_connections: env_parse_or(
                "DB_POOL_MIN_CONNECTIONS",
                defaults.db_pool_min_connections,
            ),
            db_pool_acquire_timeout_seconds: env_parse_or(
                "DB_POOL_ACQUIRE_TIMEOUT_SECONDS",
                defaults.db_pool_acquire_timeout_seconds,
            ),
            db_pool_idle_timeout_seconds: env_parse_or(
                "DB_POOL_IDLE_TIMEOUT_SECONDS",
                defaults.db_pool_idle_timeout_seconds,
            ),
            default_fee_percent: sanitize_percent(env_parse_or(
                "KPI_DEFAULT_FEE_PERCENT",
                defaults.default_fee_percent,
            )),
            kpi_lock_timeout_ms: env_parse_or("KPI_LOCK_TIMEOUT_MS", defaults.kpi_lock_timeout_ms)
                .max(1),
            kpi_max_tx_attempts: env_parse_or("KPI_MAX_TX_ATTEMPTS", defaults.kpi_max_tx_attempts)
                .clamp(1, 10),
        }
    }
}

fn sanitize_percent(value: f64) -> f64 {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        value
    } else {
        DEFAULT_FEE_PERCENT
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}
