use tracing_subscriber::EnvFilter;

/// Installs the compact fmt subscriber used by the host backend.
/// Returns `false` when a global subscriber is already set.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kpi_engine=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}
