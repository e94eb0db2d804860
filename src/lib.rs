//! KPI aggregation for the property-management portal.
//!
//! Keeps one row per (organization, manager, month) in step with ledger
//! entries and booking status changes. Collaborators call into
//! [`AggregationEngine`]; storage and lookups are injected at construction.

pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod repository;
pub mod schemas;
pub mod services;
pub mod telemetry;

pub use config::EngineConfig;
pub use domain::{Booking, BookingStatus, KpiKey, LedgerEntry, MonthlyKpi, Plan};
pub use engine::AggregationEngine;
pub use error::{EngineError, EngineResult};

use repository::kpi_store::PgKpiStore;
use services::{assignments::PgAssignmentResolver, plans::PgPlanResolver};

pub type PgAggregationEngine = AggregationEngine<PgKpiStore, PgPlanResolver, PgAssignmentResolver>;

/// Builds the Postgres-backed engine from configuration.
pub async fn connect_engine(config: &EngineConfig) -> EngineResult<PgAggregationEngine> {
    let pool = db::connect(config).await?;
    Ok(AggregationEngine::new(
        PgKpiStore::new(pool.clone(), config),
        PgPlanResolver::new(pool.clone(), config.default_fee_percent),
        PgAssignmentResolver::new(pool),
    ))
}
