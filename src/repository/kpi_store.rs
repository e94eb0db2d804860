use std::future::Future;

use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    domain::{KpiKey, MonthlyKpi},
    error::{is_retryable, map_db_error, EngineResult},
};

/// Sole writer of monthly KPI rows.
///
/// Both update methods run read, mutate and write as one atomic unit. Two
/// updates targeting the same key never interleave; updates on different keys
/// do not wait on each other. The closure may run more than once when the
/// store retries a conflicted transaction, always against a freshly read row,
/// so it must only apply deltas to the row it is given.
pub trait KpiStore: Send + Sync {
    /// Creates the row on first use.
    fn update<F>(
        &self,
        key: KpiKey,
        mutate: F,
    ) -> impl Future<Output = EngineResult<MonthlyKpi>> + Send
    where
        F: FnMut(&mut MonthlyKpi) + Send;

    /// Leaves the store untouched and returns `None` when the row is missing.
    fn update_existing<F>(
        &self,
        key: KpiKey,
        mutate: F,
    ) -> impl Future<Output = EngineResult<Option<MonthlyKpi>>> + Send
    where
        F: FnMut(&mut MonthlyKpi) + Send;

    fn get(&self, key: KpiKey) -> impl Future<Output = EngineResult<Option<MonthlyKpi>>> + Send;

    /// Rows for one manager with `from <= month <= to`, oldest first.
    fn list(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Future<Output = EngineResult<Vec<MonthlyKpi>>> + Send;
}

const KPI_COLUMNS: &str = "organization_id, user_id, month, gross_revenue_cents, expenses_cents,
     net_revenue_cents, nights_booked, occupancy_rate, vacancy_rate, properties, updated_at";

/// Inserts the zero row if absent, then locks it for the rest of the
/// transaction. Concurrent first writers collapse onto one row.
pub async fn read_or_create(conn: &mut PgConnection, key: KpiKey) -> Result<MonthlyKpi, sqlx::Error> {
    sqlx::query(
        "INSERT INTO kpi_monthly (organization_id, user_id, month)
         VALUES ($1, $2, $3)
         ON CONFLICT (organization_id, user_id, month) DO NOTHING",
    )
    .bind(key.organization_id)
    .bind(key.user_id)
    .bind(key.month)
    .execute(&mut *conn)
    .await?;

    read_for_update(conn, key)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn read_for_update(
    conn: &mut PgConnection,
    key: KpiKey,
) -> Result<Option<MonthlyKpi>, sqlx::Error> {
    sqlx::query_as::<_, MonthlyKpi>(&format!(
        "SELECT {KPI_COLUMNS}
         FROM kpi_monthly
         WHERE organization_id = $1 AND user_id = $2 AND month = $3
         FOR UPDATE"
    ))
    .bind(key.organization_id)
    .bind(key.user_id)
    .bind(key.month)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn write(conn: &mut PgConnection, row: &MonthlyKpi) -> Result<MonthlyKpi, sqlx::Error> {
    sqlx::query_as::<_, MonthlyKpi>(&format!(
        "UPDATE kpi_monthly
         SET gross_revenue_cents = $4,
             expenses_cents = $5,
             net_revenue_cents = $6,
             nights_booked = $7,
             occupancy_rate = $8,
             vacancy_rate = $9,
             properties = $10,
             updated_at = now()
         WHERE organization_id = $1 AND user_id = $2 AND month = $3
         RETURNING {KPI_COLUMNS}"
    ))
    .bind(row.organization_id)
    .bind(row.user_id)
    .bind(row.month)
    .bind(row.gross_revenue_cents)
    .bind(row.expenses_cents)
    .bind(row.net_revenue_cents)
    .bind(row.nights_booked)
    .bind(row.occupancy_rate)
    .bind(row.vacancy_rate)
    .bind(row.properties)
    .fetch_one(&mut *conn)
    .await
}

#[derive(Debug, Clone)]
pub struct PgKpiStore {
    pool: PgPool,
    lock_timeout_ms: u64,
    max_attempts: u32,
}

impl PgKpiStore {
    pub fn new(pool: PgPool, config: &EngineConfig) -> Self {
        Self {
            pool,
            lock_timeout_ms: config.kpi_lock_timeout_ms,
            max_attempts: config.kpi_max_tx_attempts.max(1),
        }
    }

    async fn locked_update<F>(
        &self,
        key: KpiKey,
        create: bool,
        mutate: &mut F,
    ) -> EngineResult<Option<MonthlyKpi>>
    where
        F: FnMut(&mut MonthlyKpi) + Send,
    {
        let mut attempt = 1;
        loop {
            match self.try_locked_update(key, create, mutate).await {
                Ok(row) => return Ok(row),
                Err(error) if is_retryable(&error) && attempt < self.max_attempts => {
                    tracing::warn!(
                        org_id = %key.organization_id,
                        user_id = %key.user_id,
                        month = %key.month,
                        attempt,
                        "Retrying KPI transaction after write conflict"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(map_db_error(error)),
            }
        }
    }

    async fn try_locked_update<F>(
        &self,
        key: KpiKey,
        create: bool,
        mutate: &mut F,
    ) -> Result<Option<MonthlyKpi>, sqlx::Error>
    where
        F: FnMut(&mut MonthlyKpi) + Send,
    {
        // Dropping the transaction without commit rolls it back.
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;

        let current = if create {
            Some(read_or_create(&mut *tx, key).await?)
        } else {
            read_for_update(&mut *tx, key).await?
        };
        let Some(mut row) = current else {
            tx.rollback().await?;
            return Ok(None);
        };

        mutate(&mut row);
        let written = write(&mut *tx, &row).await?;
        tx.commit().await?;
        Ok(Some(written))
    }
}

impl KpiStore for PgKpiStore {
    async fn update<F>(&self, key: KpiKey, mut mutate: F) -> EngineResult<MonthlyKpi>
    where
        F: FnMut(&mut MonthlyKpi) + Send,
    {
        self.locked_update(key, true, &mut mutate)
            .await?
            .ok_or_else(|| map_db_error(sqlx::Error::RowNotFound))
    }

    async fn update_existing<F>(&self, key: KpiKey, mut mutate: F) -> EngineResult<Option<MonthlyKpi>>
    where
        F: FnMut(&mut MonthlyKpi) + Send,
    {
        self.locked_update(key, false, &mut mutate).await
    }

    async fn get(&self, key: KpiKey) -> EngineResult<Option<MonthlyKpi>> {
        sqlx::query_as::<_, MonthlyKpi>(&format!(
            "SELECT {KPI_COLUMNS}
             FROM kpi_monthly
             WHERE organization_id = $1 AND user_id = $2 AND month = $3"
        ))
        .bind(key.organization_id)
        .bind(key.user_id)
        .bind(key.month)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn list(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<MonthlyKpi>> {
        sqlx::query_as::<_, MonthlyKpi>(&format!(
            "SELECT {KPI_COLUMNS}
             FROM kpi_monthly
             WHERE organization_id = $1 AND user_id = $2 AND month BETWEEN $3 AND $4
             ORDER BY month ASC
             LIMIT 600"
        ))
        .bind(organization_id)
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)
    }
}
