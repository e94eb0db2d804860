use std::collections::HashMap;
use std::future::Future;

use chrono::NaiveDate;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    domain::{month_start, Plan},
    error::{map_db_error, EngineResult},
};

/// Commission percent in effect for a manager in a given month.
pub trait PlanResolver: Send + Sync {
    fn resolve_fee_percent(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        month: NaiveDate,
    ) -> impl Future<Output = EngineResult<f64>> + Send;
}

/// Plans for one (organization, manager), ordered by effective date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanSchedule {
    entries: Vec<(NaiveDate, f64)>,
}

impl PlanSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Among plans sharing an effective date the one inserted last wins.
    pub fn insert(&mut self, effective_date: NaiveDate, percent: f64) {
        let index = self
            .entries
            .partition_point(|(date, _)| *date <= effective_date);
        self.entries.insert(index, (effective_date, percent));
    }

    pub fn percent_at(&self, month: NaiveDate) -> Option<f64> {
        let index = self.entries.partition_point(|(date, _)| *date <= month);
        index
            .checked_sub(1)
            .and_then(|last| self.entries.get(last))
            .map(|(_, percent)| *percent)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(NaiveDate, f64)> for PlanSchedule {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, f64)>>(iter: I) -> Self {
        let mut schedule = Self::new();
        for (effective_date, percent) in iter {
            schedule.insert(effective_date, percent);
        }
        schedule
    }
}

#[derive(Debug)]
pub struct InMemoryPlans {
    default_percent: f64,
    schedules: RwLock<HashMap<(Uuid, Uuid), PlanSchedule>>,
}

impl InMemoryPlans {
    pub fn new(default_percent: f64) -> Self {
        Self {
            default_percent,
            schedules: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_plan(&self, plan: Plan) {
        let mut schedules = self.schedules.write().await;
        schedules
            .entry((plan.organization_id, plan.user_id))
            .or_default()
            .insert(plan.effective_date, plan.percent);
    }
}

impl PlanResolver for InMemoryPlans {
    async fn resolve_fee_percent(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        month: NaiveDate,
    ) -> EngineResult<f64> {
        let schedules = self.schedules.read().await;
        Ok(schedules
            .get(&(organization_id, user_id))
            .and_then(|schedule| schedule.percent_at(month_start(month)))
            .unwrap_or(self.default_percent))
    }
}

#[derive(Debug, Clone)]
pub struct PgPlanResolver {
    pool: PgPool,
    default_percent: f64,
}

impl PgPlanResolver {
    pub fn new(pool: PgPool, default_percent: f64) -> Self {
        Self {
            pool,
            default_percent,
        }
    }

    pub async fn load_schedule(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> EngineResult<PlanSchedule> {
        let rows = sqlx::query_as::<_, (NaiveDate, f64)>(
            "SELECT effective_date, percent
             FROM manager_plans
             WHERE organization_id = $1 AND user_id = $2
             ORDER BY effective_date ASC, created_at ASC",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(rows.into_iter().collect())
    }
}

impl PlanResolver for PgPlanResolver {
    async fn resolve_fee_percent(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        month: NaiveDate,
    ) -> EngineResult<f64> {
        let schedule = self.load_schedule(organization_id, user_id).await?;
        Ok(schedule
            .percent_at(month_start(month))
            .unwrap_or(self.default_percent))
    }
}
