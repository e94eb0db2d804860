use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    domain::{month_start, KpiKey, MonthlyKpi},
    error::EngineResult,
    repository::kpi_store::KpiStore,
    services::{assignments::AssignmentResolver, plans::PlanResolver},
};

/// Keeps monthly KPI rows in step with ledger and booking events.
///
/// Every event resolves the responsible manager and the plan in effect, then
/// performs exactly one atomic read-modify-write through the store. The
/// ledger operations live in `services::ledger_events`, the booking ones in
/// `services::booking_events`.
#[derive(Debug)]
pub struct AggregationEngine<S, P, A> {
    store: S,
    plans: P,
    assignments: A,
}

/// Where an event lands and the values needed to keep derived fields honest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Attribution {
    pub key: KpiKey,
    pub fee_percent: f64,
    pub properties: i64,
}

impl Attribution {
    /// Refreshes every derived field after the caller adjusted the raw totals.
    pub fn finish(&self, row: &mut MonthlyKpi) {
        row.properties = self.properties;
        row.recompute_net_revenue(self.fee_percent);
        row.recompute_occupancy();
    }
}

impl<S, P, A> AggregationEngine<S, P, A>
where
    S: KpiStore,
    P: PlanResolver,
    A: AssignmentResolver,
{
    pub fn new(store: S, plans: P, assignments: A) -> Self {
        Self {
            store,
            plans,
            assignments,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn plans(&self) -> &P {
        &self.plans
    }

    pub fn assignments(&self) -> &A {
        &self.assignments
    }

    /// `None` when nobody manages the property.
    pub(crate) async fn attribute(
        &self,
        organization_id: Uuid,
        property_id: Uuid,
        month: NaiveDate,
    ) -> EngineResult<Option<Attribution>> {
        let Some(user_id) = self.assignments.resolve_manager(property_id).await? else {
            return Ok(None);
        };
        let key = KpiKey::new(organization_id, user_id, month);
        let fee_percent = self
            .plans
            .resolve_fee_percent(organization_id, user_id, key.month)
            .await?;
        let properties = self
            .assignments
            .count_properties(organization_id, user_id)
            .await?;

        Ok(Some(Attribution {
            key,
            fee_percent,
            properties,
        }))
    }

    pub async fn monthly_kpi(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        month: NaiveDate,
    ) -> EngineResult<Option<MonthlyKpi>> {
        self.store
            .get(KpiKey::new(organization_id, user_id, month))
            .await
    }

    /// Stored rows between the months containing `from` and `to`, inclusive.
    pub async fn kpi_history(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<MonthlyKpi>> {
        let (from, to) = (month_start(from), month_start(to));
        if from > to {
            return Ok(Vec::new());
        }
        self.store.list(organization_id, user_id, from, to).await
    }

    /// Re-derives `net_revenue` with the plan now in effect, for use after a
    /// plan was added with an effective date in the past. Never creates rows.
    pub async fn refresh_net_revenue(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        month: NaiveDate,
    ) -> EngineResult<Option<MonthlyKpi>> {
        let key = KpiKey::new(organization_id, user_id, month);
        let fee_percent = self
            .plans
            .resolve_fee_percent(organization_id, user_id, key.month)
            .await?;

        let refreshed = self
            .store
            .update_existing(key, |row| row.recompute_net_revenue(fee_percent))
            .await?;

        if let Some(row) = &refreshed {
            tracing::debug!(
                org_id = %organization_id,
                user_id = %user_id,
                month = %key.month,
                fee_percent,
                net_revenue_cents = row.net_revenue_cents,
                "Refreshed KPI net revenue"
            );
        }
        Ok(refreshed)
    }
}
