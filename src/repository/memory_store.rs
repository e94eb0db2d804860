use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::{
    domain::{KpiKey, MonthlyKpi},
    error::EngineResult,
    repository::kpi_store::KpiStore,
};

type Slot = Arc<tokio::sync::Mutex<Option<MonthlyKpi>>>;

/// Process-local KPI store with one lock per key.
///
/// The outer map lock is only held long enough to find or create a slot, so
/// writers on different keys proceed in parallel.
#[derive(Debug, Default)]
pub struct InMemoryKpiStore {
    slots: Mutex<HashMap<KpiKey, Slot>>,
}

impl InMemoryKpiStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: KpiKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key).or_default().clone()
    }

    fn existing_slot(&self, key: KpiKey) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&key).cloned()
    }

    fn all_slots(&self) -> Vec<(KpiKey, Slot)> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .map(|(key, slot)| (*key, slot.clone()))
            .collect()
    }

    pub async fn row_count(&self) -> usize {
        let mut count = 0;
        for (_, slot) in self.all_slots() {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }
}

impl KpiStore for InMemoryKpiStore {
    async fn update<F>(&self, key: KpiKey, mut mutate: F) -> EngineResult<MonthlyKpi>
    where
        F: FnMut(&mut MonthlyKpi) + Send,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let mut row = guard.clone().unwrap_or_else(|| MonthlyKpi::empty(key));
        mutate(&mut row);
        row.updated_at = Utc::now();
        *guard = Some(row.clone());
        Ok(row)
    }

    async fn update_existing<F>(&self, key: KpiKey, mut mutate: F) -> EngineResult<Option<MonthlyKpi>>
    where
        F: FnMut(&mut MonthlyKpi) + Send,
    {
        let Some(slot) = self.existing_slot(key) else {
            return Ok(None);
        };
        let mut guard = slot.lock().await;
        let Some(mut row) = guard.clone() else {
            return Ok(None);
        };
        mutate(&mut row);
        row.updated_at = Utc::now();
        *guard = Some(row.clone());
        Ok(Some(row))
    }

    async fn get(&self, key: KpiKey) -> EngineResult<Option<MonthlyKpi>> {
        let Some(slot) = self.existing_slot(key) else {
            return Ok(None);
        };
        let row = slot.lock().await.clone();
        Ok(row)
    }

    async fn list(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<MonthlyKpi>> {
        let mut rows = Vec::new();
        for (key, slot) in self.all_slots() {
            if key.organization_id != organization_id
                || key.user_id != user_id
                || key.month < from
                || key.month > to
            {
                continue;
            }
            if let Some(row) = slot.lock().await.clone() {
                rows.push(row);
            }
        }
        rows.sort_by_key(|row| row.month);
        Ok(rows)
    }
}
