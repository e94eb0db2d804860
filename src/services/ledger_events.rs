use crate::{
    domain::{LedgerEntry, MonthlyKpi},
    engine::AggregationEngine,
    error::{EngineError, EngineResult},
    repository::kpi_store::KpiStore,
    services::{assignments::AssignmentResolver, plans::PlanResolver},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerEffect {
    Apply,
    Reverse,
}

pub fn validate_entry(entry: &LedgerEntry) -> EngineResult<()> {
    if entry.amount_cents == 0 {
        return Err(EngineError::InvalidAmount(
            "Ledger entry amount must be a non-zero integer.".to_string(),
        ));
    }
    Ok(())
}

/// Adds or removes the entry's raw contribution. Derived fields are left to
/// the caller.
fn apply_contribution(row: &mut MonthlyKpi, amount_cents: i64, effect: LedgerEffect) {
    let magnitude = amount_cents.saturating_abs();
    match (amount_cents > 0, effect) {
        (true, LedgerEffect::Apply) => row.add_revenue(magnitude),
        (true, LedgerEffect::Reverse) => row.remove_revenue(magnitude),
        (false, LedgerEffect::Apply) => row.add_expense(magnitude),
        (false, LedgerEffect::Reverse) => row.remove_expense(magnitude),
    }
}

impl<S, P, A> AggregationEngine<S, P, A>
where
    S: KpiStore,
    P: PlanResolver,
    A: AssignmentResolver,
{
    /// Fails with `UnassignedProperty` when nobody manages the entry's
    /// property; no row is written in that case.
    pub async fn apply_ledger_entry(&self, entry: &LedgerEntry) -> EngineResult<MonthlyKpi> {
        validate_entry(entry)?;

        let Some(attribution) = self
            .attribute(entry.organization_id, entry.property_id, entry.month())
            .await?
        else {
            return Err(EngineError::UnassignedProperty {
                property_id: entry.property_id,
            });
        };

        let row = self
            .store()
            .update(attribution.key, |row| {
                apply_contribution(row, entry.amount_cents, LedgerEffect::Apply);
                attribution.finish(row);
            })
            .await?;

        tracing::debug!(
            entry_id = %entry.id,
            org_id = %attribution.key.organization_id,
            user_id = %attribution.key.user_id,
            month = %attribution.key.month,
            amount_cents = entry.amount_cents,
            net_revenue_cents = row.net_revenue_cents,
            "Applied ledger entry to KPI"
        );
        Ok(row)
    }

    /// Undoes `apply_ledger_entry` when the entry is deleted. Must receive the
    /// entry exactly as it was recorded. Returns `None` when the property has
    /// since lost its manager, or when the month has no row to reverse from.
    pub async fn reverse_ledger_entry(
        &self,
        entry: &LedgerEntry,
    ) -> EngineResult<Option<MonthlyKpi>> {
        validate_entry(entry)?;

        let Some(attribution) = self
            .attribute(entry.organization_id, entry.property_id, entry.month())
            .await?
        else {
            tracing::warn!(
                entry_id = %entry.id,
                property_id = %entry.property_id,
                "Skipping ledger reversal; property has no assigned manager"
            );
            return Ok(None);
        };

        // A month that never saw a contribution has nothing to undo.
        let Some(row) = self
            .store()
            .update_existing(attribution.key, |row| {
                apply_contribution(row, entry.amount_cents, LedgerEffect::Reverse);
                attribution.finish(row);
            })
            .await?
        else {
            tracing::debug!(
                entry_id = %entry.id,
                month = %attribution.key.month,
                "Skipping ledger reversal; no KPI row for the month"
            );
            return Ok(None);
        };

        tracing::debug!(
            entry_id = %entry.id,
            org_id = %attribution.key.organization_id,
            user_id = %attribution.key.user_id,
            month = %attribution.key.month,
            amount_cents = entry.amount_cents,
            net_revenue_cents = row.net_revenue_cents,
            "Reversed ledger entry from KPI"
        );
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{apply_contribution, validate_entry, LedgerEffect};
    use crate::domain::{KpiKey, LedgerEntry, MonthlyKpi};

    fn entry(amount_cents: i64) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            amount_cents,
            entry_date: NaiveDate::from_ymd_opt(2024, 3, 10).expect("valid date"),
            description: "Cleaning".to_string(),
            category: None,
        }
    }

    fn row() -> MonthlyKpi {
        MonthlyKpi::empty(KpiKey::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"),
        ))
    }

    #[test]
    fn zero_amount_is_rejected() {
        let error = validate_entry(&entry(0)).expect_err("zero amount");
        assert!(error.is_validation());
        assert!(validate_entry(&entry(-1)).is_ok());
    }

    #[test]
    fn sign_selects_revenue_or_expense() {
        let mut row = row();
        apply_contribution(&mut row, 5_000, LedgerEffect::Apply);
        apply_contribution(&mut row, -1_200, LedgerEffect::Apply);
        assert_eq!(row.gross_revenue_cents, 5_000);
        assert_eq!(row.expenses_cents, 1_200);

        apply_contribution(&mut row, -1_200, LedgerEffect::Reverse);
        assert_eq!(row.gross_revenue_cents, 5_000);
        assert_eq!(row.expenses_cents, 0);
    }

    #[test]
    fn reversal_past_zero_clamps() {
        let mut row = row();
        apply_contribution(&mut row, 300, LedgerEffect::Apply);
        apply_contribution(&mut row, 900, LedgerEffect::Reverse);
        apply_contribution(&mut row, -50, LedgerEffect::Reverse);
        assert_eq!(row.gross_revenue_cents, 0);
        assert_eq!(row.expenses_cents, 0);
    }

    #[test]
    fn extreme_expense_does_not_overflow() {
        let mut row = row();
        apply_contribution(&mut row, i64::MIN, LedgerEffect::Apply);
        assert_eq!(row.expenses_cents, i64::MAX);
    }
}
