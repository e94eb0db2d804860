use crate::{
    domain::{Booking, BookingStatus, MonthlyKpi},
    engine::AggregationEngine,
    error::{EngineError, EngineResult},
    repository::kpi_store::KpiStore,
    services::{assignments::AssignmentResolver, plans::PlanResolver},
};

/// How a status change moves the booked-nights total. Only entering or
/// leaving `completed` matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NightsChange {
    Add,
    Remove,
}

impl NightsChange {
    pub fn for_transition(old: BookingStatus, new: BookingStatus) -> Option<Self> {
        match (old.is_completed(), new.is_completed()) {
            (false, true) => Some(Self::Add),
            (true, false) => Some(Self::Remove),
            _ => None,
        }
    }

    fn apply(self, row: &mut MonthlyKpi, nights: i64) {
        match self {
            Self::Add => row.add_nights(nights),
            Self::Remove => row.remove_nights(nights),
        }
    }
}

pub fn validate_stay(booking: &Booking) -> EngineResult<()> {
    if booking.check_out < booking.check_in {
        return Err(EngineError::InvalidStay(format!(
            "Booking {} checks out ({}) before it checks in ({}).",
            booking.id, booking.check_out, booking.check_in
        )));
    }
    Ok(())
}

impl<S, P, A> AggregationEngine<S, P, A>
where
    S: KpiStore,
    P: PlanResolver,
    A: AssignmentResolver,
{
    /// Never fails because of a missing assignment: the KPI side effect is
    /// skipped instead. Returns the written row, or `None` when nothing changed.
    pub async fn on_status_transition(
        &self,
        booking: &Booking,
        old_status: BookingStatus,
        new_status: BookingStatus,
    ) -> EngineResult<Option<MonthlyKpi>> {
        validate_stay(booking)?;
        let Some(change) = NightsChange::for_transition(old_status, new_status) else {
            return Ok(None);
        };
        self.apply_stay(booking, change).await
    }

    /// Call before the booking row is removed, with its status at that moment.
    pub async fn on_booking_deleted(&self, booking: &Booking) -> EngineResult<Option<MonthlyKpi>> {
        validate_stay(booking)?;
        if !booking.status.is_completed() {
            return Ok(None);
        }
        self.apply_stay(booking, NightsChange::Remove).await
    }

    /// Moves the contribution of a completed booking whose dates or property
    /// changed. Each side is its own atomic unit; the old stay is removed first.
    pub async fn on_booking_rescheduled(
        &self,
        before: &Booking,
        after: &Booking,
    ) -> EngineResult<Vec<MonthlyKpi>> {
        if before.id != after.id {
            return Err(EngineError::InvalidStay(format!(
                "Cannot reschedule booking {} into booking {}.",
                before.id, after.id
            )));
        }
        validate_stay(before)?;
        validate_stay(after)?;

        let unchanged = before.status == after.status
            && before.organization_id == after.organization_id
            && before.property_id == after.property_id
            && before.month() == after.month()
            && before.nights() == after.nights();
        if unchanged {
            return Ok(Vec::new());
        }

        let mut written = Vec::new();
        if before.status.is_completed() {
            written.extend(self.apply_stay(before, NightsChange::Remove).await?);
        }
        if after.status.is_completed() {
            written.extend(self.apply_stay(after, NightsChange::Add).await?);
        }
        Ok(written)
    }

    async fn apply_stay(
        &self,
        booking: &Booking,
        change: NightsChange,
    ) -> EngineResult<Option<MonthlyKpi>> {
        let nights = booking.nights();
        if nights == 0 {
            return Ok(None);
        }

        let Some(attribution) = self
            .attribute(booking.organization_id, booking.property_id, booking.month())
            .await?
        else {
            tracing::warn!(
                booking_id = %booking.id,
                property_id = %booking.property_id,
                ?change,
                "Skipping booking KPI update; property has no assigned manager"
            );
            return Ok(None);
        };

        let mutate = |row: &mut MonthlyKpi| {
            change.apply(row, nights);
            attribution.finish(row);
        };
        let written = match change {
            NightsChange::Add => Some(self.store().update(attribution.key, mutate).await?),
            NightsChange::Remove => self.store().update_existing(attribution.key, mutate).await?,
        };
        let Some(row) = written else {
            tracing::debug!(
                booking_id = %booking.id,
                month = %attribution.key.month,
                "Skipping nights removal; no KPI row for the month"
            );
            return Ok(None);
        };

        tracing::debug!(
            booking_id = %booking.id,
            org_id = %attribution.key.organization_id,
            user_id = %attribution.key.user_id,
            month = %attribution.key.month,
            nights,
            ?change,
            nights_booked = row.nights_booked,
            occupancy_rate = row.occupancy_rate,
            "Applied booking nights to KPI"
        );
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{validate_stay, NightsChange};
    use crate::domain::{Booking, BookingStatus};

    #[test]
    fn only_completed_boundaries_move_nights() {
        use BookingStatus::{Cancelled, Completed, Upcoming};

        assert_eq!(
            NightsChange::for_transition(Upcoming, Completed),
            Some(NightsChange::Add)
        );
        assert_eq!(
            NightsChange::for_transition(Cancelled, Completed),
            Some(NightsChange::Add)
        );
        assert_eq!(
            NightsChange::for_transition(Completed, Upcoming),
            Some(NightsChange::Remove)
        );
        assert_eq!(
            NightsChange::for_transition(Completed, Cancelled),
            Some(NightsChange::Remove)
        );
        assert_eq!(NightsChange::for_transition(Upcoming, Cancelled), None);
        assert_eq!(NightsChange::for_transition(Cancelled, Upcoming), None);
        assert_eq!(NightsChange::for_transition(Completed, Completed), None);
    }

    #[test]
    fn inverted_stay_is_rejected() {
        let booking = Booking {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            check_in: NaiveDate::from_ymd_opt(2024, 3, 5).expect("valid date"),
            check_out: NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"),
            status: BookingStatus::Upcoming,
        };
        let error = validate_stay(&booking).expect_err("inverted stay");
        assert!(error.is_validation());
    }
}
