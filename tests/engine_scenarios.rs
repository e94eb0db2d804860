use std::sync::Arc;

use chrono::NaiveDate;
use kpi_engine::{
    domain::days_in_month,
    repository::{kpi_store::KpiStore, memory_store::InMemoryKpiStore},
    services::{assignments::InMemoryAssignments, plans::InMemoryPlans},
    AggregationEngine, Booking, BookingStatus, EngineError, KpiKey, LedgerEntry, MonthlyKpi, Plan,
};
use uuid::Uuid;

type TestEngine = AggregationEngine<InMemoryKpiStore, InMemoryPlans, InMemoryAssignments>;

struct Fixture {
    engine: Arc<TestEngine>,
    org: Uuid,
    manager: Uuid,
    property: Uuid,
}

impl Fixture {
    async fn new() -> Self {
        let engine = AggregationEngine::new(
            InMemoryKpiStore::new(),
            InMemoryPlans::new(12.0),
            InMemoryAssignments::new(),
        );
        let org = Uuid::new_v4();
        let manager = Uuid::new_v4();
        let property = Uuid::new_v4();
        engine.assignments().assign(org, property, manager).await;

        Self {
            engine: Arc::new(engine),
            org,
            manager,
            property,
        }
    }

    fn entry(&self, amount_cents: i64, entry_date: &str) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            organization_id: self.org,
            property_id: self.property,
            amount_cents,
            entry_date: date(entry_date),
            description: "test entry".to_string(),
            category: None,
        }
    }

    fn booking(&self, check_in: &str, check_out: &str, status: BookingStatus) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            organization_id: self.org,
            property_id: self.property,
            check_in: date(check_in),
            check_out: date(check_out),
            status,
        }
    }

    async fn row(&self, month: &str) -> Option<MonthlyKpi> {
        self.engine
            .monthly_kpi(self.org, self.manager, date(month))
            .await
            .expect("read succeeds")
    }
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

fn assert_invariants(row: &MonthlyKpi, fee_percent: f64) {
    let fee = (row.gross_revenue_cents as f64 * fee_percent / 100.0).floor() as i64;
    assert_eq!(
        row.net_revenue_cents,
        row.gross_revenue_cents - row.expenses_cents - fee
    );
    assert!(row.gross_revenue_cents >= 0);
    assert!(row.expenses_cents >= 0);
    assert!(row.nights_booked >= 0);
    assert!((row.occupancy_rate + row.vacancy_rate - 1.0).abs() < 1e-9);
    let expected_occupancy = row.nights_booked as f64 / days_in_month(row.month) as f64;
    assert!((row.occupancy_rate - expected_occupancy).abs() < 1e-9);
}

#[tokio::test]
async fn march_walkthrough_applies_and_reverses_every_event() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;

    // Completed four-night stay.
    let mut booking = fixture.booking("2024-03-01", "2024-03-05", BookingStatus::Upcoming);
    engine
        .on_status_transition(&booking, BookingStatus::Upcoming, BookingStatus::Completed)
        .await
        .expect("transition succeeds");
    booking.status = BookingStatus::Completed;

    let row = fixture.row("2024-03-01").await.expect("row created");
    assert_eq!(row.nights_booked, 4);
    assert!((row.occupancy_rate - 4.0 / 31.0).abs() < 1e-9);
    assert!((row.vacancy_rate - 27.0 / 31.0).abs() < 1e-9);
    assert_eq!(row.properties, 1);
    assert_invariants(&row, 12.0);

    // Revenue on the default 12% plan.
    let entry = fixture.entry(50_000, "2024-03-10");
    let row = engine.apply_ledger_entry(&entry).await.expect("apply succeeds");
    assert_eq!(row.gross_revenue_cents, 50_000);
    assert_eq!(row.expenses_cents, 0);
    assert_eq!(row.net_revenue_cents, 44_000);
    assert_invariants(&row, 12.0);

    // Deleting the entry.
    let row = engine
        .reverse_ledger_entry(&entry)
        .await
        .expect("reverse succeeds")
        .expect("row written");
    assert_eq!(row.gross_revenue_cents, 0);
    assert_eq!(row.net_revenue_cents, 0);
    assert_eq!(row.nights_booked, 4);

    // Deleting the booking while still completed.
    let row = engine
        .on_booking_deleted(&booking)
        .await
        .expect("delete succeeds")
        .expect("row written");
    assert_eq!(row.nights_booked, 0);
    assert_eq!(row.occupancy_rate, 0.0);
    assert_eq!(row.vacancy_rate, 1.0);

    // The row survives as history.
    assert!(fixture.row("2024-03-01").await.is_some());
}

#[tokio::test]
async fn ledger_entry_on_unassigned_property_fails_without_writing() {
    let fixture = Fixture::new().await;
    let mut entry = fixture.entry(50_000, "2024-03-10");
    entry.property_id = Uuid::new_v4();

    let error = fixture
        .engine
        .apply_ledger_entry(&entry)
        .await
        .expect_err("unassigned property");
    assert!(matches!(
        error,
        EngineError::UnassignedProperty { property_id } if property_id == entry.property_id
    ));
    assert_eq!(fixture.engine.store().row_count().await, 0);
}

#[tokio::test]
async fn booking_on_unassigned_property_is_skipped_silently() {
    let fixture = Fixture::new().await;
    let mut booking = fixture.booking("2024-03-01", "2024-03-05", BookingStatus::Upcoming);
    booking.property_id = Uuid::new_v4();

    let written = fixture
        .engine
        .on_status_transition(&booking, BookingStatus::Upcoming, BookingStatus::Completed)
        .await
        .expect("skip is not an error");
    assert!(written.is_none());
    assert_eq!(fixture.engine.store().row_count().await, 0);
}

#[tokio::test]
async fn reversal_restores_the_exact_previous_totals() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;

    engine
        .apply_ledger_entry(&fixture.entry(12_345, "2024-06-02"))
        .await
        .expect("seed revenue");
    engine
        .apply_ledger_entry(&fixture.entry(-2_000, "2024-06-03"))
        .await
        .expect("seed expense");
    let before = fixture.row("2024-06-01").await.expect("row exists");

    for amount in [777, -333, 1] {
        let entry = fixture.entry(amount, "2024-06-20");
        engine.apply_ledger_entry(&entry).await.expect("apply");
        let after = engine
            .reverse_ledger_entry(&entry)
            .await
            .expect("reverse")
            .expect("row written");
        assert_eq!(after.gross_revenue_cents, before.gross_revenue_cents);
        assert_eq!(after.expenses_cents, before.expenses_cents);
        assert_eq!(after.net_revenue_cents, before.net_revenue_cents);
        assert_invariants(&after, 12.0);
    }
}

#[tokio::test]
async fn reversals_clamp_at_zero() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;

    engine
        .apply_ledger_entry(&fixture.entry(1_000, "2024-07-05"))
        .await
        .expect("apply");
    let row = engine
        .reverse_ledger_entry(&fixture.entry(5_000, "2024-07-06"))
        .await
        .expect("reverse")
        .expect("row written");
    assert_eq!(row.gross_revenue_cents, 0);

    let row = engine
        .reverse_ledger_entry(&fixture.entry(-900, "2024-07-06"))
        .await
        .expect("reverse")
        .expect("row written");
    assert_eq!(row.expenses_cents, 0);

    let stay = fixture.booking("2024-07-10", "2024-07-20", BookingStatus::Completed);
    let row = engine
        .on_booking_deleted(&stay)
        .await
        .expect("delete")
        .expect("row written");
    assert_eq!(row.nights_booked, 0);
    assert_invariants(&row, 12.0);
}

#[tokio::test]
async fn only_completed_boundaries_write_rows() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;
    let booking = fixture.booking("2024-04-28", "2024-05-03", BookingStatus::Upcoming);

    let noop = engine
        .on_status_transition(&booking, BookingStatus::Upcoming, BookingStatus::Cancelled)
        .await
        .expect("no-op");
    assert!(noop.is_none());
    assert_eq!(engine.store().row_count().await, 0);

    engine
        .on_status_transition(&booking, BookingStatus::Cancelled, BookingStatus::Completed)
        .await
        .expect("enter completed");
    // Stays are attributed to the check-in month, April has 30 days.
    let row = fixture.row("2024-04-01").await.expect("april row");
    assert_eq!(row.nights_booked, 5);
    assert!((row.occupancy_rate - 5.0 / 30.0).abs() < 1e-9);
    assert!(fixture.row("2024-05-01").await.is_none());

    let row = engine
        .on_status_transition(&booking, BookingStatus::Completed, BookingStatus::Upcoming)
        .await
        .expect("leave completed")
        .expect("row written");
    assert_eq!(row.nights_booked, 0);
    assert_invariants(&row, 12.0);

    let deleted_upcoming = engine
        .on_booking_deleted(&booking)
        .await
        .expect("delete upcoming");
    assert!(deleted_upcoming.is_none());
}

#[tokio::test]
async fn same_day_booking_contributes_nothing() {
    let fixture = Fixture::new().await;
    let booking = fixture.booking("2024-03-09", "2024-03-09", BookingStatus::Upcoming);

    let written = fixture
        .engine
        .on_status_transition(&booking, BookingStatus::Upcoming, BookingStatus::Completed)
        .await
        .expect("transition succeeds");
    assert!(written.is_none());
    assert!(fixture.row("2024-03-01").await.is_none());
}

#[tokio::test]
async fn net_revenue_uses_the_plan_in_effect_for_the_month() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;
    engine
        .plans()
        .add_plan(Plan {
            organization_id: fixture.org,
            user_id: fixture.manager,
            percent: 10.0,
            effective_date: date("2024-01-01"),
        })
        .await;
    engine
        .plans()
        .add_plan(Plan {
            organization_id: fixture.org,
            user_id: fixture.manager,
            percent: 15.0,
            effective_date: date("2024-05-01"),
        })
        .await;

    let april = engine
        .apply_ledger_entry(&fixture.entry(10_001, "2024-04-15"))
        .await
        .expect("april");
    let may = engine
        .apply_ledger_entry(&fixture.entry(10_001, "2024-05-15"))
        .await
        .expect("may");
    let december = engine
        .apply_ledger_entry(&fixture.entry(-500, "2023-12-15"))
        .await
        .expect("december");

    assert_eq!(april.net_revenue_cents, 10_001 - 1_000);
    assert_eq!(may.net_revenue_cents, 10_001 - 1_500);
    assert_eq!(december.net_revenue_cents, -500);
    assert_invariants(&april, 10.0);
    assert_invariants(&may, 15.0);
    assert_invariants(&december, 12.0);
}

#[tokio::test]
async fn zero_amount_is_rejected_before_any_write() {
    let fixture = Fixture::new().await;
    let error = fixture
        .engine
        .apply_ledger_entry(&fixture.entry(0, "2024-03-10"))
        .await
        .expect_err("zero amount");
    assert!(matches!(error, EngineError::InvalidAmount(_)));
    assert_eq!(fixture.engine.store().row_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_revenue_on_one_key_sums_without_lost_updates() {
    let fixture = Fixture::new().await;
    let amounts = (1..=200_i64).map(|value| value * 37).collect::<Vec<_>>();

    let mut handles = Vec::new();
    for amount in amounts.iter().copied() {
        let engine = fixture.engine.clone();
        let entry = fixture.entry(amount, "2024-08-14");
        handles.push(tokio::spawn(async move {
            engine.apply_ledger_entry(&entry).await
        }));
    }
    for handle in handles {
        handle.await.expect("task joins").expect("apply succeeds");
    }

    let row = fixture.row("2024-08-01").await.expect("row exists");
    assert_eq!(row.gross_revenue_cents, amounts.iter().sum::<i64>());
    assert_invariants(&row, 12.0);
    assert_eq!(fixture.engine.store().row_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_nights_across_keys_stay_independent() {
    let fixture = Fixture::new().await;
    let other_manager = Uuid::new_v4();
    let other_property = Uuid::new_v4();
    fixture
        .engine
        .assignments()
        .assign(fixture.org, other_property, other_manager)
        .await;

    let mut handles = Vec::new();
    for index in 0..40 {
        let engine = fixture.engine.clone();
        let mut booking = fixture.booking("2024-02-01", "2024-02-03", BookingStatus::Upcoming);
        if index % 2 == 1 {
            booking.property_id = other_property;
        }
        handles.push(tokio::spawn(async move {
            engine
                .on_status_transition(&booking, BookingStatus::Upcoming, BookingStatus::Completed)
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("task joins").expect("transition succeeds");
    }

    let mine = fixture.row("2024-02-01").await.expect("row exists");
    let theirs = fixture
        .engine
        .store()
        .get(KpiKey::new(fixture.org, other_manager, date("2024-02-01")))
        .await
        .expect("read")
        .expect("row exists");
    assert_eq!(mine.nights_booked, 40);
    assert_eq!(theirs.nights_booked, 40);
    // 40 nights over February 2024's 29 days.
    assert!((mine.occupancy_rate - 40.0 / 29.0).abs() < 1e-9);
    assert_invariants(&mine, 12.0);
}

#[tokio::test]
async fn rescheduling_a_completed_booking_moves_its_nights() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;
    let before = fixture.booking("2024-03-28", "2024-04-02", BookingStatus::Completed);
    engine
        .on_status_transition(&before, BookingStatus::Upcoming, BookingStatus::Completed)
        .await
        .expect("enter completed");

    let mut after = before.clone();
    after.check_in = date("2024-04-10");
    after.check_out = date("2024-04-13");
    let written = engine
        .on_booking_rescheduled(&before, &after)
        .await
        .expect("reschedule");
    assert_eq!(written.len(), 2);

    assert_eq!(fixture.row("2024-03-01").await.expect("march").nights_booked, 0);
    assert_eq!(fixture.row("2024-04-01").await.expect("april").nights_booked, 3);

    let unchanged = engine
        .on_booking_rescheduled(&after, &after)
        .await
        .expect("no change");
    assert!(unchanged.is_empty());

    let mut stranger = after.clone();
    stranger.id = Uuid::new_v4();
    let error = engine
        .on_booking_rescheduled(&after, &stranger)
        .await
        .expect_err("different booking");
    assert!(error.is_validation());
}

#[tokio::test]
async fn history_lists_only_touched_months() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;
    for entry_date in ["2024-01-15", "2024-03-02", "2024-03-28", "2024-06-30"] {
        engine
            .apply_ledger_entry(&fixture.entry(1_000, entry_date))
            .await
            .expect("apply");
    }

    let history = engine
        .kpi_history(fixture.org, fixture.manager, date("2024-01-20"), date("2024-06-01"))
        .await
        .expect("history");
    let months = history.iter().map(|row| row.month).collect::<Vec<_>>();
    assert_eq!(
        months,
        vec![date("2024-01-01"), date("2024-03-01"), date("2024-06-01")]
    );
    assert_eq!(history[1].gross_revenue_cents, 2_000);
}

#[tokio::test]
async fn reversals_on_an_untouched_month_write_nothing() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;

    let reversed = engine
        .reverse_ledger_entry(&fixture.entry(500, "2024-09-03"))
        .await
        .expect("reverse succeeds");
    assert!(reversed.is_none());
    assert_eq!(engine.store().row_count().await, 0);

    let booking = fixture.booking("2024-10-03", "2024-10-06", BookingStatus::Completed);
    let left = engine
        .on_status_transition(&booking, BookingStatus::Completed, BookingStatus::Cancelled)
        .await
        .expect("transition succeeds");
    assert!(left.is_none());
    let deleted = engine
        .on_booking_deleted(&booking)
        .await
        .expect("delete succeeds");
    assert!(deleted.is_none());
    assert_eq!(engine.store().row_count().await, 0);
}

#[tokio::test]
async fn stay_completed_before_assignment_leaves_no_row_when_cancelled() {
    let fixture = Fixture::new().await;
    let engine = &fixture.engine;
    let late_property = Uuid::new_v4();
    let mut booking = fixture.booking("2024-11-02", "2024-11-09", BookingStatus::Upcoming);
    booking.property_id = late_property;

    let skipped = engine
        .on_status_transition(&booking, BookingStatus::Upcoming, BookingStatus::Completed)
        .await
        .expect("skip is not an error");
    assert!(skipped.is_none());

    engine
        .assignments()
        .assign(fixture.org, late_property, fixture.manager)
        .await;
    let cancelled = engine
        .on_status_transition(&booking, BookingStatus::Completed, BookingStatus::Cancelled)
        .await
        .expect("cancel succeeds");
    assert!(cancelled.is_none());
    assert!(fixture.row("2024-11-01").await.is_none());
    assert_eq!(engine.store().row_count().await, 0);
}
