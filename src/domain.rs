use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub property_id: Uuid,
    /// Minor currency units. Positive is revenue, negative is expense.
    pub amount_cents: i64,
    pub entry_date: NaiveDate,
    pub description: String,
    pub category: Option<String>,
}

impl LedgerEntry {
    pub fn is_revenue(&self) -> bool {
        self.amount_cents > 0
    }

    pub fn month(&self) -> NaiveDate {
        month_start(self.entry_date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Upcoming,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "upcoming" => Ok(Self::Upcoming),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EngineError::InvalidStatus(format!(
                "Unknown booking status '{other}'."
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub property_id: Uuid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub status: BookingStatus,
}

impl Booking {
    /// Calendar nights between check-in and check-out, never negative.
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days().max(0)
    }

    /// Stays are attributed entirely to the month they start in.
    pub fn month(&self) -> NaiveDate {
        month_start(self.check_in)
    }
}

/// Time-effective commission record for one manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub percent: f64,
    pub effective_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KpiKey {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub month: NaiveDate,
}

impl KpiKey {
    pub fn new(organization_id: Uuid, user_id: Uuid, month: NaiveDate) -> Self {
        Self {
            organization_id,
            user_id,
            month: month_start(month),
        }
    }
}

/// Monthly aggregate for one (organization, manager) pair.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MonthlyKpi {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub month: NaiveDate,
    pub gross_revenue_cents: i64,
    pub expenses_cents: i64,
    pub net_revenue_cents: i64,
    pub nights_booked: i64,
    pub occupancy_rate: f64,
    pub vacancy_rate: f64,
    pub properties: i64,
    pub updated_at: DateTime<Utc>,
}

impl MonthlyKpi {
    pub fn empty(key: KpiKey) -> Self {
        Self {
            organization_id: key.organization_id,
            user_id: key.user_id,
            month: key.month,
            gross_revenue_cents: 0,
            expenses_cents: 0,
            net_revenue_cents: 0,
            nights_booked: 0,
            occupancy_rate: 0.0,
            vacancy_rate: 1.0,
            properties: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> KpiKey {
        KpiKey {
            organization_id: self.organization_id,
            user_id: self.user_id,
            month: self.month,
        }
    }

    pub fn add_revenue(&mut self, cents: i64) {
        self.gross_revenue_cents = self.gross_revenue_cents.saturating_add(cents);
    }

    pub fn remove_revenue(&mut self, cents: i64) {
        self.gross_revenue_cents = self.gross_revenue_cents.saturating_sub(cents).max(0);
    }

    pub fn add_expense(&mut self, cents: i64) {
        self.expenses_cents = self.expenses_cents.saturating_add(cents);
    }

    pub fn remove_expense(&mut self, cents: i64) {
        self.expenses_cents = self.expenses_cents.saturating_sub(cents).max(0);
    }

    pub fn add_nights(&mut self, nights: i64) {
        self.nights_booked = self.nights_booked.saturating_add(nights);
    }

    pub fn remove_nights(&mut self, nights: i64) {
        self.nights_booked = self.nights_booked.saturating_sub(nights).max(0);
    }

    pub fn recompute_net_revenue(&mut self, fee_percent: f64) {
        self.net_revenue_cents = net_revenue(
            self.gross_revenue_cents,
            self.expenses_cents,
            fee_percent,
        );
    }

    pub fn recompute_occupancy(&mut self) {
        let days = days_in_month(self.month) as f64;
        self.occupancy_rate = self.nights_booked as f64 / days;
        self.vacancy_rate = 1.0 - self.occupancy_rate;
    }
}

pub fn management_fee(gross_revenue_cents: i64, fee_percent: f64) -> i64 {
    (gross_revenue_cents as f64 * fee_percent / 100.0).floor() as i64
}

pub fn net_revenue(gross_revenue_cents: i64, expenses_cents: i64, fee_percent: f64) -> i64 {
    gross_revenue_cents - expenses_cents - management_fee(gross_revenue_cents, fee_percent)
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn days_in_month(month: NaiveDate) -> u32 {
    let start = month_start(month);
    start
        .checked_add_months(Months::new(1))
        .map(|next| (next - start).num_days() as u32)
        .unwrap_or(31)
}
