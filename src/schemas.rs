use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{Booking, BookingStatus, LedgerEntry},
    error::{EngineError, EngineResult},
    services::booking_events::validate_stay,
};

pub fn validate_input<T: Validate>(input: &T) -> EngineResult<()> {
    input
        .validate()
        .map_err(|errors| EngineError::InvalidInput(format!("Validation failed: {errors}")))
}

/// Ledger entry as submitted by the ledger API.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LedgerEntryInput {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub property_id: Uuid,
    /// Integer minor units; JSON numbers and numeric strings are accepted.
    pub amount_cents: Value,
    pub entry_date: String,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 120))]
    pub category: Option<String>,
}

impl LedgerEntryInput {
    pub fn into_entry(self) -> EngineResult<LedgerEntry> {
        validate_input(&self)?;
        let amount_cents = parse_amount_cents(&self.amount_cents)?;
        let entry_date = parse_date("entry_date", &self.entry_date)?;

        Ok(LedgerEntry {
            id: self.id,
            organization_id: self.organization_id,
            property_id: self.property_id,
            amount_cents,
            entry_date,
            description: self.description.trim().to_string(),
            category: self
                .category
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }
}

/// Booking as submitted by the booking API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookingInput {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub property_id: Uuid,
    pub check_in: String,
    pub check_out: String,
    #[serde(default = "default_booking_status")]
    pub status: String,
}

fn default_booking_status() -> String {
    "upcoming".to_string()
}

impl BookingInput {
    pub fn into_booking(self) -> EngineResult<Booking> {
        let booking = Booking {
            id: self.id,
            organization_id: self.organization_id,
            property_id: self.property_id,
            check_in: parse_date("check_in", &self.check_in)?,
            check_out: parse_date("check_out", &self.check_out)?,
            status: self.status.parse::<BookingStatus>()?,
        };
        validate_stay(&booking)?;
        Ok(booking)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BookingStatusInput {
    pub status: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

impl BookingStatusInput {
    pub fn parse_status(&self) -> EngineResult<BookingStatus> {
        validate_input(self)?;
        self.status.parse()
    }
}

pub fn parse_amount_cents(value: &Value) -> EngineResult<i64> {
    let amount = match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|raw| raw.is_finite() && raw.fract() == 0.0 && raw.abs() < 9.0e15)
                .map(|raw| raw as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };

    match amount {
        Some(0) | None => Err(EngineError::InvalidAmount(format!(
            "amount_cents must be a non-zero integer, got {value}."
        ))),
        Some(cents) => Ok(cents),
    }
}

pub fn parse_date(field: &str, value: &str) -> EngineResult<NaiveDate> {
    let trimmed = value.trim();
    parse_calendar_date(trimmed)
        .ok_or_else(|| EngineError::InvalidDate(format!("Invalid {field} '{trimmed}'.")))
}

/// Plain dates, RFC 3339 timestamps, or naive timestamps; only the calendar
/// date is kept.
fn parse_calendar_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|timestamp| timestamp.date())
}
