pub mod assignments;
pub mod booking_events;
pub mod ledger_events;
pub mod plans;
