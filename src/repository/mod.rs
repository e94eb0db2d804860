pub mod kpi_store;
pub mod memory_store;
