//! Subscription ETL Library
//!
//! Harvests extract attachments from a mailbox, reconciles the customer,
//! service, order and active-subscription extracts into the `active_final`
//! and `order_final` tables, and appends them to the warehouse.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `dates`: Date parsing and canonical `YYYY-MM-DD` rendering.
//! - `db`: Database connection and pool management.
//! - `db_storage`: PostgreSQL bulk sink.
//! - `errors`: Error handling types.
//! - `ingest`: Mailbox attachment harvesting.
//! - `joiner`: Order/service reconciliation.
//! - `loader`: CSV extract loading.
//! - `models`: Cell and relation types.
//! - `normalize`: Active-snapshot normalization.
//! - `pipeline`: Batch run orchestration.
//! - `sink`: Bulk sink contract and schema validation.

pub mod config;
pub mod dates;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod ingest;
pub mod joiner;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod sink;
