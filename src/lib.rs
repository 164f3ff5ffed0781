//! Incremental sync of Business Central API tables into a local SQLite store.
//!
//! The engine pulls records created or modified since each table's last
//! sync, reconciles the two pulls into disjoint insert and update sets, and
//! applies them to the store one transaction per table.

pub mod api;
pub mod commands;
pub mod config;
pub mod db;
pub mod models;
pub mod schema;
pub mod sync;
