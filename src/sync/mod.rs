//! The incremental sync engine.
//!
//! For each table the engine reads the store's sync window, pulls records
//! created and modified since that window, drops update candidates that
//! are already being inserted, and applies the rest in one transaction.
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo(client: std::sync::Arc<bcsync::api::ApiClient>, pool: sqlx::SqlitePool) {
//! use bcsync::db::StoreGateway;
//! use bcsync::schema::SchemaRegistry;
//! use bcsync::sync::SyncEngine;
//!
//! let registry = SchemaRegistry::builtin();
//! let engine = SyncEngine::new(client, StoreGateway::new(pool));
//! let tables = registry.select(&[]).unwrap();
//! let report = engine.run(&tables).await;
//! println!("{}", report);
//! # }
//! ```

mod engine;
mod error;
mod reconcile;
mod report;

pub use crate::models::SyncCounts;
pub use engine::{SyncEngine, SyncPhase};
pub use error::SyncError;
pub use reconcile::dedupe;
pub use report::{RunReport, SyncResult};
