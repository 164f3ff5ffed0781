//! `bcsync sync`: pull deltas for the selected tables into the store.

use clap::Args;
use std::sync::Arc;

use super::OutputFormat;
use crate::api::{ApiClient, ApiClientConfig, ClientCredentials, TokenProvider};
use crate::config::Config;
use crate::db::{init_db, StoreGateway};
use crate::schema::SchemaRegistry;
use crate::sync::SyncEngine;

/// Sync tables from the remote API
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Table to sync, by entity or table name (repeatable; default: all)
    #[arg(long = "table", short, value_name = "NAME")]
    tables: Vec<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl SyncCommand {
    /// Runs the sync. Returns whether every table succeeded.
    pub async fn run(
        &self,
        registry: &SchemaRegistry,
        config: &Config,
    ) -> Result<bool, Box<dyn std::error::Error>> {
        let tables = registry.select(&self.tables)?;
        let engine = build_engine(config).await?;

        if let OutputFormat::Text = self.format {
            println!("Syncing {} table(s)...", tables.len());
            println!();
        }

        let report = engine.run(&tables).await;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => println!("{}", report),
        }

        Ok(report.is_success())
    }
}

async fn build_engine(config: &Config) -> Result<SyncEngine, Box<dyn std::error::Error>> {
    let client = build_client(config)?;
    let pool = init_db(&config.database_path.value).await?;

    Ok(SyncEngine::new(Arc::new(client), StoreGateway::new(pool))
        .with_concurrency(config.sync.concurrency)
        .with_table_timeout(config.sync.table_timeout()))
}

/// Authenticated API client for the configured company.
pub(super) fn build_client(config: &Config) -> Result<ApiClient, Box<dyn std::error::Error>> {
    let (client_id, client_secret) = config.api.credentials()?;
    let exchange = ClientCredentials::new(
        &config.api.authority_url()?,
        client_id,
        client_secret,
        config.api.scope.clone(),
        config.sync.request_timeout(),
    )?;
    let tokens = Arc::new(TokenProvider::new(exchange));

    Ok(ApiClient::new(
        ApiClientConfig {
            base_url: config.api.base_url()?,
            request_timeout: config.sync.request_timeout(),
            max_attempts: config.sync.max_attempts,
            retry_backoff: config.sync.retry_backoff(),
            schema_version: config.api.schema_version.clone(),
        },
        tokens,
    )?)
}
