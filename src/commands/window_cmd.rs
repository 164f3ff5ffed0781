use clap::Args;
use serde_json::json;

use super::OutputFormat;
use crate::config::Config;
use crate::db::{init_db, StoreGateway};
use crate::schema::{RegistryError, SchemaRegistry};

/// Show the current sync window of a table
#[derive(Debug, Args)]
pub struct WindowCommand {
    /// Entity or table name
    name: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl WindowCommand {
    pub async fn run(
        &self,
        registry: &SchemaRegistry,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let schema = registry
            .get(&self.name)
            .ok_or_else(|| RegistryError::UnknownTable(self.name.clone()))?;

        let pool = init_db(&config.database_path.value).await?;
        let window = StoreGateway::new(pool).window_for(schema).await?;

        match self.format {
            OutputFormat::Json => {
                let value = json!({
                    "table": schema.table,
                    "entity": schema.entity,
                    "window": window,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            OutputFormat::Text => {
                println!("{} ({})", schema.table, schema.entity);
                println!("{}", window);
                if window.is_unset() {
                    println!();
                    println!("Next sync will pull the full table.");
                }
            }
        }
        Ok(())
    }
}
