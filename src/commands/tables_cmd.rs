use clap::Args;
use serde::Serialize;

use super::OutputFormat;
use crate::schema::SchemaRegistry;

/// List synced tables in run order
#[derive(Debug, Args)]
pub struct TablesCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct TableRow<'a> {
    priority: u8,
    entity: &'a str,
    table: &'a str,
    business_key: &'a [&'static str],
    fields: usize,
}

impl TablesCommand {
    pub fn run(&self, registry: &SchemaRegistry) -> Result<(), Box<dyn std::error::Error>> {
        let rows: Vec<TableRow> = registry
            .tables()
            .iter()
            .map(|t| TableRow {
                priority: t.priority(),
                entity: t.entity,
                table: t.table,
                business_key: t.business_key(),
                fields: t.fields().len(),
            })
            .collect();

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            OutputFormat::Text => {
                println!(
                    "{:<4} {:<28} {:<28} BUSINESS KEY",
                    "PRI", "ENTITY", "TABLE"
                );
                for row in &rows {
                    println!(
                        "{:<4} {:<28} {:<28} {}",
                        row.priority,
                        row.entity,
                        row.table,
                        row.business_key.join(", ")
                    );
                }
                println!();
                println!("{} table(s)", rows.len());
            }
        }
        Ok(())
    }
}
