use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;

use super::OutputFormat;
use crate::config::Config;

#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = Config::default_config_path();

                // Check if config already exists
                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'bcsync config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to add your tenant, company and credentials.");
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    let api = &config.api;
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "(not set)".to_string());
    println!("api:");
    println!("  tenant_id:      {}", show(&api.tenant_id));
    println!("  environment:    {}", api.environment);
    println!("  company_id:     {}", show(&api.company_id));
    println!("  publisher:      {}", show(&api.publisher));
    println!("  group:          {}", show(&api.group));
    println!("  version:        {}", api.version);
    println!("  client_id:      {}", show(&api.client_id));
    println!(
        "  client_secret:  {}",
        if api.client_secret.is_some() {
            "********"
        } else {
            "(not set)"
        }
    );
    match api.base_url() {
        Ok(url) => println!("  base_url:       {}", url),
        Err(e) => println!("  base_url:       ({})", e),
    }
    println!("  schema_version: {}", show(&api.schema_version));
    println!();

    let sync = &config.sync;
    println!("sync:");
    println!("  concurrency:          {}", sync.concurrency);
    println!("  request_timeout_secs: {}", sync.request_timeout_secs);
    println!("  max_attempts:         {}", sync.max_attempts);
    println!("  retry_backoff_ms:     {}", sync.retry_backoff_ms);
    println!("  table_timeout_secs:   {}", sync.table_timeout_secs);
}

const DEFAULT_CONFIG: &str = r#"# bcsync configuration

# Path to SQLite database (default: platform data dir, bcsync/bcsync.db)
# database_path: bcsync.db

api:
  tenant_id: ""
  environment: production
  company_id: ""
  # Custom API route; leave unset for the standard API
  # publisher: contoso
  # group: reporting
  version: v2.0
  client_id: ""
  # Prefer the BCSYNC_CLIENT_SECRET environment variable
  # client_secret: ""

sync:
  concurrency: 4
  request_timeout_secs: 30
  max_attempts: 3
  retry_backoff_ms: 500
  table_timeout_secs: 600
"#;
