//! `bcsync rate`: publish an exchange rate to the remote API.

use chrono::NaiveDate;
use clap::Args;

use super::sync_cmd::build_client;
use super::OutputFormat;
use crate::config::Config;

/// Post an exchange rate to the remote API
#[derive(Debug, Args)]
pub struct RateCommand {
    /// Rate amount (units of local currency per unit of CURRENCY)
    amount: f64,

    /// Currency code
    #[arg(long, default_value = "USD")]
    currency: String,

    /// Starting date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl RateCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(format!("Invalid rate amount: {}", self.amount).into());
        }
        let date = self
            .date
            .unwrap_or_else(|| chrono::Local::now().date_naive());

        let client = build_client(config)?;
        let created = client
            .post_exchange_rate(&self.currency, date, self.amount)
            .await?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&created)?),
            OutputFormat::Text => println!(
                "✓ Posted {} rate {} starting {}",
                self.currency, self.amount, date
            ),
        }
        Ok(())
    }
}
