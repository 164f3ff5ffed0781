use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bcsync::commands::{ConfigCommand, RateCommand, SyncCommand, TablesCommand, WindowCommand};
use bcsync::config::Config;
use bcsync::schema::SchemaRegistry;

#[derive(Parser)]
#[command(name = "bcsync")]
#[command(version)]
#[command(about = "Incremental Business Central to SQLite sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync tables from the remote API
    Sync(SyncCommand),

    /// Show the current sync window of a table
    Window(WindowCommand),

    /// List synced tables in run order
    Tables(TablesCommand),

    /// Post an exchange rate to the remote API
    Rate(RateCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bcsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run().await {
        Ok(true) => {}
        // Some tables failed; the report has been printed.
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;
    let registry = SchemaRegistry::builtin();

    match cli.command {
        Some(Commands::Sync(cmd)) => return cmd.run(&registry, &config).await,
        Some(Commands::Window(cmd)) => cmd.run(&registry, &config).await?,
        Some(Commands::Tables(cmd)) => cmd.run(&registry)?,
        Some(Commands::Rate(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(true)
}
