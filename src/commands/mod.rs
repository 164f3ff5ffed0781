mod config_cmd;
mod rate_cmd;
mod sync_cmd;
mod tables_cmd;
mod window_cmd;

pub use config_cmd::ConfigCommand;
pub use rate_cmd::RateCommand;
pub use sync_cmd::SyncCommand;
pub use tables_cmd::TablesCommand;
pub use window_cmd::WindowCommand;

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
