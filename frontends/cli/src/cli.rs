use casesync_api::SyncRunKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "casesync", version)]
#[command(about = "Sync PracticePanther contacts, matters and tasks into a local database")]
pub struct Cli {
    /// YAML config file (defaults to ./casesync.yaml when present)
    #[arg(long, short, global = true, env = "CASESYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = "CASESYNC_DATABASE")]
    pub database: Option<PathBuf>,

    /// PracticePanther API base URL
    #[arg(long, global = true, env = "CASESYNC_BASE_URL")]
    pub base_url: Option<String>,

    #[arg(long, global = true, env = "CASESYNC_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run a sync against the remote system
    Sync {
        #[arg(value_enum, default_value = "full")]
        scope: SyncScope,

        /// Recorded on the run (defaults to "cli")
        #[arg(long)]
        triggered_by: Option<String>,
    },
    /// Recent runs, entity counts and run statistics
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Check connectivity and credentials
    Health {
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    Full,
    Contacts,
    Matters,
    Tasks,
}

impl From<SyncScope> for SyncRunKind {
    fn from(scope: SyncScope) -> Self {
        match scope {
            SyncScope::Full => SyncRunKind::Full,
            SyncScope::Contacts => SyncRunKind::Contacts,
            SyncScope::Matters => SyncRunKind::Matters,
            SyncScope::Tasks => SyncRunKind::Tasks,
        }
    }
}
