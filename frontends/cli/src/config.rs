use anyhow::{Context, Result, bail};
use casesync::core::{BatchSizes, SyncSettings};
use casesync_practicepanther::{ClientSettings, DEFAULT_BASE_URL, PaginationSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "casesync.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    pub page_size: u32,
    pub inter_page_delay_ms: u64,
    pub max_rate_limit_retries: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        let defaults = PaginationSettings::default();
        Self {
            page_size: defaults.page_size,
            inter_page_delay_ms: defaults.inter_page_delay.as_millis() as u64,
            max_rate_limit_retries: defaults.max_rate_limit_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSizeConfig {
    pub contacts: usize,
    pub matters: usize,
    pub tasks: usize,
}

impl Default for BatchSizeConfig {
    fn default() -> Self {
        let defaults = BatchSizes::default();
        Self {
            contacts: defaults.contacts,
            matters: defaults.matters,
            tasks: defaults.tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub database: PathBuf,
    pub max_connections: u32,
    pub log_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
    /// Wait used when a 429 has no `Retry-After`
    pub default_retry_after_secs: u64,
    pub recent_runs_limit: u32,
    /// Seconds without a heartbeat before a running sync counts as abandoned
    pub run_lease_secs: u64,
    pub pagination: PaginationConfig,
    pub batch_sizes: BatchSizeConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        let client = ClientSettings::default();
        Self {
            api_token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            database: PathBuf::from("casesync.db"),
            max_connections: 4,
            log_file: None,
            request_timeout_secs: client.timeout.as_secs(),
            default_retry_after_secs: client.default_retry_after_secs,
            recent_runs_limit: SyncSettings::default().recent_runs_limit,
            run_lease_secs: SyncSettings::default().run_lease.as_secs(),
            pagination: PaginationConfig::default(),
            batch_sizes: BatchSizeConfig::default(),
        }
    }
}

/// Values taken from flags or their environment variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub api_token: Option<String>,
    pub base_url: Option<String>,
    pub database: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl From<&Cli> for ConfigOverrides {
    fn from(cli: &Cli) -> Self {
        Self {
            api_token: cli.api_token.clone(),
            base_url: cli.base_url.clone(),
            database: cli.database.clone(),
            log_file: cli.log_file.clone(),
        }
    }
}

impl CliConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load `path`, or `./casesync.yaml` if it exists, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config YAML {}", path.display()))
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(token) = &overrides.api_token {
            self.api_token = Some(token.clone());
        }
        if let Some(base_url) = &overrides.base_url {
            self.base_url = base_url.clone();
        }
        if let Some(database) = &overrides.database {
            self.database = database.clone();
        }
        if let Some(log_file) = &overrides.log_file {
            self.log_file = Some(log_file.clone());
        }
    }

    pub fn require_api_token(&self) -> Result<&str> {
        match self.api_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => bail!(
                "No API token configured: set CASESYNC_API_TOKEN, pass --api-token, or add api_token to the config file"
            ),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            default_retry_after_secs: self.default_retry_after_secs,
            ..ClientSettings::default()
        }
    }

    pub fn pagination_settings(&self) -> PaginationSettings {
        PaginationSettings {
            page_size: self.pagination.page_size.max(1),
            inter_page_delay: Duration::from_millis(self.pagination.inter_page_delay_ms),
            max_rate_limit_retries: self.pagination.max_rate_limit_retries,
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            batch_sizes: BatchSizes {
                contacts: self.batch_sizes.contacts,
                matters: self.batch_sizes.matters,
                tasks: self.batch_sizes.tasks,
            },
            recent_runs_limit: self.recent_runs_limit,
            run_lease: Duration::from_secs(self.run_lease_secs.max(1)),
        }
    }
}
