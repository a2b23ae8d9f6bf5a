use super::error::Result;
use super::page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PageRequest};
use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

const CONFIG_FILE: &str = "fuelops";
const ENV_PREFIX: &str = "FUELOPS";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub logging: LogSettings,
    pub paging: PagingSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageSettings {
    pub path: PathBuf,
    pub cache_capacity_bytes: u64,
    pub flush_every_ms: u64, // 0 disables background flushing
    pub temporary: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fuelops.db"),
            cache_capacity_bytes: 64 * 1024 * 1024,
            flush_every_ms: 500,
            temporary: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PagingSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PagingSettings {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl PagingSettings {
    pub fn first_page(&self) -> PageRequest {
        PageRequest::first(self.default_page_size)
    }
}

impl Settings {
    /// Defaults, overridden by an optional `fuelops.{toml,yaml,json}` in the working
    /// directory, overridden by `FUELOPS__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(file: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        let paging = &settings.paging;
        if paging.default_page_size == 0 || paging.default_page_size > paging.max_page_size {
            return Err(::config::ConfigError::Message(format!(
                "paging.default_page_size must be between 1 and {}",
                paging.max_page_size
            ))
            .into());
        }

        Ok(settings)
    }
}
