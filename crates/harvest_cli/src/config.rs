//! Runner configuration, loaded from a RON file.
//!
//! Every section has defaults, so a file only needs the parts it changes:
//!
//! ```ron
//! (
//!     harvest: (workers: 8, range: (start: "2024-04-01", end: "2024-04-30")),
//!     primary: (name: "archive", base_url: "https://archive.example/records"),
//!     secondary: Some((name: "mirror", base_url: "https://mirror.example/v2")),
//!     store_dir: "./harvest-data",
//! )
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use harvest_core::HarvestConfig;
use harvest_engine::HttpSourceSettings;
use harvest_logging::LogDestination;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "harvest.ron";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogTarget {
    File,
    #[default]
    Terminal,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub harvest: HarvestConfig,
    pub primary: HttpSourceSettings,
    pub secondary: Option<HttpSourceSettings>,
    pub store_dir: PathBuf,
    pub log_target: LogTarget,
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            harvest: HarvestConfig::default(),
            primary: HttpSourceSettings::new("primary", "http://127.0.0.1:8080/records"),
            secondary: None,
            store_dir: PathBuf::from("./harvest-data"),
            log_target: LogTarget::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: AppConfig = ron::from_str(text)?;
        config.harvest.validate()?;
        Ok(config)
    }

    pub fn level(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level)
            .with_context(|| format!("unknown log level {:?}", self.log_level))
    }
}
