//! Configuration loading for the trail driver.
//!
//! Settings come from `waymark.toml` if present, then environment variables
//! (`WAYMARK_CATALOG_URL`, `WAYMARK_STORE_DIR`), then command-line flags.
//! Missing or invalid entries fall back to defaults so the driver can still
//! start.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use waymark_core::session::DEFAULT_CLAIM_RADIUS_M;
use waymark_core::{HeadlessConfig, WritePolicy};

pub const DEFAULT_CONFIG_PATH: &str = "waymark.toml";

fn default_store_dir() -> PathBuf {
    PathBuf::from(".waymark")
}

fn default_claim_radius_m() -> f64 {
    DEFAULT_CLAIM_RADIUS_M
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    #[serde(default)]
    pub write_policy: WritePolicy,
    #[serde(default = "default_claim_radius_m")]
    pub claim_radius_m: f64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_url: None,
            catalog_path: None,
            store_dir: default_store_dir(),
            write_policy: WritePolicy::default(),
            claim_radius_m: default_claim_radius_m(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Apply `WAYMARK_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WAYMARK_CATALOG_URL") {
            self.set_catalog(&url);
        }
        if let Ok(dir) = std::env::var("WAYMARK_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
    }

    /// Point at a catalog, treating `http(s)://` as a URL and anything else
    /// as a file path.
    pub fn set_catalog(&mut self, location: &str) {
        if location.starts_with("http://") || location.starts_with("https://") {
            self.catalog_url = Some(location.to_string());
            self.catalog_path = None;
        } else {
            self.catalog_path = Some(PathBuf::from(location));
            self.catalog_url = None;
        }
    }

    pub fn to_headless(&self) -> Result<HeadlessConfig> {
        let config = match (&self.catalog_url, &self.catalog_path) {
            (Some(url), _) => HeadlessConfig::from_url(url),
            (None, Some(path)) => HeadlessConfig::from_file(path),
            (None, None) => {
                return Err(anyhow!(
                    "No marker catalog configured; set catalog_url or catalog_path, or pass --catalog"
                ))
            }
        };

        Ok(config
            .with_store_dir(&self.store_dir)
            .with_write_policy(self.write_policy)
            .with_claim_radius_m(self.claim_radius_m))
    }
}

pub fn parse_config(contents: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str(contents)
}

/// Load configuration from `path`, falling back to defaults.
pub fn load_config(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(contents) => match parse_config(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(err) => {
                warn!(path = %path.display(), "Invalid configuration, using defaults: {err}");
                AppConfig::default()
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No configuration file; using defaults");
            AppConfig::default()
        }
        Err(err) => {
            warn!(path = %path.display(), "Could not read configuration, using defaults: {err}");
            AppConfig::default()
        }
    }
}

/// Command-line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub catalog: Option<String>,
    pub store_dir: Option<PathBuf>,
    pub pessimistic: bool,
}

impl CliArgs {
    pub fn parse(args: &[String]) -> Self {
        let mut cli = Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            catalog: None,
            store_dir: None,
            pessimistic: false,
        };

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if let Some(path) = args.get(i + 1) {
                        cli.config_path = PathBuf::from(path);
                        i += 1;
                    }
                }
                "--catalog" => {
                    if let Some(location) = args.get(i + 1) {
                        cli.catalog = Some(location.clone());
                        i += 1;
                    }
                }
                "--store" => {
                    if let Some(dir) = args.get(i + 1) {
                        cli.store_dir = Some(PathBuf::from(dir));
                        i += 1;
                    }
                }
                "--pessimistic" => cli.pessimistic = true,
                _ => {}
            }
            i += 1;
        }

        cli
    }

    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(location) = &self.catalog {
            config.set_catalog(location);
        }
        if let Some(dir) = &self.store_dir {
            config.store_dir = dir.clone();
        }
        if self.pessimistic {
            config.write_policy = WritePolicy::Pessimistic;
        }
    }
}
