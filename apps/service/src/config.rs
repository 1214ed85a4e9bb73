use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

use crate::database::models::NetworkType;
use crate::monitoring::types::EndpointKind;

#[derive(Debug)]
pub enum Error {
    ReadFailed(std::io::Error),
    WriteFailed(std::io::Error),
    ParseFailed(toml::de::Error),
    SerializeFailed(toml::ser::Error),
    ConfigPathUnavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ReadFailed(e) => write!(f, "failed to read config file: {e}"),
            Error::WriteFailed(e) => write!(f, "failed to write config file: {e}"),
            Error::ParseFailed(e) => write!(f, "failed to parse config file: {e}"),
            Error::SerializeFailed(e) => write!(f, "failed to serialize config: {e}"),
            Error::ConfigPathUnavailable => write!(f, "no usable config path available"),
        }
    }
}

impl std::error::Error for Error {}

/// Full service configuration: worker knobs plus the declarative endpoint
/// catalog that the store is synchronized from.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// Worker knobs, all overridable through the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub database_url: String,
    pub check_interval_seconds: u64,
    pub batch_limit: usize,
    pub request_timeout: f64,
    pub max_concurrent_checks: usize,
    /// Global freshness threshold, networks can override
    pub stale_after_seconds: u64,
    /// Global sibling-lag threshold in blocks, networks can override
    pub max_height_lag: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: "chainwatch.db".into(),
            check_interval_seconds: 300,
            batch_limit: 300,
            request_timeout: 5.0,
            max_concurrent_checks: 16,
            stale_after_seconds: 60,
            max_height_lag: 10,
        }
    }
}

impl WorkerConfig {
    /// Environment variables win over the config file
    pub fn apply_env_overrides(&mut self) {
        self.database_url = env_or("DATABASE_URL", self.database_url.clone());
        self.check_interval_seconds = env_or("CHECK_INTERVAL_SECONDS", self.check_interval_seconds);
        self.batch_limit = env_or("BATCH_LIMIT", self.batch_limit);
        self.request_timeout = env_or("REQUEST_TIMEOUT", self.request_timeout);
        self.max_concurrent_checks = env_or("MAX_CONCURRENT_CHECKS", self.max_concurrent_checks);
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(val) => val.parse().unwrap_or(default),
        Err(_) => default,
    }
}

/// One project in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// One network of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub slug: String,
    pub name: String,
    pub chain_id: String,
    pub network_type: NetworkType,
    pub check_interval_seconds: Option<u64>,
    pub stale_after_seconds: Option<u64>,
    pub max_height_lag: Option<u64>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// One probed endpoint of a network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub kind: EndpointKind,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/chainwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("chainwatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        let endpoints: usize =
            self.projects.iter().flat_map(|p| p.networks.iter()).map(|n| n.endpoints.len()).sum();

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Worker")?;
        write_1(f, "Database", &self.worker.database_url)?;
        write_1(f, "Check Interval (s)", &self.worker.check_interval_seconds)?;
        write_1(f, "Batch Limit", &self.worker.batch_limit)?;
        write_1(f, "Request Timeout (s)", &self.worker.request_timeout)?;
        write_1(f, "Max Concurrent Checks", &self.worker.max_concurrent_checks)?;
        write_title_1(f, "Catalog")?;
        write_1(f, "Projects", &self.projects.len())?;
        write_1(f, "Endpoints", &endpoints)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/chainwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str()).map_err(Error::ParseFailed)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self).map_err(Error::SerializeFailed)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }
}
