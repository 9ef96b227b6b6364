use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    sampler::TrackingOptions,
    session::{EndpointSelector, SessionSettings},
    CATALOG_PATH,
};

pub const API_URL_ENV: &str = "CAMPUS_NAV_API_URL";
pub const CATALOG_ENV: &str = "CAMPUS_NAV_CATALOG";

/// Used when neither the config file nor the environment names a backend.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

const KNOWN_KEYS: &[&str] = &[
    "api_base_url",
    "request_timeout_ms",
    "catalog_path",
    "log_file",
    "tracking",
    "arrival_radius_m",
    "deviation_threshold_m",
    "max_tracking_failures",
    "start_allows_current_location",
    "end_allows_current_location",
];

const TRACKING_KEYS: &[&str] = &["high_accuracy", "timeout_ms", "max_sample_age_ms"];

/// Client settings. Every field is optional in the TOML file; missing ones
/// keep their default. Sensor options live in a `[tracking]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub catalog_path: Option<PathBuf>,
    pub log_file: Option<PathBuf>,

    pub tracking: TrackingOptions,

    pub arrival_radius_m: f64,
    pub deviation_threshold_m: f64,
    pub max_tracking_failures: u32,
    pub start_allows_current_location: bool,
    pub end_allows_current_location: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            request_timeout_ms: 15_000,
            catalog_path: None,
            log_file: None,
            tracking: TrackingOptions::default(),
            arrival_radius_m: 15.,
            deviation_threshold_m: 30.,
            max_tracking_failures: 3,
            start_allows_current_location: true,
            end_allows_current_location: false,
        }
    }
}

impl Configuration {
    /// Defaults, then the optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_owned(),
                    source,
                })?;
                Self::parse(&text)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document on top of the defaults. Unknown keys are
    /// logged and ignored.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(text)?;

        for key in table.keys().filter(|key| !KNOWN_KEYS.contains(&key.as_str())) {
            tracing::warn!("Unknown config key: {}", key);
        }
        if let Some(tracking) = table.get("tracking").and_then(toml::Value::as_table) {
            for key in tracking.keys().filter(|key| !TRACKING_KEYS.contains(&key.as_str())) {
                tracing::warn!("Unknown config key: tracking.{}", key);
            }
        }

        let config: Self = toml::Value::Table(table).try_into()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            tracing::debug!("{} overrides api_base_url", API_URL_ENV);
            self.api_base_url = url.trim().to_owned();
        }
        if let Some(path) = lookup(CATALOG_ENV).filter(|v| !v.trim().is_empty()) {
            self.catalog_path = Some(PathBuf::from(path.trim()));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!("api_base_url must be an http(s) URL, got {url:?}")));
        }
        if self.request_timeout_ms == 0 || self.tracking.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if !(self.arrival_radius_m > 0.) {
            return Err(ConfigError::Invalid("arrival_radius_m must be positive".into()));
        }
        if !(self.deviation_threshold_m > 0.) {
            return Err(ConfigError::Invalid("deviation_threshold_m must be positive".into()));
        }
        if self.max_tracking_failures == 0 {
            return Err(ConfigError::Invalid("max_tracking_failures must be at least 1".into()));
        }
        Ok(())
    }

    /// The configured catalog, or the bundled one under the project root.
    pub fn catalog_path(&self) -> PathBuf {
        match &self.catalog_path {
            Some(path) => path.clone(),
            None => project_root::get_project_root().unwrap_or_default().join(CATALOG_PATH),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            start_selector: EndpointSelector {
                allow_current_location: self.start_allows_current_location,
            },
            end_selector: EndpointSelector {
                allow_current_location: self.end_allows_current_location,
            },
            arrival_radius_m: self.arrival_radius_m,
            deviation_threshold_m: self.deviation_threshold_m,
            max_tracking_failures: self.max_tracking_failures,
        }
    }
}
