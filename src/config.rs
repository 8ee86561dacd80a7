/// Service configuration loaded from TOML.
///
/// ```toml
/// [service]
/// poll_interval_minutes = 480
/// request_timeout_secs = 10
///
/// [[locations]]
/// title = "Klagenfurt"
/// latitude = 46.628
/// longitude = 14.309
/// country = "AT"
/// language = "de"
/// api_key_env = "POLLENAT_API_KEY"
/// ```
///
/// Credentials come either inline (`api_key`) or from an environment
/// variable (`api_key_env`, default `POLLENAT_API_KEY`). A `.env` file in
/// the working directory is read before any environment lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::ingest::pollen_api::POLLEN_API_URL;
use crate::levels::{DEFAULT_RISK_DIVISOR, RiskScale};
use crate::logging::LogLevel;
use crate::model::{LocationProfile, REFERENCE_LANGUAGE, location_key};

/// Environment variable consulted when a location names none.
pub const DEFAULT_API_KEY_ENV: &str = "POLLENAT_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("location '{location}': environment variable {var} is not set")]
    MissingCredential { location: String, var: String },
}

// ---------------------------------------------------------------------------
// File shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub poll_interval_minutes: u64,
    pub request_timeout_secs: u64,
    pub risk_scale_divisor: f64,
    pub reference_language: String,
    pub api_base_url: String,
    /// JSON language map replacing the bundled one.
    pub tables_path: Option<PathBuf>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 480,
            request_timeout_secs: 10,
            risk_scale_divisor: DEFAULT_RISK_DIVISOR,
            reference_language: REFERENCE_LANGUAGE.to_string(),
            api_base_url: POLLEN_API_URL.to_string(),
            tables_path: None,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub title: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub language: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ServiceConfig {
    /// Reads, parses and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            locations = config.locations.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that does not need the environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.service;
        if s.poll_interval_minutes == 0 {
            return Err(invalid("poll_interval_minutes must be greater than zero"));
        }
        if s.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be greater than zero"));
        }
        if !s.risk_scale_divisor.is_finite() || s.risk_scale_divisor <= 0.0 {
            return Err(invalid(format!(
                "risk_scale_divisor must be a positive number, got {}",
                s.risk_scale_divisor
            )));
        }
        if s.reference_language.trim().is_empty() {
            return Err(invalid("reference_language must not be empty"));
        }
        s.log_level
            .parse::<LogLevel>()
            .map_err(invalid)?;

        // Unique ids are prefixed by the location key.
        let mut keys: HashMap<String, &str> = HashMap::new();
        for location in &self.locations {
            location.validate()?;
            let key = location.location_key();
            if let Some(other) = keys.insert(key.clone(), &location.title) {
                return Err(invalid(format!(
                    "duplicate location key '{}' for titles '{}' and '{}'",
                    key, other, location.title
                )));
            }
        }
        Ok(())
    }

    /// Builds profiles for every location, resolving credentials.
    pub fn profiles(&self) -> Result<Vec<LocationProfile>, ConfigError> {
        dotenv::dotenv().ok();
        self.locations.iter().map(LocationConfig::to_profile).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.service.poll_interval_minutes.saturating_mul(60))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout_secs)
    }

    pub fn risk_scale(&self) -> RiskScale {
        RiskScale::new(self.service.risk_scale_divisor)
    }

    /// Parsed log level; falls back to info if validation was skipped.
    pub fn log_level(&self) -> LogLevel {
        self.service.log_level.parse().unwrap_or(LogLevel::Info)
    }
}

impl LocationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.title;
        if self.title.trim().is_empty() {
            return Err(invalid("location title must not be empty"));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(invalid(format!("location '{}': latitude {} out of range", name, self.latitude)));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(invalid(format!("location '{}': longitude {} out of range", name, self.longitude)));
        }
        let country = self.country.trim();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid(format!(
                "location '{}': country '{}' is not a two-letter code",
                name, self.country
            )));
        }
        if self.language.trim().is_empty() {
            return Err(invalid(format!("location '{}': language must not be empty", name)));
        }
        if self.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(invalid(format!("location '{}': api_key must not be empty", name)));
        }
        Ok(())
    }

    /// Key this location's ids will carry once it becomes a profile.
    pub fn location_key(&self) -> String {
        location_key(self.title.trim(), self.latitude, self.longitude)
    }

    fn credential(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(key.trim().to_string());
        }
        let var = self.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(ConfigError::MissingCredential {
                location: self.title.clone(),
                var: var.to_string(),
            }),
        }
    }

    pub fn to_profile(&self) -> Result<LocationProfile, ConfigError> {
        Ok(LocationProfile {
            title: self.title.trim().to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            country_code: self.country.trim().to_ascii_uppercase(),
            language_code: self.language.trim().to_ascii_lowercase(),
            credential: self.credential()?,
        })
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
