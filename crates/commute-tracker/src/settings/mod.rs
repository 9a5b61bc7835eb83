pub mod validation;

use crate::{
    error::ConfigError,
    window::{HourWindow, TimeWindowPolicy},
};
use anyhow::{Context, Result};
use chrono_tz::Tz;
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, path::Path};
use url::Url;
use validation::validate_config;

pub const ENV_PREFIX: &str = "COMMUTE";
pub const DEFAULT_ENDPOINT: &str = "https://routes.googleapis.com/directions/v2:computeRoutes";

/// Main settings configuration for the commute tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level for application logging (e.g., "info", "debug", "warn", "error")
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// The two fixed addresses being tracked
    #[serde(default)]
    pub route: RouteSettings,
    /// Routing provider access
    #[serde(default)]
    pub provider: ProviderSettings,
    /// Tracking windows and refresh cadence
    #[serde(default)]
    pub schedule: ScheduleSettings,
    /// Measurement log location
    #[serde(default)]
    pub storage: StorageSettings,
    /// Prometheus exporter (optional)
    #[serde(default)]
    pub metrics: Option<MetricsSettings>,
}

/// Addresses are free-form strings handed to the provider as-is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    /// Home address; origin during the morning window
    pub source_address: String,
    /// Office address; origin during the evening window
    pub destination_address: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// API key sent with every routing request
    pub api_key: String,
    /// computeRoutes endpoint
    pub endpoint: Url,
    /// Per-request timeout enforced by the HTTP transport
    pub timeout_seconds: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL"),
            timeout_seconds: 10,
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Minimum age of the last measurement before fetching again (default: 300)
    pub refresh_interval_seconds: u64,
    /// How often the driver evaluates whether a fetch is due (default: 30)
    pub tick_seconds: u64,
    /// Home → Office tracking hours (default: [8, 11))
    pub morning_window: HourWindow,
    /// Office → Home tracking hours (default: [16, 19))
    pub evening_window: HourWindow,
    /// IANA timezone used for windows and calendar days (default: US/Pacific)
    pub timezone: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 300,
            tick_seconds: 30,
            morning_window: HourWindow { start: 8, end: 11 },
            evening_window: HourWindow { start: 16, end: 19 },
            timezone: "US/Pacific".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path to the measurement log (default: commute_data.json)
    pub log_file: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            log_file: "commute_data.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    pub addr: SocketAddr,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            route: RouteSettings::default(),
            provider: ProviderSettings::default(),
            schedule: ScheduleSettings::default(),
            storage: StorageSettings::default(),
            metrics: None,
        }
    }
}

impl Settings {
    /// Load configuration from a specific config file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let _ = dotenvy::dotenv();

        // Construct settings, env vars take priority still
        let settings = ConfigBuilder::builder()
            .add_source(File::with_name(&path.as_ref().to_string_lossy()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_config(&settings)?;

        Ok(settings)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        // NOTE: It's ok if this fails (file might not exist)
        let _ = dotenvy::dotenv();

        let settings: Settings = ConfigBuilder::builder()
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_config(&settings)?;

        Ok(settings)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.schedule
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.schedule.timezone.clone()))
    }

    pub fn window_policy(&self) -> TimeWindowPolicy {
        TimeWindowPolicy::new(
            self.schedule.morning_window,
            self.schedule.evening_window,
            self.route.source_address.clone(),
            self.route.destination_address.clone(),
        )
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings {{\n\
             \tLog Level: {}\n\
             \tSource Address: {}\n\
             \tDestination Address: {}\n\
             \tProvider Endpoint: {}\n\
             \tRefresh Interval: {}s\n\
             \tTick: {}s\n\
             \tMorning Window: {}\n\
             \tEvening Window: {}\n\
             \tTimezone: {}\n\
             \tLog File: {}\n\
             }}",
            self.log_level,
            self.route.source_address,
            self.route.destination_address,
            self.provider.endpoint,
            self.schedule.refresh_interval_seconds,
            self.schedule.tick_seconds,
            self.schedule.morning_window,
            self.schedule.evening_window,
            self.schedule.timezone,
            self.storage.log_file,
        )
    }
}
