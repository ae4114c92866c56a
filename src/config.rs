//! Configuration loading for the registry daemon.
//!
//! Settings are layered from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables (prefixed with `DEVREG_`)
//!
//! # Example
//! ```no_run
//! use device_registry::config::Settings;
//!
//! # fn main() -> Result<(), figment::Error> {
//! let settings = Settings::load()?;
//! println!("Application: {}", settings.application.name);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Identification negotiator settings
    #[serde(default)]
    pub identification: IdentificationSettings,
    /// Manager task settings
    #[serde(default)]
    pub manager: ManagerSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Identification negotiator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentificationSettings {
    /// Per-dialect query timeout
    #[serde(with = "humantime_serde", default = "default_query_timeout")]
    pub query_timeout: Duration,
    /// Settle delay before the trailing legacy status probe, which slow
    /// legacy hardware needs before it will answer
    #[serde(with = "humantime_serde", default = "default_legacy_probe_delay")]
    pub legacy_probe_delay: Duration,
}

/// Manager task configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Capacity of the manager command mailbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Interval between periodic full rescans of the attached bus servers
    #[serde(with = "humantime_serde", default = "default_rescan_interval")]
    pub rescan_interval: Duration,
}

// Default value functions
fn default_name() -> String {
    "device-registry".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_legacy_probe_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_rescan_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for IdentificationSettings {
    fn default() -> Self {
        Self {
            query_timeout: default_query_timeout(),
            legacy_probe_delay: default_legacy_probe_delay(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            rescan_interval: default_rescan_interval(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings::default(),
            identification: IdentificationSettings::default(),
            manager: ManagerSettings::default(),
        }
    }
}

impl Settings {
    /// Load configuration from `config/registry.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix `DEVREG_`.
    /// Example: `DEVREG_APPLICATION_LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/registry.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DEVREG_").split("_"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.manager.mailbox_capacity == 0 {
            return Err("mailbox_capacity must be at least 1".to_string());
        }

        if self.identification.query_timeout.is_zero() {
            return Err("query_timeout must be non-zero".to_string());
        }

        Ok(())
    }
}
