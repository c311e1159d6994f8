//! Strongly-typed configuration loading.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables (prefixed with `NEURO_DAQ_`)
//!
//! # Example
//! ```no_run
//! use neuro_daq::config::AcqConfig;
//!
//! # fn main() -> Result<(), figment::Error> {
//! let config = AcqConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default continuous samples cached per sample group.
pub const DEFAULT_CONTINUOUS_SAMPLES: u32 = 102_400;
/// Default events cached per channel.
pub const DEFAULT_EVENT_SAMPLES: u32 = 16_384;
/// Default comment slots.
pub const DEFAULT_COMMENT_SLOTS: u32 = 256;
/// Default tracking slots per trackable object.
pub const DEFAULT_TRACKING_SLOTS: u32 = 256;
/// Default bounded wait for fresh comment and tracking data, in milliseconds.
pub const DEFAULT_WAIT_MS: u64 = 250;

/// Top-level crate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcqConfig {
    /// Application settings.
    pub application: ApplicationConfig,
    /// Trial cache defaults.
    pub trial: TrialDefaults,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Default trial cache sizing, used when a trial is configured without
/// explicit capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialDefaults {
    /// Continuous samples cached per sample group.
    #[serde(default = "default_continuous_samples")]
    pub continuous_samples: u32,
    /// Events cached per channel.
    #[serde(default = "default_event_samples")]
    pub event_samples: u32,
    /// Comment slots.
    #[serde(default = "default_comment_slots")]
    pub comment_slots: u32,
    /// Tracking slots per trackable object.
    #[serde(default = "default_tracking_slots")]
    pub tracking_slots: u32,
    /// Bounded wait for fresh comment and tracking data, in milliseconds.
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
}

// Default value functions
fn default_continuous_samples() -> u32 {
    DEFAULT_CONTINUOUS_SAMPLES
}

fn default_event_samples() -> u32 {
    DEFAULT_EVENT_SAMPLES
}

fn default_comment_slots() -> u32 {
    DEFAULT_COMMENT_SLOTS
}

fn default_tracking_slots() -> u32 {
    DEFAULT_TRACKING_SLOTS
}

fn default_wait_ms() -> u64 {
    DEFAULT_WAIT_MS
}

impl Default for TrialDefaults {
    fn default() -> Self {
        Self {
            continuous_samples: DEFAULT_CONTINUOUS_SAMPLES,
            event_samples: DEFAULT_EVENT_SAMPLES,
            comment_slots: DEFAULT_COMMENT_SLOTS,
            tracking_slots: DEFAULT_TRACKING_SLOTS,
            wait_ms: DEFAULT_WAIT_MS,
        }
    }
}

impl Default for AcqConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "neuro-daq".to_string(),
                log_level: "info".to_string(),
            },
            trial: TrialDefaults::default(),
        }
    }
}

impl AcqConfig {
    /// Load configuration from `config/neuro_daq.toml` and environment
    /// variables.
    ///
    /// Environment variables can override configuration with prefix
    /// `NEURO_DAQ_`. Example: `NEURO_DAQ_APPLICATION_LOG_LEVEL=debug`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/neuro_daq.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(AcqConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("NEURO_DAQ_").split("_"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.trial.continuous_samples == 0 && self.trial.event_samples == 0 {
            return Err(
                "At least one of continuous_samples or event_samples must be non-zero".to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = AcqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trial.continuous_samples, 102_400);
        assert_eq!(config.trial.event_samples, 16_384);
        assert_eq!(config.trial.wait_ms, 250);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = AcqConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[application]\nname = \"bench rig\"\nlog_level = \"debug\"\n\n[trial]\nevent_samples = 4096\n"
        )
        .unwrap();

        let config = AcqConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "bench rig");
        assert_eq!(config.trial.event_samples, 4096);
        // Unset fields keep their defaults.
        assert_eq!(config.trial.continuous_samples, 102_400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AcqConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.application.name, "neuro-daq");
    }
}
