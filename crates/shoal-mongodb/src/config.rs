//! Per-model operational configuration.
//!
//! # Example
//! ```rust,ignore
//! use shoal_mongodb::ModelConfig;
//!
//! // From environment
//! let config = ModelConfig::from_env()?;
//!
//! // Or explicit configuration
//! let config = ModelConfig::default()
//!     .with_debug(true)
//!     .with_slow_query_threshold(50);
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use shoal_common::{Result, ShoalError};

/// Threshold value meaning "never write telemetry"
pub const TELEMETRY_DISABLED: i64 = -1;

/// How the document processor decides that an input field carries a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresencePolicy {
    /// Falsy values (`0`, `false`, `""`, null) count as absent and the
    /// default is used instead
    #[default]
    Truthy,
    /// Any key present in the input counts, whatever its value
    Explicit,
}

/// Operational settings attached to one model, immutable once the model is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Time every operation and report slow ones
    #[serde(default)]
    pub debug: bool,
    /// Slow-operation threshold in milliseconds; `-1` disables telemetry
    #[serde(default = "default_log", deserialize_with = "deserialize_log")]
    pub log: i64,
    #[serde(default)]
    pub presence: PresencePolicy,
}

fn default_log() -> i64 {
    TELEMETRY_DISABLED
}

/// Any value below `-1` is stored as [`TELEMETRY_DISABLED`]
fn clamp_threshold(millis: i64) -> i64 {
    millis.max(TELEMETRY_DISABLED)
}

fn deserialize_log<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    i64::deserialize(deserializer).map(clamp_threshold)
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log: TELEMETRY_DISABLED,
            presence: PresencePolicy::Truthy,
        }
    }
}

impl ModelConfig {
    /// Create model configuration from environment variables.
    ///
    /// - `SHOAL_DEBUG`: `1`, `true`, `yes` or `on` enables timing
    /// - `SHOAL_SLOW_QUERY_MS`: slow-operation threshold, any negative value disables
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("SHOAL_DEBUG") {
            config.debug = parse_flag(&raw).ok_or_else(|| {
                ShoalError::Configuration(format!("Invalid SHOAL_DEBUG value: '{}'", raw))
            })?;
        }

        if let Ok(raw) = std::env::var("SHOAL_SLOW_QUERY_MS") {
            let log = raw.trim().parse::<i64>().map_err(|_| {
                ShoalError::Configuration(format!("Invalid SHOAL_SLOW_QUERY_MS value: '{}'", raw))
            })?;
            config.log = clamp_threshold(log);
        }

        Ok(config)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Negative values disable telemetry and are stored as [`TELEMETRY_DISABLED`]
    pub fn with_slow_query_threshold(mut self, millis: i64) -> Self {
        self.log = clamp_threshold(millis);
        self
    }

    pub fn with_presence(mut self, presence: PresencePolicy) -> Self {
        self.presence = presence;
        self
    }

    /// Threshold in milliseconds, or `None` when telemetry is disabled
    pub fn slow_query_threshold(&self) -> Option<u64> {
        u64::try_from(self.log).ok()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
