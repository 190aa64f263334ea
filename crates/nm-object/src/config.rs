//! Configuration file support
//!
//! Loads and validates mirror configuration from TOML files. Every field has
//! a default, so an empty file (or no file) yields a working setup that
//! talks to NetworkManager on the system bus.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::CallTimeouts;
use crate::error::{MirrorError, Result};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/NetworkManager/nm-object.conf";

/// Which message bus to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// The system bus
    System,
    /// The per-login session bus
    Session,
}

/// Bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus to connect to
    #[serde(default = "default_bus_kind")]
    pub kind: BusKind,

    /// Well-known name of the remote service
    #[serde(default = "default_service")]
    pub service: String,
}

/// Call timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Full refresh (`GetAll`) timeout in milliseconds
    #[serde(default = "default_get_all_ms")]
    pub get_all_ms: u64,

    /// Single property refresh (`Get`) timeout in milliseconds
    #[serde(default = "default_get_ms")]
    pub get_ms: u64,

    /// Remote write (`Set`) timeout in milliseconds
    #[serde(default = "default_set_ms")]
    pub set_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of compact text
    #[serde(default)]
    pub json: bool,
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Bus configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Call timeouts
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_bus_kind() -> BusKind {
    BusKind::System
}

fn default_service() -> String {
    "org.freedesktop.NetworkManager".to_string()
}

fn default_get_all_ms() -> u64 {
    25_000
}

fn default_get_ms() -> u64 {
    15_000
}

fn default_set_ms() -> u64 {
    2_000
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: default_bus_kind(),
            service: default_service(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            get_all_ms: default_get_all_ms(),
            get_ms: default_get_ms(),
            set_ms: default_set_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl MirrorConfig {
    /// Parses configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MirrorError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            MirrorError::Config(msg) => {
                MirrorError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Loads configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        match Self::load(path) {
            Err(MirrorError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Serializes the configuration to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MirrorError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<()> {
        if self.bus.service.is_empty() {
            return Err(MirrorError::Config("bus.service must not be empty".to_string()));
        }

        for (name, value) in [
            ("get_all_ms", self.timeouts.get_all_ms),
            ("get_ms", self.timeouts.get_ms),
            ("set_ms", self.timeouts.set_ms),
        ] {
            if value == 0 {
                return Err(MirrorError::Config(format!("timeouts.{} must be > 0", name)));
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(MirrorError::Config("logging.level must not be empty".to_string()));
        }

        Ok(())
    }

    /// Returns the call timeouts as durations.
    pub fn call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            get_all: Duration::from_millis(self.timeouts.get_all_ms),
            get: Duration::from_millis(self.timeouts.get_ms),
            set: Duration::from_millis(self.timeouts.set_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert_eq!(config.bus.kind, BusKind::System);
        assert_eq!(config.bus.service, "org.freedesktop.NetworkManager");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_timeouts_match_call_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.call_timeouts(), CallTimeouts::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = MirrorConfig::from_toml_str(
            r#"
[bus]
kind = "session"

[timeouts]
get_ms = 500
"#,
        )
        .unwrap();
        assert_eq!(config.bus.kind, BusKind::Session);
        assert_eq!(config.bus.service, "org.freedesktop.NetworkManager");
        assert_eq!(config.call_timeouts().get, Duration::from_millis(500));
        // Unspecified values should use defaults
        assert_eq!(config.timeouts.get_all_ms, 25_000);
    }

    #[test]
    fn test_empty_toml() {
        let config = MirrorConfig::from_toml_str("").unwrap();
        assert_eq!(config.timeouts.set_ms, 2_000);
    }

    #[test]
    fn test_validate_zero_timeout() {
        let err = MirrorConfig::from_toml_str("[timeouts]\nset_ms = 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: timeouts.set_ms must be > 0"
        );
    }

    #[test]
    fn test_validate_empty_service() {
        let mut config = MirrorConfig::default();
        config.bus.service.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_bus_kind() {
        assert!(MirrorConfig::from_toml_str("[bus]\nkind = \"starter\"\n").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\njson = true").unwrap();

        let config = MirrorConfig::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(matches!(
            MirrorConfig::load("/nonexistent/nm-object.conf"),
            Err(MirrorError::Io(_))
        ));
        let config = MirrorConfig::load_or_default("/nonexistent/nm-object.conf").unwrap();
        assert_eq!(config.bus.kind, BusKind::System);
    }

    #[test]
    fn test_toml_round_trip() {
        let text = MirrorConfig::default().to_toml_string().unwrap();
        assert!(text.contains("org.freedesktop.NetworkManager"));
        let parsed = MirrorConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.timeouts.get_all_ms, 25_000);
    }
}
