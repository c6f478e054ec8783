//! Coordinator configuration
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. Environment variables prefixed `FUTURA_` (e.g. `FUTURA_HOST`)

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FuturaError, FuturaResult};

/// Highest unit id addressable on a Modbus bus
pub const MAX_UNIT_ID: u8 = 247;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "FUTURA_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuturaConfig {
    /// Device hostname or IP (required)
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub poll_interval_secs: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for FuturaConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: crate::DEFAULT_TCP_PORT,
            unit_id: 1,
            poll_interval_secs: crate::DEFAULT_POLL_INTERVAL_SECS,
            connect_timeout_ms: crate::DEFAULT_TIMEOUT_MS,
            request_timeout_ms: crate::DEFAULT_TIMEOUT_MS,
        }
    }
}

impl FuturaConfig {
    /// Configuration for `host` with every other setting at its default
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Layer defaults, the optional file and the environment, then validate.
    pub fn load(path: Option<&Path>) -> FuturaResult<Self> {
        let config = Self::extract(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Layer the sources without validating the result.
    pub fn extract(path: Option<&Path>) -> FuturaResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(FuturaError::configuration(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            debug!("Loading configuration from {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX)).extract()?)
    }

    pub fn validate(&self) -> FuturaResult<()> {
        if self.host.trim().is_empty() {
            return Err(FuturaError::configuration("host must not be empty"));
        }
        if self.unit_id > MAX_UNIT_ID {
            return Err(FuturaError::configuration(format!(
                "unit_id {} exceeds {}",
                self.unit_id, MAX_UNIT_ID
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(FuturaError::configuration("poll_interval_secs must be positive"));
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(FuturaError::configuration("timeouts must be positive"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = FuturaConfig::for_host("10.0.0.5");
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(FuturaConfig::default().validate().is_err());

        let mut config = FuturaConfig::for_host("futura");
        config.unit_id = 248;
        assert!(matches!(
            config.validate(),
            Err(FuturaError::Configuration { .. })
        ));

        let mut config = FuturaConfig::for_host("futura");
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = FuturaConfig::for_host("futura");
        config.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "futura.toml",
                r#"
                    host = "192.168.1.40"
                    unit_id = 3
                    poll_interval_secs = 10
                "#,
            )?;
            jail.set_env("FUTURA_PORT", "1502");
            jail.set_env("FUTURA_POLL_INTERVAL_SECS", "2");

            let config = FuturaConfig::load(Some(Path::new("futura.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.host, "192.168.1.40");
            assert_eq!(config.unit_id, 3);
            assert_eq!(config.port, 1502);
            assert_eq!(config.poll_interval_secs, 2);
            assert_eq!(config.request_timeout_ms, 5000);
            Ok(())
        });
    }

    #[test]
    fn test_load_env_only() {
        Jail::expect_with(|jail| {
            jail.set_env("FUTURA_HOST", "futura.lan");
            let config = FuturaConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.host, "futura.lan");
            assert_eq!(config.port, 502);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_missing_host() {
        Jail::expect_with(|_jail| {
            let err = FuturaConfig::load(None).unwrap_err();
            assert!(matches!(err, FuturaError::Configuration { .. }));
            Ok(())
        });
    }

    #[test]
    fn test_extract_skips_validation() {
        Jail::expect_with(|_jail| {
            let config = FuturaConfig::extract(None).map_err(|e| e.to_string())?;
            assert!(config.host.is_empty());
            assert!(config.validate().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_load_missing_file() {
        let err = FuturaConfig::load(Some(Path::new("/nonexistent/futura.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
