//! Session configuration.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then environment
//! variables prefixed with `SIGLENT_`. Nested fields use a double underscore, e.g.
//! `SIGLENT_TRANSPORT__TIMEOUT_MS=2000`.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "SIGLENT_";

/// How a session is opened and driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lock the front panel (`SYST:REMOTE:STATE 1`) when the session opens.
    pub lock_front_panel: bool,
    pub refresh_on_open: bool,
    /// Write back values the initial refresh found outside their bounds.
    pub flush_clamped_on_refresh: bool,
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lock_front_panel: true,
            refresh_on_open: true,
            flush_clamped_on_refresh: false,
            transport: TransportConfig::default(),
        }
    }
}

/// Line framing of the SCPI channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// One or two bytes appended to every command
    pub termination: String,
    pub max_reply_len: usize,
    /// Read timeout for byte interfaces that support one
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            termination: "\n".into(),
            max_reply_len: 256,
            timeout_ms: 1000,
        }
    }
}

impl SessionConfig {
    /// Defaults, overridden by `path` if it exists, overridden by the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(SessionConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: SessionConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let termination = &self.transport.termination;
        if termination.is_empty() || termination.len() > 2 {
            return Err(Error::InvalidValue {
                path: "transport.termination".into(),
                value: termination.clone(),
            });
        }
        if self.transport.max_reply_len == 0 {
            return Err(Error::InvalidValue {
                path: "transport.max_reply_len".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let config = SessionConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config, SessionConfig::default());
            assert!(config.lock_front_panel);
            assert_eq!(config.transport.termination, "\n");
            Ok(())
        });
    }

    #[test]
    fn file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "siglent.toml",
                r#"
                    lock_front_panel = false

                    [transport]
                    termination = "\r\n"
                    timeout_ms = 500
                "#,
            )?;
            jail.set_env("SIGLENT_TRANSPORT__TIMEOUT_MS", "2000");
            jail.set_env("SIGLENT_FLUSH_CLAMPED_ON_REFRESH", "true");

            let config =
                SessionConfig::load(Some(Path::new("siglent.toml"))).map_err(|e| e.to_string())?;
            assert!(!config.lock_front_panel);
            assert!(config.flush_clamped_on_refresh);
            assert!(config.refresh_on_open);
            assert_eq!(config.transport.termination, "\r\n");
            assert_eq!(config.transport.timeout_ms, 2000);
            assert_eq!(config.transport.max_reply_len, 256);
            Ok(())
        });
    }

    #[test]
    fn invalid_termination_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("siglent.toml", "[transport]\ntermination = \"\"\n")?;
            let result = SessionConfig::load(Some(Path::new("siglent.toml")));
            assert!(matches!(result, Err(Error::InvalidValue { .. })));
            Ok(())
        });
    }

    #[test]
    fn malformed_values_are_config_errors() {
        Jail::expect_with(|jail| {
            jail.set_env("SIGLENT_TRANSPORT__MAX_REPLY_LEN", "lots");
            assert!(matches!(SessionConfig::load(None), Err(Error::Config(_))));
            Ok(())
        });
    }
}
