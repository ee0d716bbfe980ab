//! TOML configuration, loaded once at startup.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    number: Option<String>,
    device_id: Option<u32>,
    relay_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    keepalive_path: Option<String>,
    keepalive_disconnect: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub number: String,
    pub device_id: u32,
    pub relay_url: String,
    pub username: String,
    pub password: String,
    pub keepalive_path: String,
    pub keepalive_disconnect: bool,
}

impl ReceiverConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        Ok(Self {
            number: raw.number.ok_or(ConfigError::MissingField("number"))?,
            device_id: raw.device_id.unwrap_or(1),
            relay_url: raw
                .relay_url
                .ok_or(ConfigError::MissingField("relay_url"))?,
            username: raw
                .username
                .ok_or(ConfigError::MissingField("username"))?,
            password: raw
                .password
                .ok_or(ConfigError::MissingField("password"))?,
            keepalive_path: raw
                .keepalive_path
                .unwrap_or_else(|| "/v1/keepalive".to_owned()),
            keepalive_disconnect: raw.keepalive_disconnect.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let cfg = ReceiverConfig::load_from_str(
            r#"
            number = "+15555550123"
            relay_url = "wss://relay.example.org/v1/websocket/"
            username = "+15555550123"
            password = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device_id, 1);
        assert_eq!(cfg.keepalive_path, "/v1/keepalive");
        assert!(cfg.keepalive_disconnect);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = ReceiverConfig::load_from_str(r#"number = "+15555550123""#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("relay_url")));
    }

    #[test]
    fn overrides_are_respected() {
        let cfg = ReceiverConfig::load_from_str(
            r#"
            number = "+15555550123"
            device_id = 3
            relay_url = "wss://relay.example.org/v1/websocket/"
            username = "+15555550123"
            password = "s3cret"
            keepalive_path = "/v1/ping"
            keepalive_disconnect = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device_id, 3);
        assert_eq!(cfg.keepalive_path, "/v1/ping");
        assert!(!cfg.keepalive_disconnect);
    }
}
