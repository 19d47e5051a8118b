//! Connection configuration for a device.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to reach a device and what to call it before it reports a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device host name or IP address
    pub host: String,
    /// Device port
    pub port: u16,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Optional local alias, used when the device does not report one
    pub alias: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9999,
            timeout_ms: 5000,
            alias: None,
        }
    }
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DeviceConfig::new("192.168.0.10");
        assert_eq!(config.host, "192.168.0.10");
        assert_eq!(config.port, 9999);
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert!(config.alias.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = DeviceConfig::new("10.0.0.2")
            .with_port(9998)
            .with_timeout_ms(2500)
            .with_alias("Desk plug");
        assert_eq!(config.port, 9998);
        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.alias.as_deref(), Some("Desk plug"));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: DeviceConfig = serde_json::from_str(r#"{"host": "plug.lan"}"#).unwrap();
        assert_eq!(config.host, "plug.lan");
        assert_eq!(config.port, 9999);
        assert_eq!(config.timeout_ms, 5000);
    }
}
