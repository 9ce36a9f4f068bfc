use anyhow::{Context, Result};
use sluice_wire::compression::Compression;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("unknown configuration key {0}")]
    UnknownKey(String),
}

/// Connector configuration, populated from the engine's key/value
/// properties. Defaults match an unconfigured single-worker deployment.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// TCP port bound by the bridge receiver.
    pub bridge_port: u16,
    /// SO_RCVBUF for the bridge listen socket.
    pub socket_receive_buffer_size: usize,
    /// Maximum batches queued per query before pushers block.
    pub buffer_queue_capacity: usize,
    /// Consumer poll timeout; keeps page sources responsive to cancellation.
    pub page_poll_timeout: Duration,
    /// How long the planner waits for a dynamic filter before planning
    /// without it.
    pub dynamic_filter_timeout: Duration,
    /// When true, an identity-band failure aborts the query instead of
    /// falling back to the service identity.
    pub enforce_proxy_authentication: bool,
    /// Database holding the producer-side export table operator.
    pub udf_database: String,
    /// Name of the producer-side export table operator.
    pub udf_name: String,
    /// Statically configured bridge token.
    pub static_token: Option<String>,
    /// Program whose trimmed stdout supplies the bridge token.
    pub token_script: Option<String>,
    /// Offset of the producer's wall clock from UTC, in seconds.
    pub producer_timezone_offset_seconds: i32,
    /// Schemas always exposed, even when the dictionary lookup fails.
    pub default_schemas: Vec<String>,
    /// Codec the export operator is asked to use for batch frames.
    pub compression: Compression,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            bridge_port: 9999,
            socket_receive_buffer_size: 4 * 1024 * 1024,
            buffer_queue_capacity: 100,
            page_poll_timeout: Duration::from_millis(500),
            dynamic_filter_timeout: Duration::from_secs(1),
            enforce_proxy_authentication: true,
            udf_database: "SYSLIB".to_string(),
            udf_name: "ExportTableOp".to_string(),
            static_token: None,
            token_script: None,
            producer_timezone_offset_seconds: 0,
            default_schemas: vec![],
            compression: Compression::Lz4,
        }
    }
}

fn invalid(key: &str, message: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| invalid(key, e))
}

/// Parses a `producer-timezone` value: `UTC`, `+HH:MM` or `-HH:MM`.
fn parse_timezone_offset(key: &str, value: &str) -> Result<i32, ConfigError> {
    if value == "UTC" {
        return Ok(0);
    }
    let (sign, rest) = match value.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid(key, "expected UTC, +HH:MM or -HH:MM")),
    };
    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| invalid(key, "expected UTC, +HH:MM or -HH:MM"))?;
    let hours: i32 = parse(key, hours)?;
    let minutes: i32 = parse(key, minutes)?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid(key, "offset out of range"));
    }
    Ok(sign * (hours * 3600 + minutes * 60))
}

impl ConnectorConfig {
    pub fn from_map(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (key, value) in properties {
            match key.as_str() {
                "bridge-port" => config.bridge_port = parse(key, value)?,
                "socket-receive-buffer-size" => {
                    config.socket_receive_buffer_size = parse(key, value)?
                }
                "buffer-queue-capacity" => config.buffer_queue_capacity = parse(key, value)?,
                "page-poll-timeout-ms" => {
                    config.page_poll_timeout = Duration::from_millis(parse(key, value)?)
                }
                "dynamic-filter-timeout" => {
                    config.dynamic_filter_timeout = Duration::from_millis(parse(key, value)?)
                }
                "enforce-proxy-authentication" => {
                    config.enforce_proxy_authentication = parse(key, value)?
                }
                "udf-database" => config.udf_database = value.clone(),
                "udf-name" => config.udf_name = value.clone(),
                "token" => config.static_token = Some(value.clone()),
                "token-script" => config.token_script = Some(value.clone()),
                "producer-timezone" => {
                    config.producer_timezone_offset_seconds = parse_timezone_offset(key, value)?
                }
                "default-schemas" => {
                    config.default_schemas = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                other => return Err(ConfigError::UnknownKey(other.to_string())),
            }
        }
        if config.buffer_queue_capacity == 0 {
            return Err(invalid("buffer-queue-capacity", "must be at least 1"));
        }
        Ok(config)
    }

    /// The static bridge token: the configured literal, or the trimmed
    /// stdout of `token-script` when one is set.
    pub async fn resolve_static_token(&self) -> Result<Option<String>> {
        if let Some(token) = &self.static_token {
            return Ok(Some(token.clone()));
        }
        let Some(script) = &self.token_script else {
            return Ok(None);
        };
        let output = tokio::process::Command::new(script)
            .output()
            .await
            .with_context(|| "running token-script")?;
        if !output.status.success() {
            anyhow::bail!("token-script exited with {}", output.status);
        }
        let token = String::from_utf8(output.stdout)
            .with_context(|| "token-script produced non-utf8 output")?
            .trim()
            .to_string();
        if token.is_empty() {
            anyhow::bail!("token-script produced no token");
        }
        Ok(Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(config.bridge_port, 9999);
        assert_eq!(config.socket_receive_buffer_size, 4 * 1024 * 1024);
        assert_eq!(config.buffer_queue_capacity, 100);
        assert_eq!(config.page_poll_timeout, Duration::from_millis(500));
        assert!(config.enforce_proxy_authentication);
    }

    #[test]
    fn test_from_map() {
        let properties = HashMap::from([
            ("bridge-port".to_string(), "19999".to_string()),
            ("buffer-queue-capacity".to_string(), "8".to_string()),
            ("page-poll-timeout-ms".to_string(), "250".to_string()),
            ("producer-timezone".to_string(), "+05:30".to_string()),
            ("default-schemas".to_string(), "sales, finance".to_string()),
            ("udf-name".to_string(), "ExportBridgeOp".to_string()),
        ]);
        let config = ConnectorConfig::from_map(&properties).unwrap();
        assert_eq!(config.bridge_port, 19999);
        assert_eq!(config.buffer_queue_capacity, 8);
        assert_eq!(config.page_poll_timeout, Duration::from_millis(250));
        assert_eq!(config.producer_timezone_offset_seconds, 5 * 3600 + 30 * 60);
        assert_eq!(config.default_schemas, vec!["sales", "finance"]);
        assert_eq!(config.udf_name, "ExportBridgeOp");
    }

    #[test]
    fn test_bad_values() {
        let properties = HashMap::from([("bridge-port".to_string(), "not-a-port".to_string())]);
        assert!(matches!(
            ConnectorConfig::from_map(&properties),
            Err(ConfigError::InvalidValue { .. })
        ));

        let properties = HashMap::from([("no-such-key".to_string(), "1".to_string())]);
        assert!(matches!(
            ConnectorConfig::from_map(&properties),
            Err(ConfigError::UnknownKey(_))
        ));

        let properties =
            HashMap::from([("producer-timezone".to_string(), "PST".to_string())]);
        assert!(ConnectorConfig::from_map(&properties).is_err());
    }

    #[test]
    fn test_negative_timezone() {
        assert_eq!(
            parse_timezone_offset("producer-timezone", "-03:00").unwrap(),
            -3 * 3600
        );
        assert_eq!(parse_timezone_offset("producer-timezone", "UTC").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_static_token_precedence() {
        let config = ConnectorConfig {
            static_token: Some("abc".to_string()),
            token_script: Some("/does/not/exist".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_static_token().await.unwrap(), Some("abc".to_string()));
    }
}
