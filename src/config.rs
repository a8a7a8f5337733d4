use crate::{
    error::{GatewayError, Result},
    model::Participant,
    protocol::{Descriptor, Location},
    registry::CapabilityMatch,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Parameters the gateway core is constructed with.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub fanout_timeout_ms: u64,
    /// How long a finalized transaction is kept for retrieval. `None` keeps it
    /// until the requester takes the result.
    pub retention_seconds: Option<u64>,
    pub delivery_timeout_ms: u64,
    pub capability_match: CapabilityMatch,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub subscriber_id: String,
    pub subscriber_uri: String,
    pub domain: String,
    pub version: String,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub city_code: Option<String>,
    pub city_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4030,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            fanout_timeout_ms: 5_000,
            retention_seconds: Some(300),
            delivery_timeout_ms: 2_000,
            capability_match: CapabilityMatch::Exact,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            subscriber_id: "deg-gateway.local".to_string(),
            subscriber_uri: "http://localhost:4030".to_string(),
            domain: "energy".to_string(),
            version: "1.1.0".to_string(),
            country_code: Some("IND".to_string()),
            country_name: Some("India".to_string()),
            city_code: Some("std:522".to_string()),
            city_name: Some("Lucknow".to_string()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("plain".to_string()),
        }
    }
}

impl GatewayConfig {
    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }

    pub fn retention_window(&self) -> Option<Duration> {
        self.retention_seconds.map(Duration::from_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl ProtocolConfig {
    pub fn location(&self) -> Option<Location> {
        match (&self.country_code, &self.city_code) {
            (Some(country_code), Some(city_code)) => Some(Location {
                country: Descriptor {
                    name: self.country_name.clone().unwrap_or_default(),
                    code: country_code.clone(),
                },
                city: Descriptor {
                    name: self.city_name.clone().unwrap_or_default(),
                    code: city_code.clone(),
                },
            }),
            _ => None,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = toml::from_str(&config_str)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Layers `DEG_GATEWAY_<SECTION>__<KEY>` environment variables over the
    /// file, e.g. `DEG_GATEWAY_SERVER__PORT=8080`.
    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix("DEG_GATEWAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to load config: {}", e)))?;

        let mut config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(GatewayError::Config("Server port cannot be 0".to_string()));
        }

        if self.gateway.fanout_timeout_ms == 0 {
            return Err(GatewayError::Config("Fan-out timeout must be greater than 0".to_string()));
        }

        if self.protocol.subscriber_id.is_empty() {
            return Err(GatewayError::Config("Subscriber id cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for participant in &self.participants {
            participant
                .validate()
                .map_err(|e| GatewayError::Config(e.to_string()))?;
            if participant.capabilities.is_empty() {
                return Err(GatewayError::Config(format!(
                    "Participant {} declares no capabilities",
                    participant.id
                )));
            }
            if !seen.insert(participant.id.as_str()) {
                return Err(GatewayError::Config(format!(
                    "Participant {} is listed twice",
                    participant.id
                )));
            }
        }

        Ok(())
    }

    pub fn get_server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| GatewayError::Config(format!("Failed to serialize default config: {}", e)))?;

    std::fs::write(path, toml_str)
        .map_err(|e| GatewayError::Config(format!("Failed to write default config file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 4030);
        assert_eq!(config.gateway.fanout_timeout(), Duration::from_secs(5));
        assert_eq!(config.protocol.domain, "energy");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.participants = vec![
            Participant::new("r1", "http://localhost:9001", ["solar"]),
            Participant::new("r1", "http://localhost:9002", ["wind"]),
        ];
        assert!(config.validate().is_err());

        config.participants = vec![Participant::new("r1", "http://localhost:9001", Vec::<String>::new())];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        create_default_config_file(path).unwrap();
        assert!(path.exists());

        let loaded_config = tokio_test::assert_ok!(AppConfig::load(path));
        assert_eq!(loaded_config.server.port, 4030);
        assert_eq!(loaded_config.gateway.retention_seconds, Some(300));
    }

    #[test]
    fn test_participants_section() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            r#"
[gateway]
fanout_timeout_ms = 1500
capability_match = "prefix"

[[participants]]
id = "bpp-solar"
endpoint = "http://localhost:9001"
capabilities = ["energy.solar"]
"#,
        )
        .unwrap();

        let config = AppConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.gateway.fanout_timeout_ms, 1500);
        assert_eq!(config.gateway.capability_match, CapabilityMatch::Prefix);
        assert_eq!(config.server.port, 4030);
        assert_eq!(config.participants.len(), 1);
        assert!(config.participants[0].has_capability("energy.solar"));
        assert!(config.validate().is_ok());
    }
}
