//! Configuration management for Tollbooth.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TollboothError};
use crate::ratelimit::LimiterOptions;

/// Prefix of environment variables overriding file settings.
const ENV_PREFIX: &str = "TOLLBOOTH";

/// Main configuration for a Tollbooth deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollboothConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterOptions,
}

/// Where the counter table lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; the scheme selects the store
    #[serde(default = "default_url")]
    pub url: String,

    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_url() -> String {
    "sqlite://tollbooth.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// The store a database URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// `postgres://` or `postgresql://`
    Postgres,
    /// `sqlite:`
    Sqlite,
    /// `memory:`
    Memory,
}

impl DatabaseConfig {
    /// Determine the store from the URL scheme.
    pub fn store_kind(&self) -> Result<StoreKind> {
        let scheme = self.url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "sqlite" => Ok(StoreKind::Sqlite),
            "memory" => Ok(StoreKind::Memory),
            other => Err(TollboothError::Config(format!(
                "Unsupported database scheme {:?}",
                other
            ))),
        }
    }
}

impl TollboothConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollboothConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollboothError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file overlaid with the environment.
    ///
    /// Environment variables use the `TOLLBOOTH__` prefix and `__` between
    /// path segments, e.g. `TOLLBOOTH__LIMITER__POINTS=20`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config: TollboothConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollboothError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration as a whole.
    pub fn validate(&self) -> Result<()> {
        self.database.store_kind()?;
        if self.database.max_connections == 0 {
            return Err(TollboothError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        self.limiter.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TollboothConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.store_kind().unwrap(), StoreKind::Sqlite);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
database:
  url: postgres://limiter@localhost/limits
  max_connections: 12
limiter:
  points: 100
  duration: 60
  block_duration: 300
  key_prefix: api
  schema_name: edge
"#;
        let config = TollboothConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.database.store_kind().unwrap(), StoreKind::Postgres);
        assert_eq!(config.database.max_connections, 12);
        assert_eq!(config.limiter.points, 100);
        assert_eq!(config.limiter.duration, 60);
        assert_eq!(config.limiter.block_duration, 300);
        assert_eq!(config.limiter.key_prefix, "api");
        assert_eq!(config.limiter.schema_name.as_deref(), Some("edge"));
        assert_eq!(config.limiter.table_name, "rate_limits");
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let yaml = r#"
database:
  url: mysql://localhost/limits
"#;
        assert!(matches!(
            TollboothConfig::from_yaml(yaml),
            Err(TollboothError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_limiter() {
        let yaml = r#"
limiter:
  table_name: "drop table"
"#;
        assert!(TollboothConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_store_kinds() {
        let kind = |url: &str| {
            DatabaseConfig {
                url: url.to_string(),
                max_connections: 1,
            }
            .store_kind()
        };

        assert_eq!(kind("postgresql://db/x").unwrap(), StoreKind::Postgres);
        assert_eq!(kind("sqlite::memory:").unwrap(), StoreKind::Sqlite);
        assert_eq!(kind("memory:").unwrap(), StoreKind::Memory);
        assert!(kind("limits.db").is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = TollboothConfig::load(None).unwrap();
        assert_eq!(config.limiter.points, LimiterOptions::default().points);
    }
}
