//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ingest::config::{IngestConfig, OrchestratorConfig};
use crate::storage::config::StorageConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 3000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/pimsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Read `key` and parse it, falling back to `default` when unset or unparsable.
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub services: Services,
}

/// Which of the three sync services this process hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Services {
    pub stager: bool,
    pub loader: bool,
    pub orchestrator: bool,
}

impl Services {
    pub fn all() -> Self {
        Self { stager: true, loader: true, orchestrator: true }
    }

    pub fn none() -> Self {
        Self { stager: false, loader: false, orchestrator: false }
    }

    /// The loader is the only service that talks to Postgres.
    pub fn needs_database(&self) -> bool {
        self.loader
    }

    pub fn needs_storage(&self) -> bool {
        self.stager || self.loader
    }
}

impl FromStr for Services {
    type Err = anyhow::Error;

    /// Parse a comma separated list such as `stager,loader`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut services = Services::none();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.to_lowercase().as_str() {
                "stager" | "fetcher" => services.stager = true,
                "loader" | "maintainer" => services.loader = true,
                "orchestrator" => services.orchestrator = true,
                "all" => services = Services::all(),
                other => anyhow::bail!("Unknown service '{}' in PIMSYNC_SERVICES", other),
            }
        }
        Ok(services)
    }
}

/// Shared secret checked on every administrative endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub admin_key: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("admin_key", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let services = match std::env::var("PIMSYNC_SERVICES") {
            Ok(list) => list.parse()?,
            Err(_) => Services::all(),
        };

        let config = Config {
            server: ServerConfig {
                host: std::env::var("PIMSYNC_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_parse("PIMSYNC_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse(
                    "PIMSYNC_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
                services,
            },
            auth: AuthConfig {
                admin_key: std::env::var("ADMIN_KEY").unwrap_or_default(),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_parse(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            storage: StorageConfig::from_env(),
            ingest: IngestConfig::from_env(),
            orchestrator: OrchestratorConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for the services that are enabled
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        let services = self.server.services;
        if services == Services::none() {
            anyhow::bail!("PIMSYNC_SERVICES must enable at least one service");
        }

        if self.auth.admin_key.trim().is_empty() {
            anyhow::bail!("ADMIN_KEY must be set");
        }

        if services.needs_database() {
            if self.database.url.is_empty() {
                anyhow::bail!("Database URL cannot be empty");
            }
            if self.database.max_connections == 0 {
                anyhow::bail!("Database max_connections must be greater than 0");
            }
            if self.database.min_connections > self.database.max_connections {
                anyhow::bail!(
                    "Database min_connections ({}) cannot be greater than max_connections ({})",
                    self.database.min_connections,
                    self.database.max_connections
                );
            }
        }

        if services.needs_storage() {
            self.storage.validate()?;
        }

        self.ingest.validate(services.stager)?;

        if services.orchestrator {
            self.orchestrator.validate()?;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                services: Services::all(),
            },
            auth: AuthConfig { admin_key: String::new() },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            storage: StorageConfig::default(),
            ingest: IngestConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.auth.admin_key = "secret".to_string();
        config.ingest.upstream.key_id = "id".to_string();
        config.ingest.upstream.key_secret = "shh".to_string();
        config
    }

    #[test]
    fn test_services_parse() {
        let services: Services = "stager, orchestrator".parse().unwrap();
        assert!(services.stager);
        assert!(!services.loader);
        assert!(services.orchestrator);

        let legacy: Services = "fetcher,maintainer".parse().unwrap();
        assert!(legacy.stager && legacy.loader && !legacy.orchestrator);

        assert_eq!("all".parse::<Services>().unwrap(), Services::all());
        assert!("scheduler".parse::<Services>().is_err());
    }

    #[test]
    fn test_missing_admin_key_is_rejected() {
        let mut config = valid_config();
        config.auth.admin_key = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_services_is_rejected() {
        let mut config = valid_config();
        config.server.services = Services::none();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_only_checked_for_loader() {
        let mut config = valid_config();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        config.server.services = "stager,orchestrator".parse().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_admin_key_is_redacted_in_debug() {
        let config = valid_config();
        let debug = format!("{:?}", config.auth);
        assert!(!debug.contains("secret"));
    }
}
