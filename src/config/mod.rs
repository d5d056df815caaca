use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub db: DbConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    pub connection: ConnectionConfig,
    #[serde(default = "default_list_per_page")]
    pub list_per_page: u32,
    /// Insert the default admin account during bootstrap.
    #[serde(default)]
    pub seed_admin: bool,
}

fn default_list_per_page() -> u32 {
    10
}

#[derive(Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Connect timeout in milliseconds. Also the idle period after which the
    /// connection is reclaimed.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_db_port() -> u16 {
    3306
}

fn default_connect_timeout_ms() -> u64 {
    60_000
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// Hand-written so the password never lands in logs.
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// OTLP/JSON metrics endpoint.
    pub url: String,
    /// Value of the `source` attribute attached to every data point.
    pub source: String,
    pub api_key: String,
    /// Overrides the environment default (60s production, 5s development).
    pub batch_interval_ms: Option<u64>,
    /// Overrides the environment default (10s production, 2s development).
    pub collection_interval_ms: Option<u64>,
}

impl MetricsConfig {
    pub fn batch_interval(&self, environment: Environment) -> Duration {
        let default = match environment {
            Environment::Development => 5_000,
            Environment::Production => 60_000,
        };
        Duration::from_millis(self.batch_interval_ms.unwrap_or(default))
    }

    pub fn collection_interval(&self, environment: Environment) -> Duration {
        let default = match environment {
            Environment::Development => 2_000,
            Environment::Production => 10_000,
        };
        Duration::from_millis(self.collection_interval_ms.unwrap_or(default))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoggingConfig {
    /// Loki push endpoint. Log shipping is disabled when unset.
    pub url: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub api_key: String,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load(config_path: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::File::with_name(config_path));

        // Add environment variables with prefix PIZZA_
        // Example: PIZZA_DB__CONNECTION__HOST=db.internal
        builder = builder.add_source(
            config::Environment::with_prefix("PIZZA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.db.connection.database.trim().is_empty() {
            anyhow::bail!("Database config requires 'db.connection.database'");
        }
        if !self
            .db
            .connection
            .database
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!(
                "Invalid database name '{}': only alphanumeric and _ allowed",
                self.db.connection.database
            );
        }
        if self.db.connection.connect_timeout_ms == 0 {
            anyhow::bail!("'db.connection.connect_timeout_ms' must be greater than zero");
        }
        if self.db.list_per_page == 0 {
            anyhow::bail!("'db.list_per_page' must be greater than zero");
        }
        if self.metrics.url.is_empty() {
            anyhow::bail!("Metrics config requires 'url'");
        }
        if self.metrics.batch_interval_ms == Some(0) || self.metrics.collection_interval_ms == Some(0)
        {
            anyhow::bail!("Metric intervals must be greater than zero");
        }

        Ok(())
    }
}
