//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::snapshot::overrides::{ColumnOverride, LogicalType};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Railway/Docker
            port: 3000,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Namespace that gets introspected and exposed
    pub schema: String,
    /// Also select `schema` as the search path on execution connections
    pub select_schema: bool,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            schema: "public".to_string(),
            select_schema: false,
            max_pool_size: 10,
            require_tls: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Bearer token verification
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Schema refresh polling bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(300),
        }
    }
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "refresh minimum interval must be greater than zero".to_string(),
            ));
        }
        if self.min_interval > self.max_interval {
            return Err(ConfigError::InvalidValue(format!(
                "refresh minimum interval ({:?}) exceeds maximum ({:?})",
                self.min_interval, self.max_interval
            )));
        }
        Ok(())
    }
}

/// Database role handling
#[derive(Debug, Clone, Default)]
pub struct RoleConfig {
    /// Build one snapshot per configured role and route requests by role
    pub scoped_snapshots: bool,
    /// Configured roles; doubles as the allow-list for role validation
    pub roles: Vec<String>,
    /// Reject roles outside `roles` before issuing SET ROLE
    pub validate: bool,
    /// Switch role per call on execution connections
    pub role_security: bool,
}

/// Column type reinterpretation rules
#[derive(Debug, Clone, Default)]
pub struct OverrideConfig {
    pub columns: Vec<ColumnOverride>,
    /// How single-bit columns are exposed, untouched when unset
    pub bit1_as: Option<LogicalType>,
}

/// Table/column allow and deny patterns (regular expressions)
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    /// Patterns matched against `table.column`
    pub exclude_columns: Vec<String>,
}

/// Limits handed to the schema compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLimits {
    pub max_depth: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_depth: 5,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
    pub refresh: RefreshConfig,
    pub roles: RoleConfig,
    pub overrides: OverrideConfig,
    pub filter: FilterConfig,
    pub limits: QueryLimits,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: env_or("HOST", ServerConfig::default().host),
            port: env_or("PORT", ServerConfig::default().port),
        };

        // Try to load DATABASE_URL first (modern format), fall back to individual vars
        let mut database = if let Ok(database_url) = std::env::var("DATABASE_URL") {
            Self::parse_database_url(&database_url)?
        } else {
            DatabaseConfig {
                host: std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env_or("DB_PORT", 5432),
                user: std::env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: std::env::var("DB_PASSWORD").unwrap_or_default(),
                database: std::env::var("DB_NAME").unwrap_or_else(|_| "postgres".to_string()),
                ..DatabaseConfig::default()
            }
        };
        database.max_pool_size = env_or("DB_MAX_CONNECTIONS", 10);
        if let Ok(schema) = std::env::var("DB_SCHEMA") {
            database.schema = schema;
        }
        database.select_schema = env_or("DB_SELECT_SCHEMA", false);

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| split_list(&s))
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let auth = AuthConfig {
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "liveschema-dev-secret-change-in-production".to_string()),
        };

        let refresh = RefreshConfig {
            min_interval: Duration::from_secs(env_or("REFRESH_MIN_INTERVAL_SECS", 5)),
            max_interval: Duration::from_secs(env_or("REFRESH_MAX_INTERVAL_SECS", 300)),
        };

        let roles = RoleConfig {
            scoped_snapshots: env_or("ROLE_SCOPED_SNAPSHOTS", false),
            roles: std::env::var("DB_ROLES")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            validate: env_or("ROLE_VALIDATION", true),
            role_security: env_or("ROLE_SECURITY", false),
        };

        let overrides = OverrideConfig {
            columns: match std::env::var("COLUMN_TYPE_OVERRIDES") {
                Ok(raw) => parse_column_overrides(&raw)?,
                Err(_) => Vec::new(),
            },
            bit1_as: match std::env::var("BIT1_AS") {
                Ok(raw) => Some(raw.parse().map_err(ConfigError::ParseError)?),
                Err(_) => None,
            },
        };

        let filter = FilterConfig {
            include_tables: env_list("INCLUDE_TABLES"),
            exclude_tables: env_list("EXCLUDE_TABLES"),
            exclude_columns: env_list("EXCLUDE_COLUMNS"),
        };

        let defaults = QueryLimits::default();
        let limits = QueryLimits {
            max_depth: env_or("API_MAX_DEPTH", defaults.max_depth),
            default_page_size: env_or("API_DEFAULT_PAGE_SIZE", defaults.default_page_size),
            max_page_size: env_or("API_MAX_PAGE_SIZE", defaults.max_page_size),
        };

        let settings = Self {
            server,
            database,
            cors,
            auth,
            refresh,
            roles,
            overrides,
            filter,
            limits,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.refresh.validate()?;

        if self.roles.scoped_snapshots && self.roles.roles.is_empty() {
            return Err(ConfigError::InvalidValue(
                "ROLE_SCOPED_SNAPSHOTS requires at least one role in DB_ROLES".to_string(),
            ));
        }
        // Role snapshots list what a role may touch; rows must be read as that role too
        if self.roles.scoped_snapshots && !self.roles.role_security {
            return Err(ConfigError::InvalidValue(
                "ROLE_SCOPED_SNAPSHOTS requires ROLE_SECURITY=true".to_string(),
            ));
        }
        if self.roles.roles.iter().any(|r| r.is_empty()) {
            return Err(ConfigError::InvalidValue("DB_ROLES contains an empty role".to_string()));
        }
        if self.limits.default_page_size == 0
            || self.limits.default_page_size > self.limits.max_page_size
        {
            return Err(ConfigError::InvalidValue(format!(
                "default page size {} must be within 1..={}",
                self.limits.default_page_size, self.limits.max_page_size
            )));
        }
        if self.database.schema.is_empty() {
            return Err(ConfigError::InvalidValue("DB_SCHEMA must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        // Neon requires TLS
        let require_tls = host.contains("neon.tech")
            || parsed
                .query_pairs()
                .any(|(k, v)| k == "sslmode" && v == "require");

        Ok(DatabaseConfig {
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            host,
            database,
            require_tls,
            ..DatabaseConfig::default()
        })
    }
}

/// Parse `table.column=type` pairs separated by commas
pub fn parse_column_overrides(raw: &str) -> Result<Vec<ColumnOverride>, ConfigError> {
    split_list(raw)
        .into_iter()
        .map(|entry| {
            let (target, kind) = entry.split_once('=').ok_or_else(|| {
                ConfigError::ParseError(format!("override '{}' is not table.column=type", entry))
            })?;
            let (table, column) = target.trim().split_once('.').ok_or_else(|| {
                ConfigError::ParseError(format!("override target '{}' is not table.column", target))
            })?;
            Ok(ColumnOverride {
                table: table.to_string(),
                column: column.to_string(),
                as_type: kind.trim().parse().map_err(ConfigError::ParseError)?,
            })
        })
        .collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key).map(|s| split_list(&s)).unwrap_or_default()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            cors: CorsConfig::default(),
            auth: AuthConfig {
                jwt_secret: "test".to_string(),
            },
            refresh: RefreshConfig::default(),
            roles: RoleConfig::default(),
            overrides: OverrideConfig::default(),
            filter: FilterConfig::default(),
            limits: QueryLimits::default(),
        }
    }

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_default_database_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.schema, "public");
    }

    #[test]
    fn test_refresh_bounds_validation() {
        let inverted = RefreshConfig {
            min_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(10),
        };
        assert!(inverted.validate().is_err());

        let zero = RefreshConfig {
            min_interval: Duration::ZERO,
            max_interval: Duration::from_secs(10),
        };
        assert!(zero.validate().is_err());

        assert!(RefreshConfig::default().validate().is_ok());
    }

    #[test]
    fn test_scoped_snapshots_require_roles() {
        let mut s = settings();
        s.roles.scoped_snapshots = true;
        assert!(s.validate().is_err());

        s.roles.roles = vec!["analyst".to_string()];
        assert!(s.validate().is_err());

        s.roles.role_security = true;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_parse_database_url() {
        let db = Settings::parse_database_url("postgresql://app:pw@db.example:6543/shop?sslmode=require")
            .unwrap();
        assert_eq!(db.host, "db.example");
        assert_eq!(db.port, 6543);
        assert_eq!(db.user, "app");
        assert_eq!(db.password, "pw");
        assert_eq!(db.database, "shop");
        assert!(db.require_tls);

        assert!(Settings::parse_database_url("postgresql://app@db.example").is_err());
    }

    #[test]
    fn test_parse_column_overrides() {
        let parsed = parse_column_overrides("users.id=uuid, flags.active = boolean").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].table, "users");
        assert_eq!(parsed[0].column, "id");
        assert_eq!(parsed[0].as_type, LogicalType::Uuid);
        assert_eq!(parsed[1].as_type, LogicalType::Boolean);

        assert!(parse_column_overrides("users.id").is_err());
        assert!(parse_column_overrides("id=uuid").is_err());
        assert!(parse_column_overrides("users.id=money").is_err());
    }
}
