use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Consumer access file
    pub access: AccessConfig,
    /// Quota persistence
    pub quota: QuotaConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Downgrade auth and quota failures to warnings
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Host name bound into shared-secret tokens. Falls back to the `Host`
    /// header when unset.
    pub name: Option<String>,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub postgrest_url: Option<String>,
    #[serde(skip_serializing)]
    pub postgrest_key: Option<String>,
    /// POI sources assumed present when no database is configured
    pub poi_sources: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid PORT value"))?,
                name: env::var("GEO6_SERVER_NAME").ok().filter(|s| !s.is_empty()),
                cors_origins: split_list(
                    &env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()),
                ),
            },
            access: AccessConfig {
                file: env::var("GEO6_ACCESS_FILE")
                    .unwrap_or_else(|_| "config/access.yaml".to_string())
                    .into(),
            },
            quota: QuotaConfig {
                directory: env::var("GEO6_QUOTA_DIR")
                    .unwrap_or_else(|_| "data/cache/quota".to_string())
                    .into(),
            },
            database: DatabaseConfig {
                postgrest_url: env::var("POSTGREST_URL").ok().filter(|s| !s.is_empty()),
                postgrest_key: env::var("POSTGREST_KEY").ok().filter(|s| !s.is_empty()),
                poi_sources: split_list(
                    &env::var("GEO6_POI_SOURCES").unwrap_or_else(|_| "urbis".to_string()),
                ),
            },
            debug: parse_flag(&env::var("GEO6_DEBUG").unwrap_or_default()),
        };

        Ok(config)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
