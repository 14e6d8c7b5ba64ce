use crate::utils::config::DatabaseConfig;
use anyhow::{anyhow, Result};
use postgrest::Postgrest;
use serde::Deserialize;

/// View exposing the tables of the `poi` schema, one row per source
pub const POI_SOURCES_VIEW: &str = "poi_sources";

/// Database client wrapper for the PostgREST endpoint in front of PostGIS
#[derive(Clone)]
pub struct Database {
    client: Postgrest,
}

#[derive(Debug, Deserialize)]
struct PoiSourceRow {
    table_name: String,
}

impl Database {
    pub fn new(url: &str, key: Option<&str>) -> Self {
        let mut client = Postgrest::new(url.trim_end_matches('/'));
        if let Some(key) = key {
            client = client
                .insert_header("apikey", key)
                .insert_header("Authorization", format!("Bearer {}", key));
        }

        Self { client }
    }

    /// Names of the POI tables present in the database
    pub async fn poi_sources(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .from(POI_SOURCES_VIEW)
            .select("table_name")
            .execute()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("POI source query failed with status {}: {}", status, body));
        }

        let body = response.text().await?;
        let rows: Vec<PoiSourceRow> = serde_json::from_str(&body)?;
        Ok(rows.into_iter().map(|row| row.table_name).collect())
    }
}

/// Where the list of existing POI sources comes from
#[derive(Clone)]
pub enum PoiCatalog {
    /// Fixed list, used when no database is configured
    Static(Vec<String>),
    Database(Database),
}

impl PoiCatalog {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        match &config.postgrest_url {
            Some(url) => Self::Database(Database::new(url, config.postgrest_key.as_deref())),
            None => Self::Static(config.poi_sources.clone()),
        }
    }

    pub async fn poi_sources(&self) -> Result<Vec<String>> {
        match self {
            Self::Static(sources) => Ok(sources.clone()),
            Self::Database(db) => db.poi_sources().await,
        }
    }
}
