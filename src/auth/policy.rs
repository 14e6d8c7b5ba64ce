use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    net::IpAddr,
    path::Path,
};

/// Address sources every consumer may query
pub const DEFAULT_ADDRESS_SOURCES: [&str; 2] = ["crab", "urbis"];

/// Address sources known to the geocoder
pub const KNOWN_ADDRESS_SOURCES: [&str; 3] = ["crab", "picc", "urbis"];

/// POI sources every consumer may query
pub const DEFAULT_POI_SOURCES: [&str; 1] = ["urbis"];

/// Access rules for one consumer
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Vec<IpAddr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<HashMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseGrantConfig>,
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("secret", &"<redacted>")
            .field("referer", &self.referer)
            .field("ip", &self.ip)
            .field("limit", &self.limit)
            .field("database", &self.database)
            .finish()
    }
}

/// Additional sources granted on top of the defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseGrantConfig {
    #[serde(default)]
    pub address: Option<Vec<String>>,
    #[serde(default)]
    pub poi: Option<Vec<String>>,
}

/// Sources a consumer may query on this request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseGrants {
    pub address: Vec<String>,
    pub poi: Vec<String>,
}

impl AccessPolicy {
    /// Always true when the policy does not restrict referers.
    pub fn allows_referer(&self, referer_host: Option<&str>) -> bool {
        match &self.referer {
            None => true,
            Some(hosts) => referer_host.is_some_and(|host| hosts.iter().any(|h| h == host)),
        }
    }

    pub fn allows_ip(&self, ip: Option<IpAddr>) -> bool {
        match &self.ip {
            None => true,
            Some(allowed) => ip.is_some_and(|ip| allowed.contains(&ip)),
        }
    }

    pub fn limit(&self, action: &str) -> Option<u64> {
        self.limit.as_ref().and_then(|limits| limits.get(action)).copied()
    }
}

/// Consumer policies, loaded once at start-up and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    policies: HashMap<String, AccessPolicy>,
}

impl PolicyStore {
    pub fn new(policies: HashMap<String, AccessPolicy>) -> Self {
        Self { policies }
    }

    /// Parse a YAML mapping of consumer id to policy.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let policies: Option<HashMap<String, AccessPolicy>> =
            serde_yaml::from_str(yaml).context("Invalid access configuration")?;
        Ok(Self::new(policies.unwrap_or_default()))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read access file {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn lookup(&self, consumer: &str) -> Option<&AccessPolicy> {
        self.policies.get(consumer)
    }

    pub fn consumers(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Call limit for `action`, `None` meaning unlimited.
    pub fn limit(&self, consumer: &str, action: &str) -> Option<u64> {
        self.lookup(consumer).and_then(|policy| policy.limit(action))
    }

    /// Merge the default sources with the consumer's grants.
    ///
    /// Grants that name sources that do not exist are dropped silently:
    /// address sources must be known to the geocoder, POI sources must be
    /// present in `available_poi`.
    pub fn resolve_database_grants(&self, consumer: &str, available_poi: &[String]) -> DatabaseGrants {
        let grants = self
            .lookup(consumer)
            .and_then(|policy| policy.database.as_ref());

        let address = merge(&DEFAULT_ADDRESS_SOURCES, grants.and_then(|g| g.address.as_deref()))
            .into_iter()
            .filter(|source| KNOWN_ADDRESS_SOURCES.contains(&source.as_str()))
            .collect();

        let poi = merge(&DEFAULT_POI_SOURCES, grants.and_then(|g| g.poi.as_deref()))
            .into_iter()
            .filter(|source| available_poi.contains(source))
            .collect();

        DatabaseGrants { address, poi }
    }
}

fn merge(defaults: &[&str], extra: Option<&[String]>) -> BTreeSet<String> {
    defaults
        .iter()
        .map(|s| s.to_string())
        .chain(extra.unwrap_or_default().iter().cloned())
        .collect()
}
