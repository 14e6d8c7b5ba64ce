use chrono::{DateTime, Local, NaiveDate};
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Call counts per action for one consumer and one calendar day
pub type QuotaRecord = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("Quota exceeded for action \"{0}\"")]
    Exceeded(String),
}

/// Result of counting one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaOutcome {
    pub counts: QuotaRecord,
    pub error: Option<QuotaError>,
}

/// Daily per-consumer call counter backed by one JSON file per consumer.
///
/// A record belongs to the calendar day of its file's modification time and
/// is discarded on the first call of a new day.
///
/// Reads and writes are not locked: two concurrent calls from the same
/// consumer may both read the same count and one increment is lost. Budgets
/// are therefore approximate.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    directory: PathBuf,
}

impl QuotaTracker {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn record_path(&self, consumer: &str) -> PathBuf {
        self.directory.join(format!("{consumer}.json"))
    }

    /// Count a call of `action` by `consumer` today.
    pub async fn record(&self, consumer: &str, action: &str, limit: Option<u64>) -> QuotaOutcome {
        self.record_on(consumer, action, limit, Local::now().date_naive())
            .await
    }

    /// Count a call as if the current date were `today`.
    ///
    /// Anonymous calls (empty consumer) are counted in memory only.
    pub async fn record_on(
        &self,
        consumer: &str,
        action: &str,
        limit: Option<u64>,
        today: NaiveDate,
    ) -> QuotaOutcome {
        let storable = is_storable(consumer);
        if !storable && !consumer.is_empty() {
            warn!(consumer, "Consumer id cannot be used as a quota file name");
        }

        let mut counts = if storable {
            self.load(consumer, today).await
        } else {
            QuotaRecord::new()
        };

        let count = counts.entry(action.to_string()).or_insert(0);
        *count += 1;
        let count = *count;

        if storable {
            if let Err(e) = self.persist(consumer, &counts).await {
                warn!(consumer, "Failed to persist quota record: {}", e);
            }
        }

        let error = limit
            .filter(|limit| count > *limit)
            .map(|_| QuotaError::Exceeded(action.to_string()));

        QuotaOutcome {
            counts,
            error,
        }
    }

    /// Current record for `consumer`; empty when absent, unreadable or from
    /// another day (in which case the file is removed).
    pub async fn load(&self, consumer: &str, today: NaiveDate) -> QuotaRecord {
        let path = self.record_path(consumer);

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return QuotaRecord::new(),
            Err(e) => {
                warn!(consumer, "Failed to stat quota record: {}", e);
                return QuotaRecord::new();
            }
        };

        let modified = match metadata.modified() {
            Ok(time) => DateTime::<Local>::from(time).date_naive(),
            Err(e) => {
                warn!(consumer, "Quota record has no modification time: {}", e);
                return QuotaRecord::new();
            }
        };

        if modified != today {
            debug!(consumer, %modified, "Quota record expired");
            if let Err(e) = fs::remove_file(&path).await {
                warn!(consumer, "Failed to remove expired quota record: {}", e);
            }
            return QuotaRecord::new();
        }

        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(consumer, "Failed to read quota record: {}", e);
                return QuotaRecord::new();
            }
        };

        serde_json::from_slice(&contents).unwrap_or_else(|e| {
            warn!(consumer, "Ignoring corrupt quota record: {}", e);
            QuotaRecord::new()
        })
    }

    async fn persist(&self, consumer: &str, counts: &QuotaRecord) -> anyhow::Result<()> {
        fs::create_dir_all(&self.directory).await?;
        let json = serde_json::to_string_pretty(counts)?;
        fs::write(self.record_path(consumer), json).await?;
        Ok(())
    }
}

fn is_storable(consumer: &str) -> bool {
    !consumer.is_empty() && !consumer.contains(['/', '\\', '\0'])
}
