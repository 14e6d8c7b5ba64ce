use crate::{auth::PolicyStore, db::PoiCatalog, quota::QuotaTracker, utils::Config};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub policies: Arc<PolicyStore>,
    pub quota: Arc<QuotaTracker>,
    pub catalog: Arc<PoiCatalog>,
}

impl AppState {
    pub fn new(config: Config, policies: PolicyStore) -> Self {
        let quota = QuotaTracker::new(config.quota.directory.clone());
        let catalog = PoiCatalog::from_config(&config.database);

        Self {
            config: Arc::new(config),
            policies: Arc::new(policies),
            quota: Arc::new(quota),
            catalog: Arc::new(catalog),
        }
    }
}
