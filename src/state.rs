use std::sync::Arc;

use crate::{config::AppConfig, db::PgPool, storage::FileStorage, store::DocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub documents: DocumentStore,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, storage: Arc<dyn FileStorage>) -> Self {
        Self {
            documents: DocumentStore::new(pool.clone(), storage),
            pool,
            config: Arc::new(config),
        }
    }
}
