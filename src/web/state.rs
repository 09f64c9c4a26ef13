use std::{env, sync::Arc};

use anyhow::{Context, Result};

use crate::{
    config::AnalysisSettings,
    store::{AnalysisStore, PgStore},
    worker::WorkerClient,
};

/// Shared application state. Generic over the store seam so the HTTP
/// surface can be exercised against the in-memory store in tests.
#[derive(Clone)]
pub struct AppState<S = PgStore> {
    store: S,
    worker: WorkerClient,
    settings: Arc<AnalysisSettings>,
}

impl AppState<PgStore> {
    pub async fn new() -> Result<Self> {
        let settings = AnalysisSettings::from_env()?;

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;
        let store = PgStore::connect(&database_url).await?;

        let worker = WorkerClient::new(settings.worker_url.clone());

        Ok(Self {
            store,
            worker,
            settings: Arc::new(settings),
        })
    }
}

impl<S: AnalysisStore> AppState<S> {
    pub fn with_store(store: S, worker: WorkerClient, settings: AnalysisSettings) -> Self {
        Self {
            store,
            worker,
            settings: Arc::new(settings),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn worker(&self) -> &WorkerClient {
        &self.worker
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }
}
