//! Process-wide server state: loaded indexes, connectors and job statuses

mod jobs;

pub use jobs::JobStore;

use crate::config::Config;
use crate::connectors::{Connector, ConnectorRegistry};
use crate::engine::IndexEngine;
use crate::error::{AppError, Result};
use crate::models::{IndexSettings, JobStatus, JobUpdate};
use crate::profile::ProfileSet;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// A live index: its engine and compiled search profiles
#[derive(Clone)]
pub struct IndexHandle {
    pub engine: Arc<IndexEngine>,
    pub profiles: Arc<ProfileSet>,
}

impl IndexHandle {
    pub fn settings(&self) -> &IndexSettings {
        self.engine.settings()
    }
}

/// Built once at startup and shared by every request handler.
/// `shutdown` must be called before the process exits to close the shards.
pub struct ServerState {
    config: Config,
    indexes: DashMap<String, IndexHandle>,
    failed: DashMap<String, String>,
    connectors: ConnectorRegistry,
    jobs: JobStore,
}

impl ServerState {
    pub fn new(config: Config, connectors: ConnectorRegistry) -> Self {
        let jobs = JobStore::new(
            config.engine.job_capacity,
            Duration::from_secs(config.engine.job_retention_secs),
        );
        Self {
            config,
            indexes: DashMap::new(),
            failed: DashMap::new(),
            connectors,
            jobs,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load every `*.json`, `*.yaml` and `*.yml` settings file of the
    /// configured settings directory. Returns the number of live indexes.
    /// A failing index is recorded and logged; the others still load.
    pub async fn load_indexes(&self) -> Result<usize> {
        let dir = self.config.engine.settings_path.clone();
        if !dir.exists() {
            warn!(path = %dir.display(), "Settings directory does not exist, no index loaded");
            return Ok(0);
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_settings_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let settings = match IndexSettings::load(&path) {
                Ok(settings) => settings,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to read index settings");
                    let name = path
                        .file_stem()
                        .map(|stem| stem.to_string_lossy().to_lowercase())
                        .unwrap_or_default();
                    self.failed.insert(name, e.to_string());
                    continue;
                }
            };
            // add_index already records and logs the failure
            let _ = self.add_index(settings).await;
        }

        Ok(self.indexes.len())
    }

    /// Validate settings, open the engine and compile its profiles.
    ///
    /// Any failure leaves the index unavailable and is recorded under its name.
    pub async fn add_index(&self, settings: IndexSettings) -> Result<IndexHandle> {
        let declared_name = settings.name.trim().to_lowercase();
        match self.open_index(settings).await {
            Ok(handle) => {
                self.failed.remove(handle.engine.name());
                self.indexes
                    .insert(handle.engine.name().to_string(), handle.clone());
                info!(
                    index = %handle.engine.name(),
                    shards = handle.engine.shard_count(),
                    profiles = ?handle.profiles.names(),
                    "Index loaded"
                );
                Ok(handle)
            }
            Err(e) => {
                error!(index = %declared_name, error = %e, "Index failed to load");
                if !self.indexes.contains_key(&declared_name) {
                    self.failed.insert(declared_name, e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn open_index(&self, settings: IndexSettings) -> Result<IndexHandle> {
        let settings = settings.validated()?;
        if self.indexes.contains_key(&settings.name) {
            return Err(AppError::Configuration(format!(
                "index '{}' is already loaded",
                settings.name
            )));
        }

        let engine = IndexEngine::initialize(settings, &self.config.engine.data_path).await?;

        let schema = engine.schema().clone();
        let resolve = |name: &str| {
            schema
                .has_field(name)
                .then(|| schema.resolve_field_name(name).to_string())
        };
        let profiles = match ProfileSet::compile(engine.name(), &engine.settings().profiles, &resolve) {
            Ok(profiles) => profiles,
            Err(e) => {
                if let Err(close_error) = engine.close().await {
                    warn!(index = %engine.name(), error = %close_error, "Failed to close rejected index");
                }
                return Err(e.into());
            }
        };

        Ok(IndexHandle {
            engine,
            profiles: Arc::new(profiles),
        })
    }

    fn handle(&self, index_name: &str) -> Result<IndexHandle> {
        let name = index_name.to_lowercase();
        if let Some(handle) = self.indexes.get(&name) {
            return Ok(handle.clone());
        }
        match self.failed.get(&name) {
            Some(reason) => Err(AppError::Unavailable(format!("{}: {}", name, reason.value()))),
            None => Err(AppError::NotFound(format!("index '{}'", name))),
        }
    }

    pub fn engine_for_index(&self, index_name: &str) -> Result<Arc<IndexEngine>> {
        Ok(self.handle(index_name)?.engine)
    }

    pub fn index_setting(&self, index_name: &str) -> Result<IndexSettings> {
        Ok(self.handle(index_name)?.settings().clone())
    }

    pub fn profiles_for_index(&self, index_name: &str) -> Result<Arc<ProfileSet>> {
        Ok(self.handle(index_name)?.profiles)
    }

    /// Named connector, or the index's default connector when `name` is `None`
    pub fn connector_for_index(
        &self,
        index_name: &str,
        name: Option<&str>,
    ) -> Result<Arc<dyn Connector>> {
        let handle = self.handle(index_name)?;
        let name = match name {
            Some(name) => name.to_string(),
            None => handle.settings().default_connector.clone().ok_or_else(|| {
                AppError::Validation(format!(
                    "index '{}' has no default connector, name one with 'connector'",
                    handle.engine.name()
                ))
            })?,
        };
        self.connectors
            .create(&name)
            .ok_or_else(|| AppError::NotFound(format!("connector '{}'", name)))
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub async fn update_job_status(&self, job_id: &str, update: JobUpdate) -> JobStatus {
        self.jobs.update(job_id, update).await
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        self.jobs
            .get(job_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("job '{}'", job_id)))
    }

    /// Names of the live indexes, sorted
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Indexes that failed to load, with the reason
    pub fn failed_indexes(&self) -> Vec<(String, String)> {
        let mut failed: Vec<(String, String)> = self
            .failed
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        failed.sort();
        failed
    }

    /// Close every engine. Safe to call more than once.
    pub async fn shutdown(&self) {
        let handles: Vec<IndexHandle> = self.indexes.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            if let Err(e) = handle.engine.close().await {
                error!(index = %handle.engine.name(), error = %e, "Failed to close index");
            }
        }
        info!("All indexes closed");
    }
}

fn is_settings_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())
                .as_deref(),
            Some("json") | Some("yaml") | Some("yml")
        )
}
