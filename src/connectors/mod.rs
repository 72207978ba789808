//! Connectors feed documents from an external source into an index engine.
//!
//! A connector receives an [`IndexRequest`], pushes one
//! [`IndexDocumentRequest`](crate::models::IndexDocumentRequest) per source
//! record onto the engine and posts job status under the request id. Bulk
//! runs are bracketed by `bulk_indexing(true)` and `bulk_indexing(false)`.
//!
//! Connectors are looked up by name in a [`ConnectorRegistry`] that is
//! populated explicitly at startup.

mod jsonl;

pub use jsonl::JsonlConnector;

use crate::engine::IndexEngine;
use crate::error::Result;
use crate::models::{IndexRequest, JobState, JobUpdate};
use crate::state::JobStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// What a connector run needs besides its request
#[derive(Clone)]
pub struct ConnectorContext {
    pub engine: Arc<IndexEngine>,
    pub jobs: JobStore,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Registry name of this connector
    fn name(&self) -> &str;

    /// Run one job to completion, posting progress to `ctx.jobs`.
    /// An `Err` is recorded as the job's `error` state by the caller.
    async fn run(&self, request: IndexRequest, ctx: ConnectorContext) -> Result<()>;
}

type ConnectorFactory = Arc<dyn Fn() -> Arc<dyn Connector> + Send + Sync>;

/// Connector constructors by name
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the connectors shipped with the server
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(JsonlConnector::NAME, || Arc::new(JsonlConnector::new()));
        registry
    }

    /// Register a factory; a later registration under the same name wins
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Connector> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_lowercase(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.factories
            .get(&name.to_lowercase())
            .map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Post the `preparing` status, then run the connector in the background.
/// Returns the job id under which progress is reported.
pub async fn start_job(
    connector: Arc<dyn Connector>,
    request: IndexRequest,
    ctx: ConnectorContext,
) -> String {
    let job_id = request.request_id.clone();
    ctx.jobs
        .update(
            &job_id,
            JobUpdate::new(JobState::Preparing)
                .with_message(format!("{} connector", connector.name())),
        )
        .await;

    info!(
        job_id = %job_id,
        index = %request.index_name,
        connector = connector.name(),
        request_type = %request.request_type,
        "Connector job started"
    );

    let id = job_id.clone();
    tokio::spawn(async move {
        let jobs = ctx.jobs.clone();
        if let Err(e) = connector.run(request, ctx).await {
            error!(job_id = %id, connector = connector.name(), error = %e, "Connector job failed");
            jobs.update(&id, JobUpdate::new(JobState::Error).with_message(e.to_string()))
                .await;
        }
    });

    job_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = ConnectorRegistry::with_builtin();
        assert!(registry.contains("jsonl"));
        assert!(registry.contains("JSONL"));
        assert_eq!(registry.create("jsonl").unwrap().name(), "jsonl");
        assert!(registry.create("crm").is_none());
        assert_eq!(registry.names(), vec!["jsonl".to_string()]);
    }
}
