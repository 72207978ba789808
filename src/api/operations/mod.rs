//! Named HTTP operations executed against one index
//!
//! Every operation receives the index name, the lower-cased query-string
//! parameters, the verb and the optional JSON body, and answers with a JSON
//! value. Operations are looked up in an [`OperationRegistry`].

mod documents;
mod jobs;
mod search;

pub use documents::{BulkOperation, CommitOperation, DocumentOperationHandler, StatsOperation};
pub use jobs::{ConnectorOperation, JobStatusOperation};
pub use search::{ProfileSearchOperation, SearchOperation};

use crate::error::{AppError, Result};
use crate::state::ServerState;
use async_trait::async_trait;
use axum::http::Method;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

/// Input of one operation call
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub index_name: String,
    /// Query-string parameters, keys lower-cased
    pub params: HashMap<String, String>,
    pub verb: Method,
    pub body: Option<serde_json::Value>,
}

impl OperationRequest {
    /// Trimmed parameter value; blank values count as absent
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Parameter that must be present, possibly empty
    pub fn required(&self, name: &str) -> Result<&str> {
        self.params
            .get(name)
            .map(|value| value.trim())
            .ok_or_else(|| AppError::Validation(format!("missing parameter '{}'", name)))
    }

    /// Parse an optional parameter
    pub fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.param(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    AppError::Validation(format!("invalid value '{}' for '{}': {}", raw, name, e))
                })
            })
            .transpose()
    }

    /// Columns named by the comma separated `fields` parameter; all stored
    /// fields when absent
    pub fn columns(&self) -> Vec<String> {
        match self.param("fields") {
            Some(fields) => fields
                .split(',')
                .map(|f| f.trim().to_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
            None => vec![crate::engine::ALL_COLUMNS.to_string()],
        }
    }

    /// Relative cutoff parameter, checked to be a percentage
    pub fn cutoff(&self) -> Result<Option<u32>> {
        match self.parse::<u32>("cutoff")? {
            Some(cutoff) if cutoff > 100 => Err(AppError::Validation(format!(
                "cutoff must be between 0 and 100, got {}",
                cutoff
            ))),
            cutoff => Ok(cutoff),
        }
    }
}

#[async_trait]
pub trait Operation: Send + Sync {
    /// Registry name, matched case-insensitively
    fn name(&self) -> &'static str;

    /// Whether the operation accepts `verb`
    fn allows(&self, verb: &Method) -> bool;

    async fn execute(&self, state: &ServerState, request: OperationRequest)
        -> Result<serde_json::Value>;
}

/// Operations by name
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every operation shipped with the server
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SearchOperation));
        registry.register(Arc::new(ProfileSearchOperation));
        registry.register(Arc::new(DocumentOperationHandler));
        registry.register(Arc::new(CommitOperation));
        registry.register(Arc::new(BulkOperation));
        registry.register(Arc::new(StatsOperation));
        registry.register(Arc::new(ConnectorOperation));
        registry.register(Arc::new(JobStatusOperation));
        registry
    }

    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        self.operations
            .insert(operation.name().to_lowercase(), operation);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Flatten a JSON object into string values; nulls are dropped
pub(crate) fn string_map(object: &serde_json::Map<String, serde_json::Value>) -> HashMap<String, String> {
    object
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), value))
        })
        .collect()
}
