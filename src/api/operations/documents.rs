use super::{string_map, Operation, OperationRequest};
use crate::error::{AppError, Result};
use crate::models::{DocumentOperation, IndexDocumentRequest};
use crate::state::ServerState;
use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Single document mutation: POST creates, PUT updates, DELETE deletes.
///
/// The id comes from the `id` parameter or the body's `id`; field values from
/// the body's `fields` object.
pub struct DocumentOperationHandler;

#[async_trait]
impl Operation for DocumentOperationHandler {
    fn name(&self) -> &'static str {
        "document"
    }

    fn allows(&self, verb: &Method) -> bool {
        verb == Method::POST || verb == Method::PUT || verb == Method::DELETE
    }

    async fn execute(&self, state: &ServerState, request: OperationRequest) -> Result<Value> {
        let engine = state.engine_for_index(&request.index_name)?;

        let operation = match request.verb {
            Method::PUT => DocumentOperation::Update,
            Method::DELETE => DocumentOperation::Delete,
            _ => DocumentOperation::Create,
        };

        let body = match &request.body {
            Some(Value::Object(object)) => Some(object),
            Some(_) => {
                return Err(AppError::Validation(
                    "document body must be a JSON object".to_string(),
                ))
            }
            None => None,
        };

        let id = request
            .param("id")
            .map(str::to_string)
            .or_else(|| {
                body.and_then(|b| b.get("id")).and_then(|id| match id {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
            })
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("missing document 'id'".to_string()))?;

        let fields = match body.and_then(|b| b.get("fields")) {
            Some(Value::Object(fields)) => string_map(fields),
            Some(_) => {
                return Err(AppError::Validation(
                    "document 'fields' must be a JSON object".to_string(),
                ))
            }
            None => HashMap::new(),
        };

        engine
            .enqueue(IndexDocumentRequest {
                id: id.clone(),
                fields,
                operation,
            })
            .await?;

        Ok(json!({
            "index": engine.name(),
            "id": id,
            "operation": operation.to_string(),
            "accepted": true,
        }))
    }
}

/// Drain the pipeline, commit every shard and refresh the searchers
pub struct CommitOperation;

#[async_trait]
impl Operation for CommitOperation {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn allows(&self, verb: &Method) -> bool {
        verb == Method::GET || verb == Method::POST
    }

    async fn execute(&self, state: &ServerState, request: OperationRequest) -> Result<Value> {
        let engine = state.engine_for_index(&request.index_name)?;
        engine.flush().await;
        engine.commit().await?;
        engine.refresh().await?;
        Ok(json!({
            "index": engine.name(),
            "committed": true,
            "documents": engine.counts(),
        }))
    }
}

/// Switch bulk indexing: `enable=true|false`
pub struct BulkOperation;

#[async_trait]
impl Operation for BulkOperation {
    fn name(&self) -> &'static str {
        "bulk"
    }

    fn allows(&self, verb: &Method) -> bool {
        verb == Method::POST
    }

    async fn execute(&self, state: &ServerState, request: OperationRequest) -> Result<Value> {
        let engine = state.engine_for_index(&request.index_name)?;
        let enable = request
            .parse::<bool>("enable")?
            .ok_or_else(|| AppError::Validation("missing parameter 'enable'".to_string()))?;

        if !enable {
            engine.flush().await;
        }
        engine.bulk_indexing(enable).await?;
        Ok(json!({
            "index": engine.name(),
            "bulk": engine.is_bulk(),
        }))
    }
}

/// Document counts, shard state and profiles of an index
pub struct StatsOperation;

#[async_trait]
impl Operation for StatsOperation {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn allows(&self, verb: &Method) -> bool {
        verb == Method::GET
    }

    async fn execute(&self, state: &ServerState, request: OperationRequest) -> Result<Value> {
        let engine = state.engine_for_index(&request.index_name)?;
        let profiles = state.profiles_for_index(&request.index_name)?;

        let shards: Vec<Value> = (0..engine.shard_count())
            .filter_map(|ordinal| engine.shard(ordinal))
            .map(|shard| {
                json!({
                    "shard": shard.ordinal(),
                    "documents": shard.counts(),
                    "commit_task": shard.commit_task_state().to_string(),
                    "refresh_task": shard.refresh_task_state().to_string(),
                    "refreshes": shard.refresh_count(),
                })
            })
            .collect();

        Ok(json!({
            "index": engine.name(),
            "documents": engine.counts(),
            "bulk": engine.is_bulk(),
            "shards": shards,
            "fields": engine.settings().fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            "profiles": profiles.names(),
        }))
    }
}
