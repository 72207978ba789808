use super::{string_map, Operation, OperationRequest};
use crate::engine::{ResultRow, SearchRequest};
use crate::error::{AppError, Result};
use crate::profile::parse_payload;
use crate::state::ServerState;
use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_COUNT: usize = 10;

fn results(index: &str, rows: Vec<ResultRow>) -> Value {
    json!({
        "index": index,
        "count": rows.len(),
        "results": rows,
    })
}

/// Free-text query: `q`, `count`, `cutoff`, `exclude`, `fields`
pub struct SearchOperation;

#[async_trait]
impl Operation for SearchOperation {
    fn name(&self) -> &'static str {
        "search"
    }

    fn allows(&self, verb: &Method) -> bool {
        verb == Method::GET || verb == Method::POST
    }

    async fn execute(&self, state: &ServerState, request: OperationRequest) -> Result<Value> {
        let engine = state.engine_for_index(&request.index_name)?;
        let query = request.required("q")?;

        let mut search = SearchRequest::new(
            query,
            request.parse("count")?.unwrap_or(DEFAULT_COUNT),
        )
        .with_cutoff(request.cutoff()?.unwrap_or(0))
        .with_columns(request.columns());
        if let Some(exclude) = request.param("exclude") {
            search = search.excluding(exclude);
        }

        let rows = engine.search(search, "search").await?;
        Ok(results(engine.name(), rows))
    }
}

/// Search with a compiled profile.
///
/// Values come from `values` (`key:value||key:value`) or from a JSON object
/// body. `profile` selects the profile, the first declared one by default;
/// `count` and `cutoff` override the profile's defaults.
pub struct ProfileSearchOperation;

impl ProfileSearchOperation {
    fn payload(request: &OperationRequest) -> Result<HashMap<String, String>> {
        if let Some(values) = request.param("values") {
            return Ok(parse_payload(values)?);
        }
        match &request.body {
            Some(Value::Object(object)) => Ok(string_map(object)
                .into_iter()
                .map(|(key, value)| (key.to_lowercase(), value.trim().to_string()))
                .collect()),
            Some(_) => Err(AppError::Validation(
                "profile search body must be a JSON object".to_string(),
            )),
            None => Err(AppError::Validation(
                "missing parameter 'values'".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Operation for ProfileSearchOperation {
    fn name(&self) -> &'static str {
        "profilesearch"
    }

    fn allows(&self, verb: &Method) -> bool {
        verb == Method::GET || verb == Method::POST
    }

    async fn execute(&self, state: &ServerState, request: OperationRequest) -> Result<Value> {
        let engine = state.engine_for_index(&request.index_name)?;
        let profiles = state.profiles_for_index(&request.index_name)?;
        let profile = profiles.get(request.param("profile")).ok_or_else(|| {
            AppError::NotFound(match request.param("profile") {
                Some(name) => format!("profile '{}'", name),
                None => format!("index '{}' has no search profile", engine.name()),
            })
        })?;

        let payload = Self::payload(&request)?;
        let null_value = &engine.settings().null_value;
        let query = profile.render(&payload, null_value)?;
        let built = profile.build_query(&payload, null_value, engine.schema())?;

        let mut search = SearchRequest::new(
            query.clone(),
            request.parse("count")?.unwrap_or(profile.count()),
        )
        .with_cutoff(request.cutoff()?.unwrap_or(profile.relative_cutoff()))
        .with_columns(request.columns());
        if let Some(exclude) = request.param("exclude") {
            search = search.excluding(exclude);
        }

        let rows = match built {
            Some(built) => engine.search_query(built, search, "profile").await?,
            None => Vec::new(),
        };
        let mut response = results(engine.name(), rows);
        response["profile"] = json!(profile.name());
        response["query"] = json!(query);
        Ok(response)
    }
}
