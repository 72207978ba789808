use crate::api::{AppState, OperationRequest};
use crate::error::{AppError, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// JSONP callback names: a dotted JavaScript identifier path
static CALLBACK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$")
        .expect("valid callback pattern")
});

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let failed = state.server.failed_indexes();
    Ok(Json(HealthResponse {
        status: if failed.is_empty() { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        indexes: state.server.index_names(),
        failed_indexes: failed.into_iter().map(|(name, _)| name).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub indexes: Vec<String>,
    pub failed_indexes: Vec<String>,
}

/// Prometheus metrics endpoint
///
/// Returns metrics in Prometheus text exposition format
pub async fn metrics(State(state): State<AppState>) -> Result<(StatusCode, String)> {
    if !state.server.config().observability.prometheus_enabled {
        return Err(AppError::NotFound("metrics are disabled".to_string()));
    }
    Ok((StatusCode::OK, crate::metrics::gather_metrics()))
}

/// `ANY /:index/:operation`
///
/// Query-string parameters (keys lower-cased) and an optional JSON body are
/// handed to the named operation. A `callback` parameter wraps the response
/// as JSONP.
pub async fn dispatch(
    State(state): State<AppState>,
    Path((index, operation)): Path<(String, String)>,
    verb: Method,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let mut params: HashMap<String, String> = params
        .into_iter()
        .map(|(key, value)| (key.to_lowercase(), value))
        .collect();

    let callback = match params.remove("callback") {
        Some(callback) if !CALLBACK_PATTERN.is_match(&callback) => {
            return AppError::Validation(format!("invalid callback '{}'", callback)).into_response();
        }
        callback => callback,
    };

    let result = run_operation(&state, index, operation, verb, params, body).await;
    match callback {
        Some(callback) => jsonp(result, &callback),
        None => match result {
            Ok(value) => Json(value).into_response(),
            Err(e) => e.into_response(),
        },
    }
}

async fn run_operation(
    state: &AppState,
    index: String,
    operation: String,
    verb: Method,
    params: HashMap<String, String>,
    body: Bytes,
) -> Result<serde_json::Value> {
    let handler = state
        .operations
        .get(&operation)
        .ok_or_else(|| AppError::NotFound(format!("operation '{}'", operation)))?;
    if !handler.allows(&verb) {
        return Err(AppError::Unsupported(format!(
            "{} does not accept {}",
            handler.name(),
            verb
        )));
    }

    let body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(
            serde_json::from_slice(&body)
                .map_err(|e| AppError::Validation(format!("invalid JSON body: {}", e)))?,
        )
    };

    debug!(index = %index, operation = handler.name(), verb = %verb, "Dispatching operation");
    let request = OperationRequest {
        index_name: index.to_lowercase(),
        params,
        verb,
        body,
    };

    let timeout = Duration::from_secs(state.server.config().server.request_timeout_secs);
    tokio::time::timeout(timeout, handler.execute(&state.server, request))
        .await
        .map_err(|_| AppError::Timeout(format!("{} after {:?}", handler.name(), timeout)))?
}

/// Wrap a result as `callback(json);`, keeping the status code of errors
fn jsonp(result: Result<serde_json::Value>, callback: &str) -> Response {
    let (status, value) = match result {
        Ok(value) => (StatusCode::OK, value),
        Err(e) => {
            tracing::error!(error_code = e.error_code(), message = %e, "Request error");
            (e.status_code(), e.to_json())
        }
    };
    (
        status,
        [(header::CONTENT_TYPE, "application/javascript")],
        format!("{}({});", callback, value),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_pattern() {
        assert!(CALLBACK_PATTERN.is_match("cb"));
        assert!(CALLBACK_PATTERN.is_match("jQuery123_456"));
        assert!(CALLBACK_PATTERN.is_match("app.handlers.onResult"));
        assert!(!CALLBACK_PATTERN.is_match("alert(1)"));
        assert!(!CALLBACK_PATTERN.is_match("a..b"));
        assert!(!CALLBACK_PATTERN.is_match(""));
    }

    #[test]
    fn test_jsonp_wraps_errors_with_status() {
        let response = jsonp(Err(AppError::NotFound("job 'x'".to_string())), "cb");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/javascript"
        );
    }
}
