use super::{Operation, OperationRequest};
use crate::connectors::{start_job, ConnectorContext};
use crate::error::Result;
use crate::models::{IndexRequest, IndexRequestType};
use crate::state::ServerState;
use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};
use uuid::Uuid;

/// Parameters consumed by the connector operation itself
const RESERVED_PARAMS: [&str; 3] = ["connector", "type", "jobid"];

/// Run a connector in the background: `connector` (index default when
/// absent), `type=bulk|single`, optional `jobid`. Remaining parameters are
/// handed to the connector.
pub struct ConnectorOperation;

#[async_trait]
impl Operation for ConnectorOperation {
    fn name(&self) -> &'static str {
        "connector"
    }

    fn allows(&self, verb: &Method) -> bool {
        verb == Method::GET || verb == Method::POST
    }

    async fn execute(&self, state: &ServerState, request: OperationRequest) -> Result<Value> {
        let engine = state.engine_for_index(&request.index_name)?;
        let connector = state.connector_for_index(&request.index_name, request.param("connector"))?;
        let request_type = request
            .parse::<IndexRequestType>("type")?
            .unwrap_or_default();
        let job_id = request
            .param("jobid")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let params = request
            .params
            .iter()
            .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let index_request = IndexRequest {
            request_id: job_id,
            request_type,
            index_name: engine.name().to_string(),
            params,
        };
        let connector_name = connector.name().to_string();
        let ctx = ConnectorContext {
            engine,
            jobs: state.jobs().clone(),
        };
        let job_id = start_job(connector, index_request, ctx).await;

        Ok(json!({
            "jobid": job_id,
            "connector": connector_name,
            "type": request_type.to_string(),
        }))
    }
}

/// Status of a connector job: `jobid`
pub struct JobStatusOperation;

#[async_trait]
impl Operation for JobStatusOperation {
    fn name(&self) -> &'static str {
        "jobstatus"
    }

    fn allows(&self, verb: &Method) -> bool {
        verb == Method::GET
    }

    async fn execute(&self, state: &ServerState, request: OperationRequest) -> Result<Value> {
        let job_id = request.required("jobid")?;
        let status = state.job_status(job_id).await?;
        Ok(serde_json::to_value(status)?)
    }
}
