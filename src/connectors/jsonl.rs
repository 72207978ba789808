use super::{Connector, ConnectorContext};
use crate::error::{AppError, Result};
use crate::models::{IndexDocumentRequest, IndexRequest, IndexRequestType, JobState, JobUpdate};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Records between two `in_progress` status updates
const PROGRESS_INTERVAL: u64 = 500;

/// Reads newline-delimited JSON documents from the file named by the `path`
/// parameter. Each line is `{"id": .., "fields": {..}, "operation": ..}`;
/// `operation` defaults to `create`.
#[derive(Debug, Default)]
pub struct JsonlConnector;

impl JsonlConnector {
    pub const NAME: &'static str = "jsonl";

    pub fn new() -> Self {
        Self
    }

    /// Push every line to the engine; returns (pushed, rejected)
    async fn push_lines(
        &self,
        file: tokio::fs::File,
        request: &IndexRequest,
        ctx: &ConnectorContext,
    ) -> Result<(u64, u64)> {
        let mut lines = BufReader::new(file).lines();
        let mut pushed = 0u64;
        let mut rejected = 0u64;
        let mut line_number = 0u64;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let document: IndexDocumentRequest = match serde_json::from_str(line) {
                Ok(document) => document,
                Err(e) => {
                    rejected += 1;
                    warn!(job_id = %request.request_id, line = line_number, error = %e, "Skipping malformed record");
                    continue;
                }
            };
            ctx.engine.enqueue(document).await?;
            pushed += 1;

            if pushed % PROGRESS_INTERVAL == 0 {
                ctx.jobs
                    .update(
                        &request.request_id,
                        JobUpdate::new(JobState::InProgress).with_processed(pushed),
                    )
                    .await;
            }
        }

        Ok((pushed, rejected))
    }
}

#[async_trait]
impl Connector for JsonlConnector {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, request: IndexRequest, ctx: ConnectorContext) -> Result<()> {
        let path = request
            .params
            .get("path")
            .ok_or_else(|| AppError::Validation("jsonl connector requires a 'path' parameter".to_string()))?;

        // Open before switching to bulk mode so a bad path never wipes the index.
        let file = tokio::fs::File::open(path).await?;
        let bulk = request.request_type == IndexRequestType::Bulk;
        if bulk {
            ctx.engine.bulk_indexing(true).await?;
        }

        ctx.jobs
            .update(&request.request_id, JobUpdate::new(JobState::InProgress))
            .await;
        let outcome = self.push_lines(file, &request, &ctx).await;

        ctx.engine.flush().await;
        if bulk {
            ctx.engine.bulk_indexing(false).await?;
        }
        let (pushed, rejected) = outcome?;
        debug!(job_id = %request.request_id, pushed, rejected, "Records drained");

        let update = if rejected == 0 {
            JobUpdate::new(JobState::FinishedSuccess)
        } else {
            JobUpdate::new(JobState::FinishedWithErrors)
                .with_message(format!("{} malformed records skipped", rejected))
        };
        ctx.jobs
            .update(&request.request_id, update.with_processed(pushed))
            .await;

        info!(
            job_id = %request.request_id,
            index = %request.index_name,
            pushed,
            rejected,
            "jsonl job finished"
        );
        Ok(())
    }
}
