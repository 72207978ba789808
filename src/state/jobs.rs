use crate::models::{JobStatus, JobUpdate};
use moka::future::Cache;
use std::time::Duration;

/// Time-boxed table of connector job statuses
#[derive(Clone)]
pub struct JobStore {
    cache: Cache<String, JobStatus>,
}

impl JobStore {
    pub fn new(max_capacity: u64, retention: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(retention)
            .build();

        Self { cache }
    }

    /// Create or update the status of `job_id`. The read-modify-write is
    /// atomic per key, so concurrent updates of one job never lose a write.
    pub async fn update(&self, job_id: &str, update: JobUpdate) -> JobStatus {
        let id = job_id.to_string();
        self.cache
            .entry(id.clone())
            .and_upsert_with(|existing| async move {
                let mut status = existing
                    .map(|entry| entry.into_value())
                    .unwrap_or_else(|| JobStatus::new(id));
                status.apply(&update);
                status
            })
            .await
            .into_value()
    }

    pub async fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.cache.get(job_id).await
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
