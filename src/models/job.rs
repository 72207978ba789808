use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a connector job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Preparing,
    InProgress,
    FinishedSuccess,
    FinishedWithErrors,
    Error,
}

impl JobState {
    /// Whether the job will receive no further updates
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::FinishedSuccess | JobState::FinishedWithErrors | JobState::Error
        )
    }
}

/// Status of one connector job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub state: JobState,
    /// Records pushed to the engine so far
    pub processed: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl JobStatus {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: JobState::Preparing,
            processed: 0,
            started_at: Utc::now(),
            ended_at: None,
            message: None,
        }
    }

    /// Apply an update, stamping the end time on the first terminal state
    pub fn apply(&mut self, update: &JobUpdate) {
        self.state = update.state;
        if let Some(processed) = update.processed {
            self.processed = processed;
        }
        if update.message.is_some() {
            self.message = update.message.clone();
        }
        if self.state.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// Partial update posted by a connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdate {
    pub state: JobState,
    #[serde(default)]
    pub processed: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobUpdate {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            processed: None,
            message: None,
        }
    }

    pub fn with_processed(mut self, processed: u64) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
