use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Result and error live inside the variant, so a job can never carry both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Completed { result_url: String },
    Failed { error: String },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Processing => JobStatus::Processing,
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Snapshot of one try-on job.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    pub user_id: Option<String>,
    pub product_count: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: String, user_id: Option<String>, product_count: usize) -> Self {
        Self {
            id,
            state: JobState::Processing,
            user_id,
            product_count,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn result_url(&self) -> Option<&str> {
        match &self.state {
            JobState::Completed { result_url } => Some(result_url),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Default)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(user_id) = &self.user_id {
            if job.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        match self.status {
            Some(status) => job.status() == status,
            None => true,
        }
    }
}
