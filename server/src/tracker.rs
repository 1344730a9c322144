//! In-memory registry of try-on jobs.
//!
//! Every job is created in `processing` and moves exactly once to
//! `completed` or `failed`. Each operation runs under the shard lock of the
//! job's entry, so readers see a job either before or after its transition,
//! never halfway.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::models::job::{Job, JobCounts, JobFilter, JobState, JobStatus};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long a finished job stays queryable.
    pub ttl: Duration,
    /// Upper bound on retained jobs; only finished jobs are dropped to meet it.
    pub max_jobs: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_jobs: 10_000,
        }
    }
}

#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: DashMap<String, Job>,
    config: TrackerConfig,
}

impl JobTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            jobs: DashMap::new(),
            config,
        }
    }

    pub fn create(&self) -> String {
        self.create_for(None, 0)
    }

    /// Registers a new `processing` job and returns its id.
    ///
    /// Ids are random UUID v4 values. The vacancy check only guards against
    /// ids still in the map; an evicted id is not remembered, and relies on the
    /// 122 random bits never repeating.
    pub fn create_for(&self, user_id: Option<String>, product_count: usize) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = self.jobs.entry(id.clone()) {
                slot.insert(Job::new(id.clone(), user_id, product_count));
                return id;
            }
        }
    }

    pub fn complete(&self, id: &str, result_url: impl Into<String>) -> Result<Job, TrackerError> {
        self.finish(
            id,
            JobState::Completed {
                result_url: result_url.into(),
            },
        )
    }

    pub fn fail(&self, id: &str, error: impl Into<String>) -> Result<Job, TrackerError> {
        self.finish(
            id,
            JobState::Failed {
                error: error.into(),
            },
        )
    }

    fn finish(&self, id: &str, next: JobState) -> Result<Job, TrackerError> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;

        let current = job.status();
        if current.is_terminal() {
            return Err(TrackerError::InvalidTransition {
                job_id: id.to_string(),
                from: current,
                to: next.status(),
            });
        }

        job.state = next;
        job.finished_at = Some(Utc::now());
        Ok(job.clone())
    }

    pub fn get(&self, id: &str) -> Result<Job, TrackerError> {
        self.jobs
            .get(id)
            .map(|job| job.clone())
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    /// Newest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for entry in self.jobs.iter() {
            match entry.status() {
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drops finished jobs older than the TTL, then the oldest finished jobs
    /// while over capacity. Jobs still processing are never dropped.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.ttl;
        let mut evicted = 0;

        self.jobs.retain(|_, job| {
            let expired = match job.finished_at {
                Some(finished) => (now - finished).to_std().is_ok_and(|age| age >= ttl),
                None => false,
            };
            if expired {
                evicted += 1;
            }
            !expired
        });

        let overflow = self.jobs.len().saturating_sub(self.config.max_jobs);
        if overflow > 0 {
            let mut finished: Vec<(DateTime<Utc>, String)> = self
                .jobs
                .iter()
                .filter_map(|entry| entry.finished_at.map(|at| (at, entry.key().clone())))
                .collect();
            finished.sort();
            for (_, id) in finished.into_iter().take(overflow) {
                if self.jobs.remove(&id).is_some() {
                    evicted += 1;
                }
            }
        }

        evicted
    }
}
