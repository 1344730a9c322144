use std::sync::Arc;

use tokio::sync::Semaphore;
use tryon_service_cli::pipeline::TryOnPipeline;

use crate::tracker::JobTracker;

/// Shared by every handler and background job.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<JobTracker>,
    pub pipeline: Arc<TryOnPipeline>,
    // bounds how many pipelines run at once
    pub permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(tracker: JobTracker, pipeline: TryOnPipeline, max_concurrent_jobs: usize) -> Self {
        AppState {
            tracker: Arc::new(tracker),
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
        }
    }
}
