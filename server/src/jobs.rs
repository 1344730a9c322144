use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tryon_service_cli::pipeline::TryOnPipeline;
use tryon_service_cli::TryOnRequest;

use crate::state::AppState;
use crate::tracker::JobTracker;

/// Runs the pipeline for `job_id` in the background. The caller returns right away.
pub fn spawn_tryon(state: &AppState, job_id: String, request: TryOnRequest) {
    let tracker = Arc::clone(&state.tracker);
    let pipeline = Arc::clone(&state.pipeline);
    let permits = Arc::clone(&state.permits);
    let id = job_id.clone();

    let task = tokio::spawn(async move {
        // the semaphore is never closed
        let _permit = permits.acquire_owned().await.ok();
        process_tryon(&tracker, &pipeline, &id, &request).await;
    });

    tokio::spawn(supervise(Arc::clone(&state.tracker), job_id, task));
}

/// Drives one job to a terminal state. Collaborator failures become a failed
/// job; a rejected transition is a bug and is only logged.
pub async fn process_tryon(
    tracker: &JobTracker,
    pipeline: &TryOnPipeline,
    job_id: &str,
    request: &TryOnRequest,
) {
    info!(job_id, products = request.product_image_urls.len(), "processing try-on job");

    let transition = match pipeline
        .run(job_id, &request.user_image_url, &request.product_image_urls)
        .await
    {
        Ok(outcome) => {
            info!(job_id, "try-on job completed");
            tracker.complete(job_id, outcome.result_url)
        }
        Err(e) => {
            warn!(job_id, error = %e, "try-on job failed");
            tracker.fail(job_id, e.to_string())
        }
    };

    if let Err(e) = transition {
        error!(job_id, error = %e, "job transition rejected");
    }
}

/// Catches tasks that died without reporting, so no job stays `processing`.
pub async fn supervise(tracker: Arc<JobTracker>, job_id: String, task: JoinHandle<()>) {
    let Err(e) = task.await else {
        return;
    };
    error!(job_id = %job_id, error = %e, "try-on task aborted");
    if let Err(e) = tracker.fail(&job_id, format!("processing task aborted: {e}")) {
        error!(job_id = %job_id, error = %e, "could not mark aborted job as failed");
    }
}

/// Applies the eviction policy every `every` until aborted.
pub fn spawn_reaper(tracker: Arc<JobTracker>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = tracker.evict_expired(Utc::now());
            if evicted > 0 {
                debug!(evicted, remaining = tracker.len(), "evicted finished jobs");
            }
        }
    })
}
