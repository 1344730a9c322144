use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::tryon_handlers::{
    generate_tryon, generate_tryon_sync, get_tryon_history, get_tryon_status,
};

pub fn tryon_routes() -> Router {
    Router::new()
        .route("/generate", post(generate_tryon))
        .route("/generate-sync", post(generate_tryon_sync))
        .route("/status/{job_id}", get(get_tryon_status))
        .route("/history", get(get_tryon_history))
}
