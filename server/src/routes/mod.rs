pub mod health;
pub mod tryon;

use axum::{routing::get, Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::health_handlers::root;
use crate::state::AppState;
use health::health_routes;
use tryon::tryon_routes;

pub fn app_router(state: AppState, cors: CorsLayer) -> Router {
    let api = Router::new()
        .merge(health_routes())
        .nest("/tryon", tryon_routes());

    Router::new()
        .route("/", get(root))
        .nest("/api/v1", api)
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tower::ServiceExt;
    use tryon_service_cli::image_processor::ImageProcessor;
    use tryon_service_cli::model::PlaceholderModel;
    use tryon_service_cli::pipeline::TryOnPipeline;
    use tryon_service_cli::storage::MockStore;

    use crate::tracker::JobTracker;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([20, 120, 220])))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    async fn serve_images() -> SocketAddr {
        let png = png_bytes(64, 48);
        let app = Router::new().route(
            "/{name}",
            get(move || {
                let body = png.clone();
                async move { ([(header::CONTENT_TYPE, "image/png")], body) }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn closed_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn state_with_model(model_path: &std::path::Path) -> AppState {
        let pipeline = TryOnPipeline::new(
            Arc::new(ImageProcessor::new(Duration::from_secs(5)).unwrap()),
            Arc::new(PlaceholderModel::load(model_path)),
            Arc::new(MockStore),
            2048,
        );
        AppState::new(JobTracker::default(), pipeline, 4)
    }

    fn test_state() -> AppState {
        state_with_model(&std::env::temp_dir())
    }

    fn test_router(state: AppState) -> Router {
        app_router(state, CorsLayer::permissive())
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_terminal(app: &Router, job_id: &str) -> Value {
        for _ in 0..300 {
            let resp = send(app, get_req(&format!("/api/v1/tryon/status/{job_id}"))).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let json = body_json(resp).await;
            if json["status"] != "processing" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} never left processing");
    }

    #[tokio::test]
    async fn root_and_health() {
        let app = test_router(test_state());

        let json = body_json(send(&app, get_req("/")).await).await;
        assert_eq!(json["status"], "running");

        let resp = send(&app, get_req("/api/v1/health")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "ai-tryon");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn ready_reports_model_and_job_counts() {
        let state = test_state();
        state.tracker.create();
        let app = test_router(state);

        let resp = send(&app, get_req("/api/v1/ready")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ready");
        assert_eq!(json["model_loaded"], true);
        assert_eq!(json["jobs"]["processing"], 1);
    }

    #[tokio::test]
    async fn ready_is_503_without_model() {
        let state = state_with_model(std::path::Path::new("/nonexistent/tryon-model-weights"));
        let app = test_router(state);

        let resp = send(&app, get_req("/api/v1/ready")).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "not_ready");
        assert_eq!(json["model_loaded"], false);

        // liveness does not depend on the model
        let resp = send(&app, get_req("/api/v1/health")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn async_submission_completes() {
        let addr = serve_images().await;
        let app = test_router(test_state());

        let resp = send(
            &app,
            post_json(
                "/api/v1/tryon/generate",
                json!({
                    "user_image_url": format!("http://{addr}/user.png"),
                    "product_image_urls": [format!("http://{addr}/dress.png")],
                }),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["status"], "processing");
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let done = wait_for_terminal(&app, &job_id).await;
        assert_eq!(done["status"], "completed");
        assert_eq!(done["job_id"], job_id.as_str());
        let url = done["result_image_url"].as_str().unwrap();
        assert!(!url.is_empty());
        assert!(url.ends_with(&format!("tryon-results/{job_id}.jpg")));
        assert!(done.get("error").is_none());
    }

    #[tokio::test]
    async fn unreachable_user_image_fails_job() {
        let addr = closed_addr().await;
        let app = test_router(test_state());
        let user_url = format!("http://{addr}/user.png");

        let resp = send(
            &app,
            post_json(
                "/api/v1/tryon/generate",
                json!({
                    "user_image_url": user_url,
                    "product_image_urls": [format!("http://{addr}/dress.png")],
                }),
            ),
        )
        .await;
        let job_id = body_json(resp).await["job_id"].as_str().unwrap().to_string();

        let done = wait_for_terminal(&app, &job_id).await;
        assert_eq!(done["status"], "failed");
        let error = done["error"].as_str().unwrap();
        assert!(error.contains(&user_url), "unexpected error: {error}");
        assert!(done.get("result_image_url").is_none());
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let app = test_router(test_state());

        let resp = send(&app, get_req("/api/v1/tryon/status/unknown-id")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["detail"], "Job not found");
    }

    #[tokio::test]
    async fn sync_submission_returns_result() {
        let addr = serve_images().await;
        let state = test_state();
        let app = test_router(state.clone());

        let resp = send(
            &app,
            post_json(
                "/api/v1/tryon/generate-sync",
                json!({
                    "user_image_url": format!("http://{addr}/user.png"),
                    "product_image_urls": [],
                }),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "completed");
        let job_id = json["job_id"].as_str().unwrap();
        assert_eq!(
            json["result_image_url"],
            format!("https://storage.example.com/tryon-results/{job_id}.jpg")
        );
        // sync jobs are not tracked
        assert!(state.tracker.is_empty());
    }

    #[tokio::test]
    async fn sync_submission_failure_is_500() {
        let addr = closed_addr().await;
        let app = test_router(test_state());

        let resp = send(
            &app,
            post_json(
                "/api/v1/tryon/generate-sync",
                json!({
                    "user_image_url": format!("http://{addr}/user.png"),
                    "product_image_urls": [],
                }),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = body_json(resp).await["detail"].as_str().unwrap().to_string();
        assert!(detail.contains("failed to download"));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let app = test_router(test_state());

        let resp = send(
            &app,
            post_json("/api/v1/tryon/generate", json!({ "user_image_url": 42 })),
        )
        .await;
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn history_lists_jobs_for_user() {
        let state = test_state();
        let mine = state.tracker.create_for(Some("u-1".into()), 2);
        state.tracker.complete(&mine, "https://cdn/mine.jpg").unwrap();
        state.tracker.create_for(Some("u-2".into()), 1);
        let app = test_router(state);

        let resp = send(&app, get_req("/api/v1/tryon/history?user_id=u-1")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["total"], 1);
        let entry = &json["history"][0];
        assert_eq!(entry["job_id"], mine.as_str());
        assert_eq!(entry["status"], "completed");
        assert_eq!(entry["result_image_url"], "https://cdn/mine.jpg");
        assert_eq!(entry["product_count"], 2);
        assert!(entry["finished_at"].is_string());

        let resp = send(&app, get_req("/api/v1/tryon/history?status=processing")).await;
        let json = body_json(resp).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["history"][0]["user_id"], "u-2");
    }
}
