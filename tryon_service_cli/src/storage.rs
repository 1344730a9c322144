use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, RequestChecksumCalculation};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use backoff::{future::retry, ExponentialBackoff};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::config::{parse_or, string_or};
use crate::error::{ConfigError, StoreError};

pub const MOCK_STORAGE_BASE: &str = "https://storage.example.com";
pub const JPEG_QUALITY: u8 = 90;
const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Where generated images end up.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Uploads `image` as JPEG under `key` and returns its public URL.
    async fn store(&self, image: &RgbImage, key: &str) -> Result<String, StoreError>;

    async fn delete(&self, key: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub region: String,
    pub max_retry: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint: String::new(),
            region: "us-east-1".into(),
            max_retry: Duration::from_secs(10),
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            bucket: string_or(lookup, "STORAGE_BUCKET", ""),
            access_key: string_or(lookup, "STORAGE_ACCESS_KEY", ""),
            secret_key: string_or(lookup, "STORAGE_SECRET_KEY", ""),
            endpoint: string_or(lookup, "STORAGE_ENDPOINT", ""),
            region: string_or(lookup, "STORAGE_REGION", "us-east-1"),
            max_retry: Duration::from_secs(parse_or(lookup, "STORAGE_MAX_RETRY_SECS", 10u64)?),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.access_key.is_empty() && !self.bucket.is_empty()
    }

    pub fn object_url(&self, key: &str) -> String {
        if self.endpoint.is_empty() {
            format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key)
        } else {
            format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
        }
    }
}

/// Picks the S3 store when credentials are present, the placeholder store otherwise.
pub fn artifact_store(config: &StorageConfig) -> Arc<dyn ArtifactStore> {
    if !config.is_configured() {
        warn!("storage credentials not configured, using placeholder storage urls");
        return Arc::new(MockStore);
    }
    let store = S3Store::new(config.clone());
    info!(bucket = %config.bucket, region = %config.region, "storage client initialized");
    Arc::new(store)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}

/// Returns deterministic URLs without uploading anything.
pub struct MockStore;

#[async_trait]
impl ArtifactStore for MockStore {
    async fn store(&self, _image: &RgbImage, key: &str) -> Result<String, StoreError> {
        warn!(key, "using placeholder storage url");
        Ok(format!("{MOCK_STORAGE_BASE}/{key}"))
    }

    async fn delete(&self, _key: &str) -> bool {
        true
    }
}

/// SigV4-signed uploads to AWS S3 or an S3-compatible endpoint such as MinIO.
///
/// The SDK's own retries are disabled; failed uploads are retried with
/// exponential backoff for up to `max_retry`.
pub struct S3Store {
    client: Client,
    config: StorageConfig,
}

impl S3Store {
    pub fn new(config: StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "tryon-storage",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(OPERATION_TIMEOUT)
                    .build(),
            )
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired);
        if !config.endpoint.is_empty() {
            // custom endpoints are addressed as {endpoint}/{bucket}/{key}
            builder = builder
                .endpoint_url(config.endpoint.trim_end_matches('/'))
                .force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            config,
        }
    }
}

/// 5xx and transport failures are worth retrying, anything the bucket
/// rejected outright is not.
fn classify<E>(key: &str, err: SdkError<E, HttpResponse>) -> backoff::Error<StoreError>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err.raw_response().map(|res| res.status().as_u16()) {
        Some(status) => {
            let failure = StoreError::Status {
                key: key.to_string(),
                status,
            };
            if status >= 500 {
                warn!(key, status, "upload attempt rejected, retrying");
                backoff::Error::transient(failure)
            } else {
                backoff::Error::permanent(failure)
            }
        }
        None => {
            let failure = StoreError::Request {
                key: key.to_string(),
                message: DisplayErrorContext(&err).to_string(),
            };
            if matches!(err, SdkError::ConstructionFailure(_)) {
                backoff::Error::permanent(failure)
            } else {
                warn!(key, error = %failure, "upload attempt failed");
                backoff::Error::transient(failure)
            }
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn store(&self, image: &RgbImage, key: &str) -> Result<String, StoreError> {
        let owned = image.clone();
        let body = tokio::task::spawn_blocking(move || encode_jpeg(&owned, JPEG_QUALITY)).await??;

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_retry),
            ..ExponentialBackoff::default()
        };

        let body = &body;
        retry(policy, || async move {
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(key)
                .content_type("image/jpeg")
                .body(ByteStream::from(body.clone()))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify(key, e))
        })
        .await
        .inspect_err(|e| error!(key, error = %e, "failed to upload result image"))?;

        let url = self.config.object_url(key);
        debug!(key, url = %url, "uploaded result image");
        Ok(url)
    }

    async fn delete(&self, key: &str) -> bool {
        let res = self
            .client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(_) => true,
            Err(e) => {
                error!(key, error = %DisplayErrorContext(&e), "failed to delete from storage");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::put;
    use axum::Router;
    use image::Rgb;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Bucket {
        puts: AtomicUsize,
        fail_first: AtomicUsize,
        reject: bool,
        last: Mutex<Option<(String, Vec<u8>)>>,
        authorization: Mutex<Option<String>>,
    }

    fn s3_error(status: StatusCode, code: &str) -> Response {
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Error><Code>{code}</Code><Message>{code}</Message><RequestId>r1</RequestId></Error>"
        );
        (status, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
    }

    async fn put_object(
        State(bucket): State<Arc<Bucket>>,
        Path(key): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        bucket.puts.fetch_add(1, Ordering::SeqCst);
        *bucket.authorization.lock().unwrap() = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if bucket.reject {
            return s3_error(StatusCode::FORBIDDEN, "AccessDenied");
        }
        if bucket.fail_first.load(Ordering::SeqCst) > 0 {
            bucket.fail_first.fetch_sub(1, Ordering::SeqCst);
            return s3_error(StatusCode::SERVICE_UNAVAILABLE, "SlowDown");
        }
        *bucket.last.lock().unwrap() = Some((key, body.to_vec()));
        StatusCode::OK.into_response()
    }

    async fn delete_object(Path(_key): Path<String>) -> StatusCode {
        StatusCode::NO_CONTENT
    }

    async fn serve_bucket(bucket: Arc<Bucket>) -> String {
        let app = Router::new()
            .route("/results/{*key}", put(put_object).delete(delete_object))
            .with_state(bucket);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn configured(endpoint: String) -> StorageConfig {
        StorageConfig {
            bucket: "results".into(),
            access_key: "AKIAEXAMPLE".into(),
            secret_key: "secret".into(),
            endpoint,
            max_retry: Duration::from_secs(5),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn object_url_prefers_custom_endpoint() {
        let mut config = configured("http://minio:9000/".into());
        assert_eq!(
            config.object_url("tryon-results/a.jpg"),
            "http://minio:9000/results/tryon-results/a.jpg"
        );

        config.endpoint.clear();
        assert_eq!(
            config.object_url("tryon-results/a.jpg"),
            "https://results.s3.us-east-1.amazonaws.com/tryon-results/a.jpg"
        );
    }

    #[test]
    fn unconfigured_without_key_or_bucket() {
        assert!(!StorageConfig::default().is_configured());
        let mut config = configured(String::new());
        assert!(config.is_configured());
        config.bucket.clear();
        assert!(!config.is_configured());
    }

    #[tokio::test]
    async fn mock_store_returns_deterministic_url() {
        let store = MockStore;
        let url = store
            .store(&RgbImage::new(2, 2), "tryon-results/job-1.jpg")
            .await
            .unwrap();
        assert_eq!(url, "https://storage.example.com/tryon-results/job-1.jpg");
        assert!(store.delete("tryon-results/job-1.jpg").await);
    }

    #[tokio::test]
    async fn s3_store_uploads_signed_jpeg() {
        let bucket = Arc::new(Bucket::default());
        let endpoint = serve_bucket(bucket.clone()).await;
        let store = S3Store::new(configured(endpoint.clone()));

        let image = RgbImage::from_pixel(8, 8, Rgb([10, 200, 30]));
        let url = store.store(&image, "tryon-results/j1.jpg").await.unwrap();

        assert_eq!(url, format!("{endpoint}/results/tryon-results/j1.jpg"));
        let (key, body) = bucket.last.lock().unwrap().clone().unwrap();
        assert_eq!(key, "tryon-results/j1.jpg");
        assert_eq!(&body[..2], &[0xFF, 0xD8]);

        let auth = bucket.authorization.lock().unwrap().clone().unwrap();
        assert!(
            auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIAEXAMPLE/"),
            "unsigned request: {auth}"
        );
        assert!(auth.contains("/us-east-1/s3/aws4_request"));
        assert!(store.delete("tryon-results/j1.jpg").await);
    }

    #[tokio::test]
    async fn s3_store_retries_server_errors() {
        let bucket = Arc::new(Bucket::default());
        bucket.fail_first.store(2, Ordering::SeqCst);
        let endpoint = serve_bucket(bucket.clone()).await;
        let store = S3Store::new(configured(endpoint));

        store
            .store(&RgbImage::new(4, 4), "tryon-results/j2.jpg")
            .await
            .unwrap();

        assert_eq!(bucket.puts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn s3_store_gives_up_on_client_errors() {
        let bucket = Arc::new(Bucket {
            reject: true,
            ..Bucket::default()
        });
        let endpoint = serve_bucket(bucket.clone()).await;
        let store = S3Store::new(configured(endpoint));

        let err = store
            .store(&RgbImage::new(4, 4), "tryon-results/j3.jpg")
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Status { status: 403, .. }));
        assert_eq!(bucket.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn s3_store_delete_reports_unreachable_bucket() {
        let addr = crate::testing::closed_addr().await;
        let store = S3Store::new(configured(format!("http://{addr}")));
        assert!(!store.delete("tryon-results/gone.jpg").await);
    }
}
