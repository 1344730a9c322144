use std::env;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tryon_service_cli::config::{parse_or, require_positive, string_or};
use tryon_service_cli::image_processor::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_IMAGE_SIZE};
use tryon_service_cli::storage::StorageConfig;
use tryon_service_cli::ConfigError;

use crate::tracker::TrackerConfig;

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:3001";
/// Upper bound on `MAX_CONCURRENT_JOBS`; each permit can hold a decoded image set.
pub const MAX_CONCURRENT_JOBS_LIMIT: u64 = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub model_path: String,
    pub max_image_size: u32,
    pub fetch_timeout: Duration,
    pub storage: StorageConfig,
    pub tracker: TrackerConfig,
    pub reaper_interval: Duration,
    pub max_concurrent_jobs: usize,
}

impl Config {
    /// Reads `.env` first, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cors_origins = string_or(lookup, "CORS_ORIGINS", DEFAULT_CORS_ORIGINS)
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let max_image_size = require_positive(
            "MAX_IMAGE_SIZE",
            parse_or(lookup, "MAX_IMAGE_SIZE", u64::from(DEFAULT_MAX_IMAGE_SIZE))?,
        )?;
        let max_image_size = u32::try_from(max_image_size).map_err(|e| ConfigError::Invalid {
            key: "MAX_IMAGE_SIZE",
            value: max_image_size.to_string(),
            reason: e.to_string(),
        })?;

        let fetch_timeout = require_positive(
            "FETCH_TIMEOUT_SECS",
            parse_or(lookup, "FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT.as_secs())?,
        )?;
        let reaper_interval = require_positive(
            "REAPER_INTERVAL_SECS",
            parse_or(lookup, "REAPER_INTERVAL_SECS", 60u64)?,
        )?;
        let max_concurrent_jobs = require_positive(
            "MAX_CONCURRENT_JOBS",
            parse_or(lookup, "MAX_CONCURRENT_JOBS", 8u64)?,
        )?;
        if max_concurrent_jobs > MAX_CONCURRENT_JOBS_LIMIT {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_JOBS",
                value: max_concurrent_jobs.to_string(),
                reason: format!("must be at most {MAX_CONCURRENT_JOBS_LIMIT}"),
            });
        }

        let defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            ttl: Duration::from_secs(parse_or(lookup, "JOB_TTL_SECS", defaults.ttl.as_secs())?),
            max_jobs: parse_or(lookup, "MAX_JOBS", defaults.max_jobs)?,
        };

        Ok(Self {
            host: string_or(lookup, "HOST", "0.0.0.0"),
            port: parse_or(lookup, "PORT", 8000u16)?,
            cors_origins,
            model_path: string_or(lookup, "MODEL_PATH", "/models"),
            max_image_size,
            fetch_timeout: Duration::from_secs(fetch_timeout),
            storage: StorageConfig::from_lookup(lookup)?,
            tracker,
            reaper_interval: Duration::from_secs(reaper_interval),
            max_concurrent_jobs: max_concurrent_jobs as usize,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `*` opens the API to every origin without credentials; otherwise only the
    /// listed origins are allowed, with cookies.
    pub fn cors_layer(&self) -> Result<CorsLayer, ConfigError> {
        if self.cors_origins.iter().any(|origin| origin == "*") {
            return Ok(CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any));
        }

        let origins = self
            .cors_origins
            .iter()
            .map(|origin| {
                origin.parse::<HeaderValue>().map_err(|e| ConfigError::Invalid {
                    key: "CORS_ORIGINS",
                    value: origin.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true))
    }
}
