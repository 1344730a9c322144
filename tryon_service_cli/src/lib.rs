pub mod config;
pub mod error;
pub mod image_processor;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod utils;

use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use error::{ConfigError, FetchError, PipelineError, StoreError};

/// Body of a try-on submission.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TryOnRequest {
    pub user_image_url: String,
    pub product_image_urls: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A downloaded image after RGB conversion and downsizing.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub source_url: String,
    pub image: RgbImage,
}

impl NormalizedImage {
    pub fn new(source_url: impl Into<String>, image: RgbImage) -> Self {
        Self {
            source_url: source_url.into(),
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
