use std::time::Duration;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::NormalizedImage;

pub const DEFAULT_MAX_IMAGE_SIZE: u32 = 2048;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_DOWNLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Source of input images for the pipeline.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_and_normalize(
        &self,
        url: &str,
        max_dimension: u32,
    ) -> Result<NormalizedImage, FetchError>;
}

pub struct ImageProcessor {
    client: Client,
    max_bytes: usize,
}

impl ImageProcessor {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            max_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
        })
    }

    /// Caps the size of a single downloaded image body.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn too_large(&self, url: &str) -> FetchError {
        FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme {
                url: url.to_string(),
            });
        }

        let mut res = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        if !res.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: res.status(),
            });
        }

        if res
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(self.too_large(url));
        }

        // content-length is advisory, enforce the cap on the stream as well
        let mut body = Vec::new();
        while let Some(chunk) = res.chunk().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(url, bytes = body.len(), "downloaded image");
        Ok(body)
    }
}

#[async_trait]
impl ImageSource for ImageProcessor {
    async fn fetch_and_normalize(
        &self,
        url: &str,
        max_dimension: u32,
    ) -> Result<NormalizedImage, FetchError> {
        let bytes = self.download(url).await?;

        // decode + resize are CPU bound
        let image = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|decoded| preprocess(decoded, max_dimension))
        })
        .await?
        .map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })?;

        Ok(NormalizedImage::new(url, image))
    }
}

/// Converts to RGB and shrinks so the longer side is at most `max_size`.
pub fn preprocess(image: DynamicImage, max_size: u32) -> RgbImage {
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    let (new_width, new_height) = fit_within(width, height, max_size);
    if (new_width, new_height) == (width, height) {
        return rgb;
    }
    imageops::resize(&rgb, new_width, new_height, FilterType::Lanczos3)
}

/// Target size keeping aspect ratio. Images already within bounds are unchanged.
pub fn fit_within(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width.max(height) <= max_size {
        return (width, height);
    }
    let max = u64::from(max_size);
    if width > height {
        let scaled = u64::from(height) * max / u64::from(width);
        (max_size, (scaled as u32).max(1))
    } else {
        let scaled = u64::from(width) * max / u64::from(height);
        ((scaled as u32).max(1), max_size)
    }
}

/// Lays the user image and every product image side by side on a white canvas.
pub fn combine_images(user_image: &RgbImage, product_images: &[RgbImage]) -> RgbImage {
    let width = user_image.width() + product_images.iter().map(|p| p.width()).sum::<u32>();
    let height = product_images
        .iter()
        .map(|p| p.height())
        .fold(user_image.height(), u32::max);

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut x_offset = 0i64;
    for img in std::iter::once(user_image).chain(product_images) {
        imageops::replace(&mut canvas, img, x_offset, 0);
        x_offset += i64::from(img.width());
    }
    canvas
}
