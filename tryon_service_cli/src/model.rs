use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{info, warn};

use crate::NormalizedImage;

/// Produces a try-on image from a user photo and garment photos.
///
/// Implementations are CPU bound and are always called from the blocking
/// pool. They must not fail for images that decoded successfully.
pub trait GenerationBackend: Send + Sync {
    fn generate(
        &self,
        user_image: &NormalizedImage,
        product_images: &[NormalizedImage],
    ) -> RgbImage;

    fn is_ready(&self) -> bool;
}

/// Stand-in until a real try-on model is wired up: returns the user image.
///
/// Reports ready only when `model_path` exists, so a missing weights mount
/// shows up on the readiness probe. Generation works either way.
pub struct PlaceholderModel {
    model_path: PathBuf,
    loaded: bool,
}

impl PlaceholderModel {
    pub fn load(model_path: impl Into<PathBuf>) -> Self {
        let model_path = model_path.into();
        let loaded = model_path.exists();
        if loaded {
            info!(path = %model_path.display(), "model service initialized (placeholder mode)");
        } else {
            warn!(
                path = %model_path.display(),
                "model path not found, service will report not ready"
            );
        }
        Self { model_path, loaded }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl GenerationBackend for PlaceholderModel {
    fn generate(
        &self,
        user_image: &NormalizedImage,
        product_images: &[NormalizedImage],
    ) -> RgbImage {
        if !self.loaded {
            warn!("model not loaded, returning placeholder result");
        }
        info!(
            user = %user_image.source_url,
            products = product_images.len(),
            "generated try-on image (placeholder)"
        );
        user_image.image.clone()
    }

    fn is_ready(&self) -> bool {
        self.loaded
    }
}
