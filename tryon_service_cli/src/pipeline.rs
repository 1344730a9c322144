use std::sync::Arc;

use futures::future::try_join_all;
use image::RgbImage;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::image_processor::ImageSource;
use crate::model::GenerationBackend;
use crate::storage::ArtifactStore;
use crate::NormalizedImage;

pub fn result_key(job_id: &str) -> String {
    format!("tryon-results/{job_id}.jpg")
}

#[derive(Debug)]
pub struct TryOnOutcome {
    pub result_url: String,
    pub image: RgbImage,
}

/// Fetch, generate, store. Holds no job state of its own.
pub struct TryOnPipeline {
    images: Arc<dyn ImageSource>,
    model: Arc<dyn GenerationBackend>,
    store: Arc<dyn ArtifactStore>,
    max_dimension: u32,
}

impl TryOnPipeline {
    pub fn new(
        images: Arc<dyn ImageSource>,
        model: Arc<dyn GenerationBackend>,
        store: Arc<dyn ArtifactStore>,
        max_dimension: u32,
    ) -> Self {
        Self {
            images,
            model,
            store,
            max_dimension,
        }
    }

    pub fn model_ready(&self) -> bool {
        self.model.is_ready()
    }

    /// Downloads the user image and every product image. Product order is kept
    /// and a single failure fails the whole batch.
    pub async fn fetch_inputs(
        &self,
        user_image_url: &str,
        product_image_urls: &[String],
    ) -> Result<(NormalizedImage, Vec<NormalizedImage>), PipelineError> {
        let user = self
            .images
            .fetch_and_normalize(user_image_url, self.max_dimension)
            .await?;
        let products = try_join_all(
            product_image_urls
                .iter()
                .map(|url| self.images.fetch_and_normalize(url, self.max_dimension)),
        )
        .await?;
        Ok((user, products))
    }

    pub async fn generate(
        &self,
        user: NormalizedImage,
        products: Vec<NormalizedImage>,
    ) -> Result<RgbImage, PipelineError> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.generate(&user, &products))
            .await
            .map_err(PipelineError::Generate)
    }

    pub async fn run(
        &self,
        job_id: &str,
        user_image_url: &str,
        product_image_urls: &[String],
    ) -> Result<TryOnOutcome, PipelineError> {
        let (user, products) = self.fetch_inputs(user_image_url, product_image_urls).await?;
        debug!(job_id, products = products.len(), "inputs normalized");

        let image = self.generate(user, products).await?;

        let result_url = self.store.store(&image, &result_key(job_id)).await?;
        info!(job_id, result_url = %result_url, "try-on result stored");

        Ok(TryOnOutcome { result_url, image })
    }
}
