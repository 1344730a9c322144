use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;
use tryon_service_cli::{
    image_processor::{combine_images, ImageProcessor},
    model::PlaceholderModel,
    pipeline::TryOnPipeline,
    storage::{artifact_store, ArtifactStore, MockStore, StorageConfig},
    utils,
};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a single virtual try-on generation", long_about = None)]
struct Args {
    /// URL of the user's photo
    #[arg(short, long)]
    user_image: String,

    /// Product image URL, repeat for several garments
    #[arg(short, long = "product-image", required = true)]
    product_images: Vec<String>,

    /// Longest side after preprocessing
    #[arg(short, long, env = "MAX_IMAGE_SIZE", default_value_t = 2048)]
    max_size: u32,

    /// Download timeout in seconds
    #[arg(short, long, env = "FETCH_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long, env = "MODEL_PATH", default_value = "/models")]
    model_path: PathBuf,

    /// Where to write the generated image
    #[arg(short, long, default_value = "tryon-result.jpg")]
    output: PathBuf,

    /// Also write a side-by-side sheet of the inputs
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Write a JSON summary of the run
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Never upload, even when storage credentials are set
    #[arg(short, long)]
    skip_upload: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1) storage credentials may live in .env
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // 2) collaborators
    let store: Arc<dyn ArtifactStore> = if args.skip_upload {
        Arc::new(MockStore)
    } else {
        artifact_store(&StorageConfig::from_env()?)
    };
    let pipeline = TryOnPipeline::new(
        Arc::new(ImageProcessor::new(Duration::from_secs(args.timeout_secs))?),
        Arc::new(PlaceholderModel::load(&args.model_path)),
        store,
        args.max_size,
    );

    // 3) optional preview of the inputs
    if let Some(preview) = &args.preview {
        let (user, products) = pipeline
            .fetch_inputs(&args.user_image, &args.product_images)
            .await?;
        let products: Vec<_> = products.into_iter().map(|p| p.image).collect();
        utils::save_image(&combine_images(&user.image, &products), preview)?;
    }

    // 4) generate + store
    let job_id = Uuid::new_v4().to_string();
    let outcome = pipeline
        .run(&job_id, &args.user_image, &args.product_images)
        .await?;
    utils::save_image(&outcome.image, &args.output)?;

    if let Some(summary) = &args.summary {
        let data = serde_json::json!({
            "job_id": job_id,
            "status": "completed",
            "result_image_url": outcome.result_url,
            "output": args.output.display().to_string(),
        });
        utils::save_json(&data, summary)?;
    }

    println!("{}", outcome.result_url);
    Ok(())
}
