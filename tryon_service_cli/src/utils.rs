use std::fs::File;
use std::io::Write;
use std::path::Path;

use image::RgbImage;
use tracing::info;

pub fn save_json(data: &serde_json::Value, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(path)?;
    file.write_all(serde_json::to_string_pretty(data)?.as_bytes())?;
    info!(path = %path.display(), "written");
    Ok(())
}

/// Format follows the file extension.
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    image.save(path)?;
    info!(path = %path.display(), width = image.width(), height = image.height(), "written");
    Ok(())
}
