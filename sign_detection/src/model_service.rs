use crate::detection::DetectionSet;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Failed to build input tensor: {0}")]
    Input(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Missing model output: {0}")]
    MissingOutput(String),
    #[error("Failed to extract output {name}: {reason}")]
    Output { name: String, reason: String },
}

/// Runs the detector on a decoded RGB image. Implementations are shared
/// between requests and called from the blocking thread pool.
pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, image: &RgbImage) -> Result<DetectionSet, ModelError>;
}
