use crate::{
    config::{ModelConfig, OutputNames},
    detection::DetectionSet,
    model_service::{ModelError, ModelService},
};
use image::RgbImage;
use ndarray::ArrayView4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session, SessionOutputs},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// NHWC `u8` batch of one, the input layout of Object Detection API exports.
/// Borrows the pixel buffer as is.
fn image_to_input(image: &RgbImage) -> Result<ArrayView4<'_, u8>, ModelError> {
    let (width, height) = image.dimensions();
    ArrayView4::from_shape(
        (1, height as usize, width as usize, 3),
        image.as_raw().as_slice(),
    )
    .map_err(|e| ModelError::Input(e.to_string()))
}

fn extract_f32<'a>(outputs: &'a SessionOutputs, name: &str) -> Result<&'a [f32], ModelError> {
    let value = outputs
        .get(name)
        .ok_or_else(|| ModelError::MissingOutput(name.to_string()))?;
    let (_shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| ModelError::Output {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    Ok(data)
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    outputs: OutputNames,
    max_detections: usize,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelError::Load(e.to_string()))?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            outputs: model_config.outputs.clone(),
            max_detections: model_config.max_detections,
        })
    }

    pub fn run_inference(&self, input: ArrayView4<'_, u8>) -> Result<DetectionSet, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index].lock();

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input)
            .map_err(|e| ModelError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let num_detections = extract_f32(&outputs, &self.outputs.num_detections)?
            .first()
            .copied()
            .unwrap_or(0.0);
        let classes = extract_f32(&outputs, &self.outputs.classes)?;
        let boxes = extract_f32(&outputs, &self.outputs.boxes)?;
        let scores = extract_f32(&outputs, &self.outputs.scores)?;

        Ok(DetectionSet::from_outputs(
            num_detections.max(0.0) as usize,
            classes,
            boxes,
            scores,
            self.max_detections,
        ))
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, image: &RgbImage) -> Result<DetectionSet, ModelError> {
        let input = image_to_input(image)?;
        let detections = self.run_inference(input)?;

        tracing::debug!("Model returned {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, score={:.3}, bbox=({:.3}, {:.3}, {:.3}, {:.3})",
                i,
                detection.class_id,
                detection.score,
                detection.bbox.ymin,
                detection.bbox.xmin,
                detection.bbox.ymax,
                detection.bbox.xmax
            );
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_image_to_input_is_nhwc() {
        let mut img = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        img.put_pixel(3, 1, Rgb([10, 20, 30]));

        let input = image_to_input(&img).unwrap();

        assert_eq!(input.shape(), &[1, 2, 4, 3]);
        assert_eq!(input[[0, 1, 3, 0]], 10);
        assert_eq!(input[[0, 1, 3, 1]], 20);
        assert_eq!(input[[0, 1, 3, 2]], 30);
        assert_eq!(input[[0, 0, 0, 0]], 0);
    }

    #[test]
    fn test_image_to_input_borrows_pixels() {
        let img = RgbImage::from_pixel(3, 3, Rgb([1, 2, 3]));

        let input = image_to_input(&img).unwrap();

        assert_eq!(input.as_ptr(), img.as_raw().as_ptr());
    }
}
