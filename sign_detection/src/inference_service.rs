use crate::{
    annotate::Annotator,
    detection::DetectionSet,
    labels::LabelMap,
    model_service::{ModelError, ModelService},
    storage::{OutputStore, StorageError},
};
use image::RgbImage;
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Error decoding image: {0}")]
    Decode(String),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedUpload {
    pub image_url: String,
    pub labels: Vec<String>,
}

/// Decodes with format sniffing and converts to three-channel colour.
pub fn decode_image(image_data: &[u8]) -> Result<RgbImage, InferenceError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| InferenceError::Decode(e.to_string()))?;

    let image = image_reader
        .decode()
        .map_err(|e| InferenceError::Decode(e.to_string()))?;

    Ok(image.to_rgb8())
}

/// Names of the detections at or above `threshold`, without duplicates,
/// in first-seen order.
pub fn detected_labels(
    detections: &DetectionSet,
    threshold: f32,
    labels: &LabelMap,
) -> Vec<String> {
    let mut seen = HashSet::new();
    detections
        .confident(threshold)
        .map(|detection| labels.name(detection.class_id))
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// Everything a request needs, built once at startup.
pub struct InferenceService {
    model_service: Arc<dyn ModelService>,
    labels: LabelMap,
    annotator: Annotator,
    store: OutputStore,
    confidence_threshold: f32,
}

impl InferenceService {
    pub fn new(
        model_service: Arc<dyn ModelService>,
        labels: LabelMap,
        annotator: Annotator,
        store: OutputStore,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            model_service,
            labels,
            annotator,
            store,
            confidence_threshold,
        }
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Decodes the upload, runs detection, draws the confident detections
    /// and persists the result. Blocking; call from a blocking task.
    pub fn handle_upload(&self, image_data: &[u8]) -> Result<ProcessedUpload, InferenceError> {
        let image = decode_image(image_data)?;
        let (width, height) = image.dimensions();
        tracing::debug!("Decoded {}x{} image", width, height);

        let detections = self.model_service.predict(&image)?;
        let labels = detected_labels(&detections, self.confidence_threshold, &self.labels);

        let annotated =
            self.annotator
                .annotate(&image, &detections, self.confidence_threshold, &self.labels);
        let image_url = self.store.persist(&annotated)?;

        tracing::info!(
            "Processed upload: {} detections, labels {:?}",
            detections.len(),
            labels
        );

        Ok(ProcessedUpload { image_url, labels })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::{AnnotationConfig, OutputConfig},
        detection::{BoundingBox, Detection},
    };
    use image::{ColorType, DynamicImage, GrayImage, ImageFormat, Luma, Rgb, Rgba, RgbaImage};
    use std::{io::Cursor, path::Path};

    pub struct MockModelService {
        pub detections: DetectionSet,
    }

    impl ModelService for MockModelService {
        fn predict(&self, _image: &RgbImage) -> Result<DetectionSet, ModelError> {
            Ok(self.detections.clone())
        }
    }

    struct FailingModelService;

    impl ModelService for FailingModelService {
        fn predict(&self, _image: &RgbImage) -> Result<DetectionSet, ModelError> {
            Err(ModelError::Inference("session exploded".to_string()))
        }
    }

    pub fn detection(class_id: i64, score: f32) -> Detection {
        Detection {
            class_id,
            bbox: BoundingBox::new(0.5, 0.25, 0.9, 0.75),
            score,
        }
    }

    pub fn service_with(model_service: Arc<dyn ModelService>, dir: &Path) -> InferenceService {
        let store = OutputStore::new(
            &OutputConfig {
                static_dir: dir.to_path_buf(),
                unique_names: true,
            },
            "http://localhost:5000",
        )
        .unwrap();
        InferenceService::new(
            model_service,
            LabelMap::default(),
            Annotator::new(&AnnotationConfig::default()).unwrap(),
            store,
            0.4,
        )
    }

    pub fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    fn saved_image(dir: &Path, url: &str) -> DynamicImage {
        let file_name = url.rsplit('/').next().unwrap();
        image::open(dir.join(file_name)).unwrap()
    }

    #[test]
    fn test_detected_labels_deduplicates_and_filters() {
        let detections = DetectionSet::new(vec![
            detection(2, 0.9),
            detection(1, 0.2),
            detection(2, 0.6),
            detection(3, 0.4),
            detection(42, 0.5),
        ]);

        let labels = detected_labels(&detections, 0.4, &LabelMap::default());

        assert_eq!(labels, vec!["Yes", "No", "Unknown"]);
    }

    #[test]
    fn test_detected_labels_empty_when_nothing_confident() {
        let detections = DetectionSet::new(vec![detection(1, 0.39), detection(2, 0.1)]);

        let labels = detected_labels(&detections, 0.4, &LabelMap::default());

        assert!(labels.is_empty());
    }

    #[test]
    fn test_single_confident_detection() {
        let dir = tempfile::tempdir().unwrap();
        let model = MockModelService {
            detections: DetectionSet::new(vec![detection(2, 0.75)]),
        };
        let service = service_with(Arc::new(model), dir.path());
        let upload = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]))),
            ImageFormat::Png,
        );

        let processed = service.handle_upload(&upload).unwrap();

        assert_eq!(processed.labels, vec!["Yes"]);
        assert!(processed
            .image_url
            .starts_with("http://localhost:5000/static/processed_"));
        let saved = saved_image(dir.path(), &processed.image_url);
        assert_eq!((saved.width(), saved.height()), (64, 48));
    }

    #[test]
    fn test_grayscale_upload_becomes_color() {
        let dir = tempfile::tempdir().unwrap();
        let model = MockModelService {
            detections: DetectionSet::default(),
        };
        let service = service_with(Arc::new(model), dir.path());
        let upload = encode(
            DynamicImage::ImageLuma8(GrayImage::from_pixel(30, 20, Luma([128]))),
            ImageFormat::Png,
        );

        let processed = service.handle_upload(&upload).unwrap();

        assert!(processed.labels.is_empty());
        let saved = saved_image(dir.path(), &processed.image_url);
        assert_eq!(saved.color(), ColorType::Rgb8);
        assert_eq!((saved.width(), saved.height()), (30, 20));
    }

    #[test]
    fn test_rgba_upload_becomes_color() {
        let dir = tempfile::tempdir().unwrap();
        let model = MockModelService {
            detections: DetectionSet::new(vec![detection(1, 0.95)]),
        };
        let service = service_with(Arc::new(model), dir.path());
        let upload = encode(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 40, Rgba([1, 2, 3, 128]))),
            ImageFormat::Png,
        );

        let processed = service.handle_upload(&upload).unwrap();

        assert_eq!(processed.labels, vec!["Hello"]);
        let saved = saved_image(dir.path(), &processed.image_url);
        assert_eq!(saved.color(), ColorType::Rgb8);
        assert_eq!((saved.width(), saved.height()), (40, 40));
    }

    #[test]
    fn test_undecodable_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model = MockModelService {
            detections: DetectionSet::default(),
        };
        let service = service_with(Arc::new(model), dir.path());

        let result = service.handle_upload(b"definitely not an image");

        assert!(matches!(result, Err(InferenceError::Decode(_))));
    }

    #[test]
    fn test_model_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(FailingModelService), dir.path());
        let upload = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]))),
            ImageFormat::Png,
        );

        let result = service.handle_upload(&upload);

        assert!(matches!(result, Err(InferenceError::Model(_))));
    }
}
