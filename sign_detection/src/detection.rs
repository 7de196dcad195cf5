/// Box in normalized `[0, 1]` coordinates, ordered the way the detector
/// emits them: `(ymin, xmin, ymax, xmax)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl BoundingBox {
    pub fn new(ymin: f32, xmin: f32, ymax: f32, xmax: f32) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }

    /// Pixel coordinates `(left, top, right, bottom)` for an image of the
    /// given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        let (w, h) = (width as f32, height as f32);
        (self.xmin * w, self.ymin * h, self.xmax * w, self.ymax * h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: i64,
    pub bbox: BoundingBox,
    pub score: f32,
}

impl Detection {
    pub fn is_confident(&self, threshold: f32) -> bool {
        self.score >= threshold
    }
}

/// Detections for one image, in the order the model ranked them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// Zips the parallel output sequences of the detector. The result is
    /// truncated to the reported detection count, the shortest sequence and
    /// `max_detections`, whichever is smallest.
    pub fn from_outputs(
        num_detections: usize,
        classes: &[f32],
        boxes: &[f32],
        scores: &[f32],
        max_detections: usize,
    ) -> Self {
        let count = num_detections
            .min(classes.len())
            .min(boxes.len() / 4)
            .min(scores.len())
            .min(max_detections);

        let detections = classes
            .iter()
            .zip(boxes.chunks_exact(4))
            .zip(scores.iter())
            .take(count)
            .map(|((class_id, bbox), score)| Detection {
                class_id: *class_id as i64,
                bbox: BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3]),
                score: *score,
            })
            .collect();

        Self { detections }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    pub fn confident(&self, threshold: f32) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(move |detection| detection.is_confident(threshold))
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let classes = vec![2.0, 1.0, 3.0];
        let boxes = vec![
            0.1, 0.2, 0.5, 0.6, //
            0.0, 0.0, 1.0, 1.0, //
            0.3, 0.3, 0.4, 0.4,
        ];
        let scores = vec![0.9, 0.5, 0.1];
        (classes, boxes, scores)
    }

    #[test]
    fn test_from_outputs_truncates_to_reported_count() {
        let (classes, boxes, scores) = outputs();

        let set = DetectionSet::from_outputs(2, &classes, &boxes, &scores, 100);

        assert_eq!(set.len(), 2);
        let first = set.iter().next().unwrap();
        assert_eq!(first.class_id, 2);
        assert_eq!(first.bbox, BoundingBox::new(0.1, 0.2, 0.5, 0.6));
        assert_eq!(first.score, 0.9);
    }

    #[test]
    fn test_from_outputs_respects_cap_and_shortest_output() {
        let (classes, boxes, scores) = outputs();

        let capped = DetectionSet::from_outputs(3, &classes, &boxes, &scores, 1);
        let short = DetectionSet::from_outputs(10, &classes, &boxes[..8], &scores, 100);

        assert_eq!(capped.len(), 1);
        assert_eq!(short.len(), 2);
    }

    #[test]
    fn test_confident_keeps_scores_at_threshold() {
        let (classes, boxes, scores) = outputs();
        let set = DetectionSet::from_outputs(3, &classes, &boxes, &scores, 100);

        let kept: Vec<i64> = set.confident(0.5).map(|d| d.class_id).collect();

        assert_eq!(kept, vec![2, 1]);
    }

    #[test]
    fn test_to_pixels() {
        let bbox = BoundingBox::new(0.25, 0.1, 0.75, 0.5);

        let (left, top, right, bottom) = bbox.to_pixels(200, 100);

        assert_eq!((left, top, right, bottom), (20.0, 25.0, 100.0, 75.0));
    }
}
