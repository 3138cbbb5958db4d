use super::{load_session, VisionError};
use image::{imageops, RgbImage};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;

/// SCRFD input is a square of this size
const INPUT_SIZE: u32 = 640;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const NMS_IOU: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - overlap;
        if union > 0.0 {
            overlap / union
        } else {
            0.0
        }
    }

    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

/// Five facial keypoints: eyes, nose tip, mouth corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmarks(pub [(f32, f32); 5]);

impl Landmarks {
    pub fn scaled(&self, factor: f32) -> Landmarks {
        Landmarks(self.0.map(|(x, y)| (x * factor, y * factor)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub confidence: f32,
}

impl DetectedFace {
    pub fn scaled(&self, factor: f32) -> DetectedFace {
        DetectedFace {
            bbox: self.bbox.scaled(factor),
            landmarks: self.landmarks.scaled(factor),
            confidence: self.confidence,
        }
    }
}

/// SCRFD face detector
pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
}

impl FaceDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, confidence_threshold: f32) -> Result<Self, VisionError> {
        Ok(Self {
            session: load_session(model_path)?,
            confidence_threshold,
        })
    }

    /// Faces in `image`, most prominent first. Empty when nothing is found.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, VisionError> {
        let (width, height) = image.dimensions();
        let scale_x = INPUT_SIZE as f32 / width as f32;
        let scale_y = INPUT_SIZE as f32 / height as f32;

        let input = Value::from_array(Self::to_tensor(image))
            .map_err(|e| VisionError::Inference(format!("Failed to create input tensor: {}", e)))?;
        let outputs = self
            .session
            .run(ort::inputs!["input.1" => input])
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        // Outputs come grouped by kind: scores for each stride, then boxes, then keypoints
        let levels = STRIDES.len();
        if outputs.len() < levels * 3 {
            return Err(VisionError::Inference(format!(
                "Expected {} detector outputs, got {}",
                levels * 3,
                outputs.len()
            )));
        }

        let mut faces = Vec::new();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Inference(format!("stride {} scores: {}", stride, e)))?;
            let (_, boxes) = outputs[level + levels]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Inference(format!("stride {} boxes: {}", stride, e)))?;
            let (_, keypoints) = outputs[level + 2 * levels]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Inference(format!("stride {} keypoints: {}", stride, e)))?;

            let cells = INPUT_SIZE as usize / stride;
            for (cell, (cx, cy)) in anchor_centers(stride, cells).enumerate() {
                for slot in 0..ANCHORS_PER_CELL {
                    let idx = cell * ANCHORS_PER_CELL + slot;
                    let (Some(&logit), Some(bbox), Some(kps)) = (
                        scores.get(idx),
                        boxes.get(idx * 4..idx * 4 + 4),
                        keypoints.get(idx * 10..idx * 10 + 10),
                    ) else {
                        continue;
                    };

                    let confidence = sigmoid(logit);
                    if confidence < self.confidence_threshold {
                        continue;
                    }

                    let x1 = cx - bbox[0].abs();
                    let y1 = cy - bbox[1].abs();
                    let x2 = cx + bbox[2].abs();
                    let y2 = cy + bbox[3].abs();

                    let s = stride as f32;
                    let mut points = [(0.0, 0.0); 5];
                    for (p, point) in points.iter_mut().enumerate() {
                        *point = (
                            (cx + kps[p * 2] * s) / scale_x,
                            (cy + kps[p * 2 + 1] * s) / scale_y,
                        );
                    }

                    faces.push(DetectedFace {
                        bbox: BoundingBox {
                            x: x1 / scale_x,
                            y: y1 / scale_y,
                            width: (x2 - x1) / scale_x,
                            height: (y2 - y1) / scale_y,
                        },
                        landmarks: Landmarks(points),
                        confidence,
                    });
                }
            }
        }

        log::trace!("{} raw detections", faces.len());
        let mut faces = non_max_suppression(faces, NMS_IOU);

        // Larger, more confident faces first
        faces.sort_by(|a, b| {
            let rank_a = a.confidence * a.bbox.area().sqrt();
            let rank_b = b.confidence * b.bbox.area().sqrt();
            rank_b.partial_cmp(&rank_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(faces)
    }

    /// Resize to the model input and lay out as NCHW floats in [0, 1]
    fn to_tensor(image: &RgbImage) -> ([usize; 4], Vec<f32>) {
        let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, imageops::FilterType::Triangle);
        let side = INPUT_SIZE as usize;
        let mut data = Vec::with_capacity(3 * side * side);
        for channel in 0..3 {
            data.extend(resized.pixels().map(|p| p[channel] as f32 / 255.0));
        }
        ([1, 3, side, side], data)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn anchor_centers(stride: usize, cells: usize) -> impl Iterator<Item = (f32, f32)> {
    (0..cells).flat_map(move |row| {
        (0..cells).map(move |col| {
            (
                (col as f32 + 0.5) * stride as f32,
                (row as f32 + 0.5) * stride as f32,
            )
        })
    })
}

fn non_max_suppression(mut faces: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<DetectedFace> = Vec::new();
    for face in faces {
        if kept.iter().all(|k| k.bbox.iou(&face.bbox) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, size: f32, confidence: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x,
                y,
                width: size,
                height: size,
            },
            landmarks: Landmarks([(0.0, 0.0); 5]),
            confidence,
        }
    }

    #[test]
    fn test_bbox_iou() {
        let a = face(0.0, 0.0, 10.0, 1.0).bbox;
        let b = face(5.0, 5.0, 10.0, 1.0).bbox;
        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-4);
        assert_eq!(a.iou(&face(50.0, 50.0, 10.0, 1.0).bbox), 0.0);
    }

    #[test]
    fn test_nms_keeps_most_confident_of_overlap() {
        let faces = vec![
            face(0.0, 0.0, 10.0, 0.6),
            face(1.0, 1.0, 10.0, 0.9),
            face(100.0, 100.0, 10.0, 0.7),
        ];
        let kept = non_max_suppression(faces, NMS_IOU);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_anchor_centers_cover_grid() {
        let centers: Vec<_> = anchor_centers(32, 2).collect();
        assert_eq!(centers, vec![(16.0, 16.0), (48.0, 16.0), (16.0, 48.0), (48.0, 48.0)]);
    }

    #[test]
    fn test_scaled_face() {
        let scaled = face(10.0, 20.0, 30.0, 0.8).scaled(4.0);
        assert_eq!(scaled.bbox.x, 40.0);
        assert_eq!(scaled.bbox.height, 120.0);
        assert_eq!(scaled.confidence, 0.8);
    }

    #[test]
    #[ignore] // Requires model file
    fn test_face_detection() {
        let mut detector = FaceDetector::new("models/scrfd_500m.onnx", 0.5).unwrap();
        let faces = detector.detect(&RgbImage::new(640, 480)).unwrap();
        assert!(faces.is_empty());
    }
}
