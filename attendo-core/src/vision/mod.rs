pub mod align;
pub mod detect;
pub mod embed;

use crate::config::Config;
use image::{imageops, RgbImage};
use ndarray::Array1;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use thiserror::Error;

pub use detect::{BoundingBox, DetectedFace, FaceDetector, Landmarks};
pub use embed::FaceEmbedder;

/// L2-normalized face embedding
pub type Embedding = Array1<f32>;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Failed to load model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Alignment failed: {0}")]
    Alignment(String),
}

/// A face found in a frame, in full-resolution coordinates
#[derive(Debug, Clone)]
pub struct EncodedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Turns images into face embeddings
pub trait FaceEncoder {
    /// Every face in the image, most prominent first
    fn encode_faces(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, VisionError>;

    /// Only the most prominent face, if any
    fn encode_first_face(&mut self, image: &RgbImage) -> Result<Option<EncodedFace>, VisionError> {
        Ok(self.encode_faces(image)?.into_iter().next())
    }
}

/// SCRFD detection, five-point alignment and ArcFace embedding
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    detection_scale: f32,
}

impl OnnxFaceEncoder {
    pub fn new(config: &Config) -> Result<Self, VisionError> {
        log::info!("Loading face detection model...");
        let detector = FaceDetector::new(
            &config.detection.model_path,
            config.detection.confidence_threshold,
        )?;
        log::info!("Loading face embedding model...");
        let embedder = FaceEmbedder::new(&config.embedding.model_path)?;

        Ok(Self {
            detector,
            embedder,
            detection_scale: 1.0,
        })
    }

    /// Run detection on a frame shrunk by `scale`; boxes are mapped back
    pub fn set_detection_scale(&mut self, scale: f32) {
        self.detection_scale = scale.clamp(f32::MIN_POSITIVE, 1.0);
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, VisionError> {
        if self.detection_scale >= 1.0 {
            return self.detector.detect(image);
        }

        let (width, height) = image.dimensions();
        let small_w = ((width as f32 * self.detection_scale) as u32).max(1);
        let small_h = ((height as f32 * self.detection_scale) as u32).max(1);
        log::trace!("Downscaling for detection: {}x{} -> {}x{}", width, height, small_w, small_h);

        let small = imageops::resize(image, small_w, small_h, imageops::FilterType::Triangle);
        let faces = self.detector.detect(&small)?;
        Ok(faces
            .iter()
            .map(|face| face.scaled(1.0 / self.detection_scale))
            .collect())
    }

    fn encode(&mut self, image: &RgbImage, face: &DetectedFace) -> Result<EncodedFace, VisionError> {
        let aligned = align::align_face(image, &face.landmarks)?;
        Ok(EncodedFace {
            bbox: face.bbox,
            embedding: self.embedder.embed(&aligned)?,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode_faces(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, VisionError> {
        let faces = self.detect(image)?;
        let mut encoded = Vec::with_capacity(faces.len());
        for face in &faces {
            match self.encode(image, face) {
                Ok(e) => encoded.push(e),
                Err(e) => log::warn!("Skipping face at {:?}: {}", face.bbox, e),
            }
        }
        Ok(encoded)
    }

    fn encode_first_face(&mut self, image: &RgbImage) -> Result<Option<EncodedFace>, VisionError> {
        match self.detect(image)?.first() {
            Some(face) => Ok(Some(self.encode(image, face)?)),
            None => Ok(None),
        }
    }
}

/// CPU session with full graph optimization
pub(crate) fn load_session<P: AsRef<Path>>(model_path: P) -> Result<Session, VisionError> {
    let path = model_path.as_ref();

    let session = Session::builder()
        .map_err(|e| model_load_error(path, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| model_load_error(path, e))?
        .commit_from_file(path)
        .map_err(|e| model_load_error(path, e))?;

    log::info!("Loaded ONNX model: {}", path.display());
    Ok(session)
}

fn model_load_error(path: &Path, reason: impl std::fmt::Display) -> VisionError {
    VisionError::ModelLoad {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
