use super::align::ALIGNED_SIZE;
use super::{load_session, Embedding, VisionError};
use image::RgbImage;
use ndarray::Array1;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;

/// ArcFace output length
pub const EMBEDDING_DIM: usize = 512;

/// ArcFace embedder producing L2-normalized vectors
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self, VisionError> {
        Ok(Self {
            session: load_session(model_path)?,
        })
    }

    /// Embed an aligned 112x112 face crop
    pub fn embed(&mut self, aligned: &RgbImage) -> Result<Embedding, VisionError> {
        if aligned.dimensions() != (ALIGNED_SIZE, ALIGNED_SIZE) {
            return Err(VisionError::Inference(format!(
                "Embedder expects {0}x{0} input, got {1}x{2}",
                ALIGNED_SIZE,
                aligned.width(),
                aligned.height()
            )));
        }

        let input = Value::from_array(Self::to_tensor(aligned))
            .map_err(|e| VisionError::Inference(format!("Failed to create input tensor: {}", e)))?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::Inference(format!("Failed to extract embedding: {}", e)))?;

        if shape.len() != 2 || shape[1] as usize != EMBEDDING_DIM || data.len() < EMBEDDING_DIM {
            return Err(VisionError::Inference(format!(
                "Unexpected embedding shape {:?}",
                shape
            )));
        }

        Ok(normalize(Array1::from_iter(data[..EMBEDDING_DIM].iter().copied())))
    }

    /// NCHW floats, each channel mapped to roughly [-1, 1]
    fn to_tensor(image: &RgbImage) -> ([usize; 4], Vec<f32>) {
        let side = ALIGNED_SIZE as usize;
        let mut data = Vec::with_capacity(3 * side * side);
        for channel in 0..3 {
            data.extend(image.pixels().map(|p| (p[channel] as f32 - 127.5) / 128.0));
        }
        ([1, 3, side, side], data)
    }
}

/// Scale to unit length; the zero vector is returned unchanged
pub fn normalize(mut embedding: Embedding) -> Embedding {
    let norm = embedding.dot(&embedding).sqrt();
    if norm > 0.0 {
        embedding /= norm;
    }
    embedding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let unit = normalize(Array1::from_vec(vec![3.0, 4.0]));
        assert!((unit[0] - 0.6).abs() < 1e-6);
        assert!((unit[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let zero = normalize(Array1::zeros(EMBEDDING_DIM));
        assert!(zero.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_tensor_layout() {
        let image = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, image::Rgb([255, 127, 0]));
        let (shape, data) = FaceEmbedder::to_tensor(&image);
        let plane = (ALIGNED_SIZE * ALIGNED_SIZE) as usize;
        assert_eq!(shape, [1, 3, 112, 112]);
        assert_eq!(data.len(), 3 * plane);
        assert!((data[0] - 127.5 / 128.0).abs() < 1e-6);
        assert!((data[plane] + 0.5 / 128.0).abs() < 1e-6);
        assert!((data[2 * plane] + 127.5 / 128.0).abs() < 1e-6);
    }
}
