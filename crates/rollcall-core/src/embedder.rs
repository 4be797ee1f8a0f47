//! Face-embedding provider adapter.
//!
//! Wraps an ArcFace-style ONNX model behind the [`FaceEmbedder`] seam.
//! Probe frames arrive as encoded image bytes; every provider-side failure
//! (undecodable image, inference error, bad output shape) folds into
//! [`EmbedOutcome::NoFace`] so callers see exactly one "nothing usable in
//! this frame" signal. A later frame is simply a new attempt.

use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
const EMBED_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Outcome of one embedding attempt.
#[derive(Debug, Clone)]
pub enum EmbedOutcome {
    /// A usable face embedding was extracted from the frame.
    Face(Embedding),
    /// Nothing matchable in the frame. Not an error.
    NoFace,
}

/// Provider seam: turns a captured frame into an embedding, or `NoFace`.
///
/// Implementations must never surface provider internals as errors;
/// infrastructure failures belong to the layer hosting the provider (a
/// dead engine thread), not to the per-frame contract.
pub trait FaceEmbedder {
    fn embed(&mut self, image_bytes: &[u8]) -> EmbedOutcome;
}

/// ONNX-backed embedder. Owns a mutable inference session, so it lives on
/// a dedicated engine thread rather than in shared async state.
#[derive(Debug)]
pub struct OrtEmbedder {
    session: Session,
}

impl OrtEmbedder {
    /// Load the ONNX model from the given path. Fails fast so the daemon
    /// never starts with a missing model.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }

    fn try_embed(&mut self, image_bytes: &[u8]) -> Result<Embedding, String> {
        let decoded = image::load_from_memory(image_bytes)
            .map_err(|e| format!("image decode: {e}"))?;

        let gray = decoded
            .resize_exact(
                EMBED_INPUT_SIZE as u32,
                EMBED_INPUT_SIZE as u32,
                image::imageops::FilterType::Triangle,
            )
            .to_luma8();

        let input = Self::preprocess(gray.as_raw());

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())
                .map_err(|e| format!("tensor view: {e}"))?])
            .map_err(|e| format!("inference: {e}"))?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("embedding extraction: {e}"))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != EMBEDDING_DIM {
            return Err(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            ));
        }

        // L2-normalize; an all-zero output means the model saw nothing.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err("zero-norm embedding".to_string());
        }
        let values = raw.iter().map(|x| x / norm).collect();

        Ok(Embedding {
            values,
            model_version: Some(EMBED_MODEL_VERSION.to_string()),
        })
    }

    /// Preprocess a 112x112 grayscale crop into a NCHW float tensor,
    /// replicating the single channel to [R=Y, G=Y, B=Y].
    fn preprocess(gray: &[u8]) -> Array4<f32> {
        let size = EMBED_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = gray.get(y * size + x).copied().unwrap_or(0) as f32;
                let normalized = (pixel - EMBED_MEAN) / EMBED_STD;
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

impl FaceEmbedder for OrtEmbedder {
    fn embed(&mut self, image_bytes: &[u8]) -> EmbedOutcome {
        match self.try_embed(image_bytes) {
            Ok(embedding) => EmbedOutcome::Face(embedding),
            Err(reason) => {
                tracing::debug!(reason, "frame yielded no usable face");
                EmbedOutcome::NoFace
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let gray = vec![128u8; EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        let tensor = OrtEmbedder::preprocess(&gray);
        assert_eq!(tensor.shape(), &[1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let gray = vec![128u8; EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        let tensor = OrtEmbedder::preprocess(&gray);
        let expected = (128.0 - EMBED_MEAN) / EMBED_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let gray: Vec<u8> = (0..EMBED_INPUT_SIZE * EMBED_INPUT_SIZE)
            .map(|i| (i % 256) as u8)
            .collect();
        let tensor = OrtEmbedder::preprocess(&gray);
        for y in 0..EMBED_INPUT_SIZE {
            for x in 0..EMBED_INPUT_SIZE {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_load_missing_model_fails_fast() {
        let err = OrtEmbedder::load("/nonexistent/model.onnx").unwrap_err();
        assert!(matches!(err, EmbedderError::ModelNotFound(_)));
    }
}
