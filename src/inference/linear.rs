//! Built-in linear + softmax model.
//!
//! The model file is a flat sequence of little-endian f32 weights. Each
//! input is scaled elementwise by the weights (cycling when the input is
//! longer than the weight vector) and pushed through a numerically stable
//! softmax. Small enough to run anywhere, deterministic enough to test
//! against.

use std::{io, path::Path};

use tracing::info;

use super::{ExecutorError, ModelExecutor};

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("model file {path} is empty or truncated")]
    Empty { path: String },
}

#[derive(Debug)]
pub struct LinearModel {
    weights: Vec<f32>,
}

impl LinearModel {
    /// Load weights from a raw little-endian f32 file. Trailing bytes that
    /// do not form a whole f32 are rejected as truncation.
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| ModelLoadError::Io {
            path: display.clone(),
            source,
        })?;
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(ModelLoadError::Empty { path: display });
        }

        let weights: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        info!(path = %path.display(), parameters = weights.len(), "model loaded");
        Ok(Self { weights })
    }

    pub fn from_weights(weights: Vec<f32>) -> Self {
        assert!(!weights.is_empty(), "model requires at least one weight");
        Self { weights }
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }

        let scaled: Vec<f32> = input
            .iter()
            .enumerate()
            .map(|(i, x)| x * self.weights[i % self.weights.len()])
            .collect();

        // Softmax, shifted by the max for stability.
        let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = scaled.iter().map(|x| (x - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        exps.into_iter().map(|x| x / sum).collect()
    }
}

impl ModelExecutor for LinearModel {
    fn batch_predict(&self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ExecutorError> {
        Ok(inputs.iter().map(|input| self.forward(input)).collect())
    }
}
