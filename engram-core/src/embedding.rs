//! Embedding vector operations

use crate::{EngramError, EngramResult, ValidationError};
use serde::{Deserialize, Serialize};

/// Embedding vector of the configured dimension.
/// The dimension is fixed at index-creation time in the store; re-dimensioning
/// requires re-embedding every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    /// The embedding data as a vector of f32 values.
    pub data: Vec<f32>,
    /// Identifier of the model that produced this embedding.
    pub model_id: String,
    /// Number of dimensions (must match data.len()).
    pub dimensions: i32,
}

impl EmbeddingVector {
    /// Create a new embedding vector.
    pub fn new(data: Vec<f32>, model_id: String) -> Self {
        let dimensions = data.len() as i32;
        Self {
            data,
            model_id,
            dimensions,
        }
    }

    /// Compute cosine similarity between two embedding vectors.
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> EngramResult<f32> {
        if self.dimensions != other.dimensions {
            return Err(EngramError::Validation(ValidationError::DimensionMismatch {
                expected: self.dimensions,
                got: other.dimensions,
            }));
        }

        let mut dot_product = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.data.iter().zip(other.data.iter()) {
            dot_product += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let norm_a = norm_a.sqrt();
        let norm_b = norm_b.sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }

        Ok(dot_product / (norm_a * norm_b))
    }

    /// Check if this vector has valid dimensions.
    pub fn is_valid(&self) -> bool {
        self.dimensions > 0 && self.data.len() == self.dimensions as usize
    }

    /// Validate this vector against the configured dimension.
    pub fn ensure_dimensions(&self, expected: i32) -> EngramResult<()> {
        if !self.is_valid() || self.dimensions != expected {
            return Err(EngramError::Validation(ValidationError::DimensionMismatch {
                expected,
                got: self.data.len() as i32,
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(data: Vec<f32>) -> EmbeddingVector {
        EmbeddingVector::new(data, "test-model".to_string())
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let a = vector(vec![1.0, 2.0, 3.0]);
        let sim = a.cosine_similarity(&a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = vector(vec![1.0, 0.0]);
        let b = vector(vec![0.0, 1.0]);
        let sim = a.cosine_similarity(&b).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        let a = vector(vec![1.0, 1.0]);
        let b = vector(vec![-1.0, -1.0]);
        let sim = a.cosine_similarity(&b).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        let a = vector(vec![1.0, 2.0]);
        let b = vector(vec![1.0, 2.0, 3.0]);
        assert!(a.cosine_similarity(&b).is_err());
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = vector(vec![0.0, 0.0]);
        let b = vector(vec![1.0, 2.0]);
        assert_eq!(a.cosine_similarity(&b).unwrap(), 0.0);
    }

    #[test]
    fn test_ensure_dimensions() {
        let a = vector(vec![1.0; 768]);
        assert!(a.ensure_dimensions(768).is_ok());
        assert!(a.ensure_dimensions(1536).is_err());
    }
}
