use ndarray::Array1;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::comparison::Classification;

/// Score and label produced for one pair of embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    /// Cosine similarity in [-1, 1].
    pub score: f32,
    /// `score` classified against the threshold in effect.
    pub label: Classification,
}

/// Cosine similarity between two embeddings.
///
/// Accumulates in `f64` and clamps to [-1, 1]. The result is exactly
/// symmetric in its arguments and exactly 1.0 for identical non-zero inputs.
pub fn cosine_similarity(a: &Array1<f32>, b: &Array1<f32>) -> Result<f32> {
    if a.len() != b.len() {
        return Err(AppError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let a = a.mapv(f64::from);
    let b = b.mapv(f64::from);
    let norm_sq_a = a.dot(&a);
    let norm_sq_b = b.dot(&b);

    if !is_usable_norm(norm_sq_a) || !is_usable_norm(norm_sq_b) {
        return Err(AppError::DegenerateVector);
    }

    let score = a.dot(&b) / (norm_sq_a * norm_sq_b).sqrt();
    Ok(score.clamp(-1.0, 1.0) as f32)
}

// Rejects zero, NaN and infinite squared norms.
fn is_usable_norm(norm_sq: f64) -> bool {
    norm_sq > 0.0 && norm_sq.is_finite()
}

/// Compare two embeddings and classify the score against `threshold`.
pub fn evaluate(a: &Array1<f32>, b: &Array1<f32>, threshold: f32) -> Result<Evaluation> {
    let score = cosine_similarity(a, b)?;
    Ok(Evaluation {
        score,
        label: Classification::from_score(score, threshold),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_identical_vectors_score_one() {
        let v = arr1(&[0.3f32, -1.7, 2.25, 0.0, 9.5]);
        let eval = evaluate(&v, &v, 1.0).unwrap();
        assert_eq!(eval.score, 1.0);
        assert_eq!(eval.label, Classification::Similar);
    }

    #[test]
    fn test_orthogonal_vectors() {
        let a = arr1(&[1.0f32, 0.0]);
        let b = arr1(&[0.0f32, 1.0]);
        let eval = evaluate(&a, &b, 0.8).unwrap();
        assert_eq!(eval.score, 0.0);
        assert_eq!(eval.label, Classification::NotSimilar);

        // A non-positive threshold accepts orthogonal vectors.
        assert_eq!(evaluate(&a, &b, 0.0).unwrap().label, Classification::Similar);
    }

    #[test]
    fn test_opposite_vectors() {
        let a = arr1(&[1.0f32, 0.0]);
        let b = arr1(&[-1.0f32, 0.0]);
        assert!((cosine_similarity(&a, &b).unwrap() - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_symmetry() {
        let a = arr1(&[0.12f32, 3.4, -5.6, 7.8]);
        let b = arr1(&[9.0f32, -0.1, 2.2, 0.33]);
        assert_eq!(
            evaluate(&a, &b, 0.5).unwrap().score,
            evaluate(&b, &a, 0.5).unwrap().score
        );
    }

    #[test]
    fn test_magnitude_does_not_matter() {
        let a = arr1(&[1.0f32, 2.0, 3.0]);
        let b = a.mapv(|x| x * 40.0);
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = arr1(&[1.0f32, 0.0]);
        let b = arr1(&[1.0f32, 0.0, 0.0]);
        assert!(matches!(
            evaluate(&a, &b, 0.8),
            Err(AppError::DimensionMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn test_zero_vector_is_degenerate() {
        let a = arr1(&[0.0f32, 0.0, 0.0]);
        let b = arr1(&[1.0f32, 2.0, 3.0]);
        assert!(matches!(evaluate(&a, &b, 0.8), Err(AppError::DegenerateVector)));
        assert!(matches!(evaluate(&b, &a, 0.8), Err(AppError::DegenerateVector)));
    }

    #[test]
    fn test_empty_and_nan_vectors_are_degenerate() {
        let empty = Array1::<f32>::zeros(0);
        assert!(matches!(
            cosine_similarity(&empty, &empty),
            Err(AppError::DegenerateVector)
        ));

        let nan = arr1(&[f32::NAN, 1.0]);
        let ok = arr1(&[1.0f32, 1.0]);
        assert!(matches!(
            cosine_similarity(&nan, &ok),
            Err(AppError::DegenerateVector)
        ));
    }
}
