//! Vector math for embeddings: mean aggregation and cosine similarity.

use labelwise_core::{
    Embedding, EmbeddingAggregationService, Error, Result, VectorSimilarityService,
};

/// Elementwise arithmetic mean across the batch dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanAggregation;

impl EmbeddingAggregationService for MeanAggregation {
    fn aggregate(&self, embeddings: &[&Embedding]) -> Result<Embedding> {
        mean(embeddings)
    }
}

/// Cosine similarity in [-1, 1]. Zero vectors score 0.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineSimilarity;

impl VectorSimilarityService for CosineSimilarity {
    fn similarity(&self, sample: &Embedding, centroid: &Embedding) -> Result<f32> {
        if sample.len() != centroid.len() {
            return Err(Error::EmbeddingProvider(format!(
                "embedding dimension mismatch: sample has {}, centroid has {}",
                sample.len(),
                centroid.len()
            )));
        }
        Ok(cosine_sim(sample, centroid))
    }
}

pub fn mean(embeddings: &[&Embedding]) -> Result<Embedding> {
    let Some(first) = embeddings.first() else {
        return Err(Error::EmbeddingProvider(
            "cannot aggregate an empty set of embeddings".into(),
        ));
    };
    let dim = first.len();

    let mut sum = vec![0.0f32; dim];
    for embedding in embeddings {
        if embedding.len() != dim {
            return Err(Error::EmbeddingProvider(format!(
                "embedding dimension mismatch: expected {dim}, got {}",
                embedding.len()
            )));
        }
        for (acc, &val) in sum.iter_mut().zip(embedding.iter()) {
            *acc += val;
        }
    }

    let count = embeddings.len() as f32;
    for v in &mut sum {
        *v /= count;
    }
    Ok(sum)
}

pub fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "cosine of vectors with different lengths");
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = l2_norm(a) * l2_norm(b);
    if norm > 0.0 { dot / norm } else { 0.0 }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2-normalize a vector in place.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
