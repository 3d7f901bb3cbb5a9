//! Injected collaborators of the pipeline. The core knows nothing about the
//! concrete embedding model or sampling strategy behind these traits.

use crate::model::{Embedding, Id, Sample};
use crate::Result;

/// Batch text → embedding. Must return one embedding per input, in order.
pub trait EmbeddingService: Send + Sync {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>>;
}

/// Reduce a set of embeddings to one representative vector (a centroid).
pub trait EmbeddingAggregationService: Send + Sync {
    fn aggregate(&self, embeddings: &[&Embedding]) -> Result<Embedding>;
}

/// Pairwise similarity between a sample embedding and a class centroid.
///
/// Embeddings of different dimensions are an error, not a score.
pub trait VectorSimilarityService: Send + Sync {
    fn similarity(&self, sample: &Embedding, centroid: &Embedding) -> Result<f32>;
}

/// Chooses which unlabeled sample a user sees next.
///
/// Returns `None` for no candidates, otherwise the id of exactly one candidate.
pub trait SamplingService: Send + Sync {
    fn sample(&self, candidates: &[Sample]) -> Option<Id>;
}
