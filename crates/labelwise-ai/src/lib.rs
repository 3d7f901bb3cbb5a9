//! Model-side pipeline: sample embedding, centroid estimation and sampling.
//!
//! The ONNX sentence encoder is behind the `onnx` feature; everything else
//! works against the [`labelwise_core`] service traits and runs without a
//! model.

mod embedding;
mod estimation;
mod sampling;
pub mod vector;

pub use embedding::EmbeddingStage;
pub use estimation::{Centroid, Centroids, EstimationReport, EstimationStage};
pub use sampling::{LeastConfidentSampling, RandomSampling, sampling_service};
pub use vector::{CosineSimilarity, MeanAggregation};

#[cfg(feature = "onnx")]
mod embedder;
#[cfg(feature = "onnx")]
pub use embedder::{BATCH_SIZE, Embedder, OnnxEmbeddingService, mean_pool};
