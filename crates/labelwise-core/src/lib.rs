pub mod annotation;
pub mod config;
pub mod error;
pub mod model;
pub mod repository;
pub mod service;

pub use annotation::Annotator;
pub use config::{SamplingStrategy, ScoredSamples, Settings};
pub use error::{Error, Result};
pub use model::{AnnotationTask, ClassEstimate, Embedding, Id, Sample, TextClass, create_id};
pub use repository::{
    AnnotationTaskRepository, SampleQuery, SampleRepository, UnitOfWork, UnitOfWorkFactory,
};
pub use service::{
    EmbeddingAggregationService, EmbeddingService, SamplingService, VectorSimilarityService,
};
