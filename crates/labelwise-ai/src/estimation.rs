//! Centroid-based class estimation.
//!
//! Aggregates the embeddings of labeled samples into one centroid per text
//! class, then scores samples by similarity to every centroid of their task
//! and upserts the scores as [`ClassEstimate`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use labelwise_core::{
    ClassEstimate, Embedding, EmbeddingAggregationService, Id, Result, Sample, SampleQuery,
    ScoredSamples, UnitOfWorkFactory, VectorSimilarityService,
};
use tracing::{debug, info};

/// Representative embedding of one text class.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    pub annotation_task_id: Id,
    pub embedding: Embedding,
    /// Number of labeled samples aggregated into this centroid.
    pub members: usize,
}

/// Centroids keyed by text class id. Classes without labeled, embedded
/// samples have no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Centroids {
    by_class: BTreeMap<Id, Centroid>,
}

impl Centroids {
    /// Build centroids from labeled samples. Unlabeled or unembedded samples
    /// are ignored.
    pub fn build(
        samples: &[Sample],
        aggregation: &dyn EmbeddingAggregationService,
    ) -> Result<Self> {
        // class id → (task id, member embeddings)
        let mut groups: BTreeMap<&str, (&str, Vec<&Embedding>)> = BTreeMap::new();
        for sample in samples {
            let (Some(class_id), Some(embedding)) = (&sample.text_class, &sample.embedding) else {
                continue;
            };
            groups
                .entry(class_id.as_str())
                .or_insert_with(|| (sample.annotation_task_id.as_str(), Vec::new()))
                .1
                .push(embedding);
        }

        let mut by_class = BTreeMap::new();
        for (class_id, (task_id, embeddings)) in groups {
            let embedding = aggregation.aggregate(&embeddings)?;
            by_class.insert(
                class_id.to_string(),
                Centroid {
                    annotation_task_id: task_id.to_string(),
                    embedding,
                    members: embeddings.len(),
                },
            );
        }
        Ok(Self { by_class })
    }

    pub fn get(&self, text_class_id: &str) -> Option<&Centroid> {
        self.by_class.get(text_class_id)
    }

    pub fn len(&self) -> usize {
        self.by_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }

    /// Similarity of `embedding` to every centroid of `task_id`, in class id order.
    pub fn score(
        &self,
        task_id: &str,
        embedding: &Embedding,
        similarity: &dyn VectorSimilarityService,
    ) -> Result<Vec<(Id, f32)>> {
        self.by_class
            .iter()
            .filter(|(_, c)| c.annotation_task_id == task_id)
            .map(|(class_id, c)| {
                Ok((class_id.clone(), similarity.similarity(embedding, &c.embedding)?))
            })
            .collect()
    }

    /// The class whose centroid is most similar to `embedding`.
    pub fn best_match(
        &self,
        task_id: &str,
        embedding: &Embedding,
        similarity: &dyn VectorSimilarityService,
    ) -> Result<Option<(Id, f32)>> {
        Ok(self
            .score(task_id, embedding, similarity)?
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1)))
    }
}

/// Outcome of one estimation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EstimationReport {
    pub centroids: usize,
    pub scored: usize,
    /// Samples whose estimate set changed and were written back.
    pub changed: usize,
}

/// Background stage refreshing every scored sample's class estimates.
pub struct EstimationStage {
    units: Arc<dyn UnitOfWorkFactory>,
    aggregation: Arc<dyn EmbeddingAggregationService>,
    similarity: Arc<dyn VectorSimilarityService>,
    scored: ScoredSamples,
}

impl EstimationStage {
    pub fn new(
        units: Arc<dyn UnitOfWorkFactory>,
        aggregation: Arc<dyn EmbeddingAggregationService>,
        similarity: Arc<dyn VectorSimilarityService>,
    ) -> Self {
        Self {
            units,
            aggregation,
            similarity,
            scored: ScoredSamples::default(),
        }
    }

    pub fn with_scored_samples(mut self, scored: ScoredSamples) -> Self {
        self.scored = scored;
        self
    }

    /// Recompute centroids from scratch and upsert estimates in one unit of work.
    ///
    /// Every sample is scored before anything is written, so a failing cycle
    /// leaves the store untouched. Re-running without label or embedding
    /// changes rewrites nothing.
    pub fn estimate_samples(&self) -> Result<EstimationReport> {
        let mut uow = self.units.begin()?;

        let labeled_query = SampleQuery::new().has_label(true).has_embedding(true);
        let labeled = uow.samples().find(Some(&labeled_query))?;
        let centroids = Centroids::build(&labeled, self.aggregation.as_ref())?;
        if centroids.is_empty() {
            debug!("no labeled embedded samples, skipping estimation");
            return Ok(EstimationReport::default());
        }

        let samples = match self.scored {
            ScoredSamples::Labeled => labeled,
            scored => {
                let query = SampleQuery {
                    has_label: scored.has_label(),
                    has_embedding: Some(true),
                    task_id: None,
                };
                uow.samples().find(Some(&query))?
            }
        };

        let scored = samples.len();
        let mut changed = Vec::new();
        for mut sample in samples {
            let Some(embedding) = &sample.embedding else {
                continue;
            };
            let scores = centroids.score(
                &sample.annotation_task_id,
                embedding,
                self.similarity.as_ref(),
            )?;
            let before = sample.estimates.clone();
            sample.add_class_estimates(
                scores
                    .into_iter()
                    .map(|(class_id, confidence)| ClassEstimate::new(class_id, confidence)),
            );
            if sample.estimates != before {
                debug!(sample_id = %sample.id, "estimates changed");
                changed.push(sample);
            }
        }

        for sample in &changed {
            uow.samples().update(sample)?;
        }
        let report = EstimationReport {
            centroids: centroids.len(),
            scored,
            changed: changed.len(),
        };

        uow.commit()?;
        info!(
            centroids = report.centroids,
            scored = report.scored,
            changed = report.changed,
            "estimation cycle complete"
        );
        Ok(report)
    }
}
