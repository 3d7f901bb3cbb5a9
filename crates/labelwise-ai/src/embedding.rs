//! Embedding stage: attaches an embedding to every sample that lacks one.

use std::sync::Arc;

use labelwise_core::{EmbeddingService, Error, Result, SampleQuery, UnitOfWorkFactory};
use tracing::info;

pub struct EmbeddingStage {
    units: Arc<dyn UnitOfWorkFactory>,
    embedder: Arc<dyn EmbeddingService>,
}

impl EmbeddingStage {
    pub fn new(units: Arc<dyn UnitOfWorkFactory>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self { units, embedder }
    }

    /// Embed all unembedded samples with a single model call.
    ///
    /// Returns `false` without writing anything when every sample already has
    /// an embedding. Samples that have one are never re-embedded.
    pub fn embed_all_samples(&self) -> Result<bool> {
        let mut uow = self.units.begin()?;
        let mut samples = uow
            .samples()
            .find(Some(&SampleQuery::new().has_embedding(false)))?;
        if samples.is_empty() {
            return Ok(false);
        }

        let embeddings = {
            let texts: Vec<&str> = samples.iter().map(|s| s.text.as_str()).collect();
            self.embedder.embed(&texts)?
        };
        if embeddings.len() != samples.len() {
            return Err(Error::EmbeddingProvider(format!(
                "expected {} embeddings, got {}",
                samples.len(),
                embeddings.len()
            )));
        }

        for (sample, embedding) in samples.iter_mut().zip(embeddings) {
            sample.embed(embedding);
            uow.samples().update(sample)?;
        }
        uow.commit()?;

        info!(count = samples.len(), "embedded samples");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use labelwise_core::{Embedding, Sample};
    use labelwise_store::MemoryStore;

    /// Embeds text as `[len, word count]` and records every call.
    #[derive(Default)]
    struct CountingEmbedder {
        calls: Mutex<Vec<usize>>,
    }

    impl EmbeddingService for CountingEmbedder {
        fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            self.calls.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.split_whitespace().count() as f32])
                .collect())
        }
    }

    struct ShortEmbedder;

    impl EmbeddingService for ShortEmbedder {
        fn embed(&self, _texts: &[&str]) -> Result<Vec<Embedding>> {
            Ok(vec![vec![1.0]])
        }
    }

    struct FailingEmbedder;

    impl EmbeddingService for FailingEmbedder {
        fn embed(&self, _texts: &[&str]) -> Result<Vec<Embedding>> {
            Err(Error::EmbeddingProvider("model crashed".into()))
        }
    }

    fn seed(units: &MemoryStore, samples: &[Sample]) {
        let mut uow = units.begin().unwrap();
        for s in samples {
            uow.samples().create(s).unwrap();
        }
    }

    #[test]
    fn embeds_everything_in_one_call() {
        let units = MemoryStore::new();
        let samples = vec![
            Sample::new("task", "wake me up"),
            Sample::new("task", "play jazz"),
            Sample::new("task", "is it cold outside today"),
        ];
        seed(&units, &samples);
        let embedder = Arc::new(CountingEmbedder::default());
        let stage = EmbeddingStage::new(Arc::new(units.clone()), embedder.clone());

        assert!(stage.embed_all_samples().unwrap());
        assert_eq!(*embedder.calls.lock().unwrap(), vec![3]);

        let mut uow = units.begin().unwrap();
        for s in &samples {
            let stored = uow.samples().get_by_id(&s.id).unwrap();
            let words = s.text.split_whitespace().count() as f32;
            assert_eq!(stored.embedding, Some(vec![s.text.len() as f32, words]));
        }
    }

    #[test]
    fn full_coverage_is_a_no_op() {
        let units = MemoryStore::new();
        let mut done = Sample::new("task", "already embedded");
        done.embed(vec![0.5, 0.5]);
        seed(&units, &[done.clone()]);
        let embedder = Arc::new(CountingEmbedder::default());
        let stage = EmbeddingStage::new(Arc::new(units.clone()), embedder.clone());

        assert!(!stage.embed_all_samples().unwrap());
        assert!(embedder.calls.lock().unwrap().is_empty());

        let mut uow = units.begin().unwrap();
        assert_eq!(uow.samples().get_by_id(&done.id).unwrap(), done);
    }

    #[test]
    fn only_unembedded_samples_are_sent() {
        let units = MemoryStore::new();
        let mut done = Sample::new("task", "keep me");
        done.embed(vec![42.0]);
        seed(&units, &[done.clone(), Sample::new("task", "new one")]);
        let embedder = Arc::new(CountingEmbedder::default());
        let stage = EmbeddingStage::new(Arc::new(units.clone()), embedder.clone());

        assert!(stage.embed_all_samples().unwrap());
        assert!(!stage.embed_all_samples().unwrap());
        assert_eq!(*embedder.calls.lock().unwrap(), vec![1]);

        let mut uow = units.begin().unwrap();
        assert_eq!(
            uow.samples().get_by_id(&done.id).unwrap().embedding,
            Some(vec![42.0])
        );
    }

    #[test]
    fn length_mismatch_is_a_provider_error() {
        let units = MemoryStore::new();
        seed(&units, &[Sample::new("t", "a"), Sample::new("t", "b")]);
        let stage = EmbeddingStage::new(Arc::new(units.clone()), Arc::new(ShortEmbedder));

        let err = stage.embed_all_samples().unwrap_err();
        assert!(matches!(err, Error::EmbeddingProvider(_)));

        let mut uow = units.begin().unwrap();
        assert!(uow.samples().find(None).unwrap().iter().all(|s| s.embedding.is_none()));
    }

    #[test]
    fn provider_failure_propagates() {
        let units = MemoryStore::new();
        seed(&units, &[Sample::new("t", "a")]);
        let stage = EmbeddingStage::new(Arc::new(units), Arc::new(FailingEmbedder));
        assert!(matches!(
            stage.embed_all_samples(),
            Err(Error::EmbeddingProvider(_))
        ));
    }
}
