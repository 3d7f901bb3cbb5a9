//! [`Stage`] adapters for the pipeline stages.

use labelwise_ai::{EmbeddingStage, EstimationStage};
use labelwise_core::Result;

use crate::scheduler::{Progress, Stage};

impl Stage for EmbeddingStage {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn run_cycle(&self) -> Result<Progress> {
        Ok(if self.embed_all_samples()? {
            Progress::Worked
        } else {
            Progress::Idle
        })
    }
}

impl Stage for EstimationStage {
    fn name(&self) -> &'static str {
        "estimation"
    }

    /// Counts as work only when some sample's estimates changed, so an
    /// unchanged store lets the worker sleep. New labels and finished
    /// embedding cycles wake it through its change signal instead of a
    /// back-to-back rerun.
    fn run_cycle(&self) -> Result<Progress> {
        let report = self.estimate_samples()?;
        Ok(if report.changed > 0 {
            Progress::Worked
        } else {
            Progress::Idle
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::scheduler::{Worker, WorkerConfig};
    use labelwise_ai::{CosineSimilarity, MeanAggregation};
    use labelwise_core::{AnnotationTask, Embedding, EmbeddingService, Sample, UnitOfWorkFactory};
    use labelwise_store::MemoryStore;
    use tokio::sync::watch;

    /// Maps "north"/"east" to orthogonal unit vectors.
    struct CompassEmbedder;

    impl EmbeddingService for CompassEmbedder {
        fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("north") {
                        vec![0.0, 1.0]
                    } else {
                        vec![1.0, 0.0]
                    }
                })
                .collect())
        }
    }

    fn seeded() -> (MemoryStore, AnnotationTask) {
        let units = MemoryStore::new();
        let mut task = AnnotationTask::new("directions");
        let north = task.create_text_class("north").unwrap();
        let east = task.create_text_class("east").unwrap();

        let mut uow = units.begin().unwrap();
        uow.annotation_tasks().create(&task).unwrap();
        for (text, class) in [
            ("go north", Some(&north)),
            ("head east", Some(&east)),
            ("north again", None),
        ] {
            let mut sample = Sample::new(task.id.clone(), text);
            sample.annotate(class);
            uow.samples().create(&sample).unwrap();
        }
        uow.commit().unwrap();
        (units, task)
    }

    fn stages(units: &MemoryStore) -> (EmbeddingStage, EstimationStage) {
        let units: Arc<dyn UnitOfWorkFactory> = Arc::new(units.clone());
        (
            EmbeddingStage::new(Arc::clone(&units), Arc::new(CompassEmbedder)),
            EstimationStage::new(units, Arc::new(MeanAggregation), Arc::new(CosineSimilarity)),
        )
    }

    #[test]
    fn embedding_cycle_reports_work_once() {
        let (units, _) = seeded();
        let (embedding, _) = stages(&units);
        assert_eq!(embedding.run_cycle().unwrap(), Progress::Worked);
        assert_eq!(embedding.run_cycle().unwrap(), Progress::Idle);
    }

    #[test]
    fn estimation_cycle_idles_when_nothing_changes() {
        let (units, _) = seeded();
        let (embedding, estimation) = stages(&units);
        assert_eq!(estimation.run_cycle().unwrap(), Progress::Idle);

        embedding.run_cycle().unwrap();
        assert_eq!(estimation.run_cycle().unwrap(), Progress::Worked);
        assert_eq!(estimation.run_cycle().unwrap(), Progress::Idle);
    }

    #[tokio::test]
    async fn workers_embed_then_estimate() {
        let (units, task) = seeded();
        let (embedding, estimation) = stages(&units);
        let config = WorkerConfig {
            idle_interval: Duration::from_secs(3600),
            stop_on_error: true,
        };

        let estimation = Worker::new(Arc::new(estimation), config.clone());
        let wake_estimation = estimation.signal();
        let embedding = Worker::new(Arc::new(embedding), config).notify_on_work(wake_estimation);

        let (stop, shutdown) = watch::channel(false);
        let estimation = estimation.spawn(shutdown.clone());
        let embedding = embedding.spawn(shutdown);

        let north = task.get_text_class_by_name("north").unwrap().id.clone();
        let east = task.get_text_class_by_name("east").unwrap().id.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let mut uow = units.begin().unwrap();
                let labeled = uow
                    .samples()
                    .find(Some(&labelwise_core::SampleQuery::new().has_label(true)))
                    .unwrap();
                if labeled.iter().all(|s| s.estimates.len() == 2) {
                    let suggested = |text: &str| {
                        labeled
                            .iter()
                            .find(|s| s.text == text)
                            .and_then(|s| s.suggested_class())
                            .map(|e| e.text_class_id.clone())
                    };
                    assert_eq!(suggested("go north"), Some(north.clone()));
                    assert_eq!(suggested("head east"), Some(east.clone()));
                    break;
                }
                drop(uow);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("estimates never appeared");

        stop.send(true).unwrap();
        embedding.join().await.unwrap();
        estimation.join().await.unwrap();
    }
}
