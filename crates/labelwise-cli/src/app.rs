//! Composition root: wires the store, annotator, stages and workers.

use std::sync::Arc;

use anyhow::Context;
use labelwise_ai::{
    CosineSimilarity, EmbeddingStage, EstimationStage, MeanAggregation, OnnxEmbeddingService,
    sampling_service,
};
use labelwise_core::{
    AnnotationTask, Annotator, EmbeddingService, Sample, SampleQuery, Settings, UnitOfWorkFactory,
};
use labelwise_store::{DuckStore, MemoryStore};
use labelwise_worker::{ChangeSignal, Worker, WorkerConfig};
use tracing::info;

use crate::display::TaskStatus;

pub struct App {
    settings: Settings,
    units: Arc<dyn UnitOfWorkFactory>,
    annotator: Annotator,
    estimation_signal: ChangeSignal,
}

impl App {
    pub fn build(settings: Settings) -> anyhow::Result<Self> {
        let units: Arc<dyn UnitOfWorkFactory> = match &settings.database {
            Some(path) => Arc::new(
                DuckStore::open_persistent(path)
                    .with_context(|| format!("open database {}", path.display()))?,
            ),
            None => {
                info!("using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let estimation_signal = ChangeSignal::new();
        let on_label = estimation_signal.clone();
        let annotator = Annotator::new(Arc::clone(&units), sampling_service(settings.sampling))
            .with_change_hook(move || on_label.notify());

        Ok(Self {
            settings,
            units,
            annotator,
            estimation_signal,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn units(&self) -> &dyn UnitOfWorkFactory {
        self.units.as_ref()
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    pub fn load_embedder(&self) -> anyhow::Result<Arc<dyn EmbeddingService>> {
        let dir = &self.settings.embedding_model_dir;
        let service = OnnxEmbeddingService::load(dir)
            .with_context(|| format!("load embedding model from {}", dir.display()))?;
        Ok(Arc::new(service))
    }

    pub fn embedding_stage(&self, embedder: Arc<dyn EmbeddingService>) -> EmbeddingStage {
        EmbeddingStage::new(Arc::clone(&self.units), embedder)
    }

    pub fn estimation_stage(&self) -> EstimationStage {
        EstimationStage::new(
            Arc::clone(&self.units),
            Arc::new(MeanAggregation),
            Arc::new(CosineSimilarity),
        )
        .with_scored_samples(self.settings.scored_samples)
    }

    /// One worker per requested stage. The embedding worker and new labels
    /// both wake the estimation worker.
    pub fn workers(
        &self,
        embedder: Option<Arc<dyn EmbeddingService>>,
        estimation: bool,
    ) -> Vec<Worker> {
        let config = WorkerConfig::from(&self.settings);
        let mut workers = Vec::new();
        if let Some(embedder) = embedder {
            let stage = self.embedding_stage(embedder);
            workers.push(
                Worker::new(Arc::new(stage), config.clone())
                    .notify_on_work(self.estimation_signal.clone()),
            );
        }
        if estimation {
            workers.push(
                Worker::new(Arc::new(self.estimation_stage()), config)
                    .with_signal(self.estimation_signal.clone()),
            );
        }
        workers
    }

    /// A sample together with the task it belongs to.
    pub fn sample_with_task(
        &self,
        sample_id: &str,
    ) -> labelwise_core::Result<(Sample, AnnotationTask)> {
        let mut uow = self.units.begin()?;
        let sample = uow.samples().get_by_id(sample_id)?;
        let task = uow.annotation_tasks().get_by_id(&sample.annotation_task_id)?;
        Ok((sample, task))
    }

    pub fn status(&self) -> labelwise_core::Result<Vec<TaskStatus>> {
        let mut uow = self.units.begin()?;
        let tasks = uow.annotation_tasks().find()?;
        let mut statuses = Vec::with_capacity(tasks.len());
        for task in tasks {
            let all = SampleQuery::new().task_id(task.id.clone());
            let samples = uow.samples();
            statuses.push(TaskStatus {
                samples: samples.count(Some(&all))?,
                labeled: samples.count(Some(&all.clone().has_label(true)))?,
                embedded: samples.count(Some(&all.clone().has_embedding(true)))?,
                task_id: task.id,
                name: task.name,
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dataset::{self, LoadOptions};
    use labelwise_core::{Embedding, Result};
    use tokio::sync::watch;

    /// Two-dimensional embedding keyed on "alarm" versus anything else.
    struct KeywordEmbedder;

    impl EmbeddingService for KeywordEmbedder {
        fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("alarm") {
                        vec![1.0, 0.1]
                    } else {
                        vec![0.1, 1.0]
                    }
                })
                .collect())
        }
    }

    fn in_memory() -> App {
        App::build(Settings {
            database: None,
            ..Settings::default()
        })
        .unwrap()
    }

    fn load(app: &App, dir: &std::path::Path) -> AnnotationTask {
        std::fs::write(
            dir.join("train.txt"),
            "1\tIN:SET_ALARM\t\tset an alarm for six\tx\n\
             2\tIN:GET_WEATHER\t\tis it raining\tx\n\
             3\tIN:SET_ALARM\t\tcancel my alarm\tx\n",
        )
        .unwrap();
        let data = dataset::read_mtop(dir, "demo", &LoadOptions::default()).unwrap();
        dataset::store(app.units(), &data).unwrap();
        data.task
    }

    #[test]
    fn status_counts_per_task() {
        let app = in_memory();
        let dir = tempfile::tempdir().unwrap();
        let task = load(&app, dir.path());

        let next = app.annotator().get_next_sample(&task.id).unwrap().unwrap();
        app.annotator()
            .annotate_sample(&next.id, Some(&task.text_classes[0].id))
            .unwrap();

        let statuses = app.status().unwrap();
        assert_eq!(
            statuses,
            vec![TaskStatus {
                task_id: task.id.clone(),
                name: "demo".into(),
                samples: 3,
                labeled: 1,
                embedded: 0,
            }]
        );
    }

    #[test]
    fn persistent_database_survives_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            database: Some(dir.path().join("labels.duckdb")),
            ..Settings::default()
        };
        let task = {
            let app = App::build(settings.clone()).unwrap();
            load(&app, dir.path())
        };

        let app = App::build(settings).unwrap();
        let tasks = app.annotator().list_annotation_tasks().unwrap();
        assert_eq!(tasks, vec![task]);
        assert_eq!(app.status().unwrap()[0].samples, 3);
    }

    #[tokio::test]
    async fn labels_drive_background_estimation() {
        let app = in_memory();
        let dir = tempfile::tempdir().unwrap();
        let task = load(&app, dir.path());
        let alarm = task.get_text_class_by_name("set alarm").unwrap().clone();

        let (stop, shutdown) = watch::channel(false);
        let handles: Vec<_> = app
            .workers(Some(Arc::new(KeywordEmbedder)), true)
            .into_iter()
            .map(|w| w.spawn(shutdown.clone()))
            .collect();
        assert_eq!(handles.len(), 2);

        // Label only after embedding so the two writers never race on one sample.
        let embedded = SampleQuery::new().has_embedding(true);
        let target = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let mut uow = app.units().begin().unwrap();
                let samples = uow.samples().find(Some(&embedded)).unwrap();
                if samples.len() == 3 {
                    break samples
                        .into_iter()
                        .find(|s| s.text == "set an alarm for six")
                        .unwrap();
                }
                drop(uow);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("samples were never embedded");
        app.annotator()
            .annotate_sample(&target.id, Some(&alarm.id))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (sample, _) = app.sample_with_task(&target.id).unwrap();
                if sample.estimate_for(&alarm.id).is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("labeled sample was never estimated");

        stop.send(true).unwrap();
        for handle in handles {
            handle.join().await.unwrap();
        }
    }
}
