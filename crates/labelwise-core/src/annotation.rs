//! Foreground annotation use cases: what the request-serving path calls.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::model::{AnnotationTask, Sample};
use crate::repository::{SampleQuery, UnitOfWorkFactory};
use crate::service::SamplingService;
use crate::{Error, Result};

type ChangeHook = Arc<dyn Fn() + Send + Sync>;

/// Attempts per label change before a transient store error is returned.
const ANNOTATE_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Serves samples to annotate and records human labels.
#[derive(Clone)]
pub struct Annotator {
    units: Arc<dyn UnitOfWorkFactory>,
    sampling: Arc<dyn SamplingService>,
    on_change: Option<ChangeHook>,
}

impl Annotator {
    pub fn new(units: Arc<dyn UnitOfWorkFactory>, sampling: Arc<dyn SamplingService>) -> Self {
        Self {
            units,
            sampling,
            on_change: None,
        }
    }

    /// Call `hook` after every committed label change.
    pub fn with_change_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(hook));
        self
    }

    /// Pick the next unlabeled sample of `task_id`.
    ///
    /// `Ok(None)` means the task is fully labeled.
    pub fn get_next_sample(&self, task_id: &str) -> Result<Option<Sample>> {
        let mut uow = self.units.begin()?;
        uow.annotation_tasks().get_by_id(task_id)?;

        let query = SampleQuery::new().has_label(false).task_id(task_id);
        let candidates = uow.samples().find(Some(&query))?;
        debug!(task_id, candidates = candidates.len(), "sampling next sample");

        let Some(sample_id) = self.sampling.sample(&candidates) else {
            return Ok(None);
        };
        candidates
            .into_iter()
            .find(|s| s.id == sample_id)
            .map(Some)
            .ok_or_else(|| Error::not_found("sample", sample_id))
    }

    /// Set (`Some`) or clear (`None`) the label of a sample.
    ///
    /// The class must belong to the sample's own task. Transient store errors
    /// are retried with a fresh unit of work a bounded number of times.
    pub fn annotate_sample(&self, sample_id: &str, text_class_id: Option<&str>) -> Result<Sample> {
        let mut attempt = 1;
        let sample = loop {
            match self.write_label(sample_id, text_class_id) {
                Err(e) if e.is_transient() && attempt < ANNOTATE_ATTEMPTS => {
                    warn!(sample_id, attempt, error = %e, "retrying label change");
                    std::thread::sleep(RETRY_BACKOFF * attempt);
                    attempt += 1;
                }
                result => break result?,
            }
        };
        info!(sample_id, text_class = ?sample.text_class, "sample annotated");

        if let Some(hook) = &self.on_change {
            hook();
        }
        Ok(sample)
    }

    fn write_label(&self, sample_id: &str, text_class_id: Option<&str>) -> Result<Sample> {
        let mut uow = self.units.begin()?;
        let mut sample = uow.samples().get_by_id(sample_id)?;

        match text_class_id {
            None => sample.remove_label(),
            Some(class_id) => {
                let task = uow
                    .annotation_tasks()
                    .get_by_id(&sample.annotation_task_id)?;
                let text_class = task.get_text_class_by_id(class_id).ok_or_else(|| {
                    Error::Validation(format!(
                        "text class {class_id} does not belong to task {}",
                        task.id
                    ))
                })?;
                sample.annotate(Some(text_class));
            }
        }

        uow.samples().update(&sample)?;
        uow.commit()?;
        Ok(sample)
    }

    pub fn fetch_annotation_task(&self, task_id: &str) -> Result<AnnotationTask> {
        let mut uow = self.units.begin()?;
        uow.annotation_tasks().get_by_id(task_id)
    }

    pub fn list_annotation_tasks(&self) -> Result<Vec<AnnotationTask>> {
        let mut uow = self.units.begin()?;
        uow.annotation_tasks().find()
    }
}
