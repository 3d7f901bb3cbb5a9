//! Volatile store for tests and throwaway sessions.
//!
//! There are no real transactions: every write is visible immediately and
//! [`commit`](UnitOfWork::commit) is a no-op. Reads hand out clones, so a
//! caller's snapshot never aliases stored state. As on DuckDB, `update` only
//! overwrites the fields that differ from what the unit of work read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use labelwise_core::{
    AnnotationTask, AnnotationTaskRepository, Error, Id, Result, Sample, SampleQuery,
    SampleRepository, UnitOfWork, UnitOfWorkFactory,
};

use crate::StoreError;

#[derive(Default)]
struct State {
    samples: HashMap<Id, Sample>,
    tasks: HashMap<Id, AnnotationTask>,
}

/// Shared in-memory state. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UnitOfWorkFactory for MemoryStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            state: Arc::clone(&self.state),
            read: HashMap::new(),
        }))
    }
}

pub struct MemoryUnitOfWork {
    state: Arc<Mutex<State>>,
    read: HashMap<Id, Sample>,
}

impl MemoryUnitOfWork {
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned.into())
    }

    fn remember(&mut self, samples: &[Sample]) {
        for sample in samples {
            self.read.insert(sample.id.clone(), sample.clone());
        }
    }
}

/// Copy into `stored` the fields of `sample` that differ from `previous`.
fn merge_changes(stored: &mut Sample, previous: &Sample, sample: &Sample) {
    if previous.annotation_task_id != sample.annotation_task_id {
        stored.annotation_task_id = sample.annotation_task_id.clone();
    }
    if previous.text != sample.text {
        stored.text = sample.text.clone();
    }
    if previous.text_class != sample.text_class {
        stored.text_class = sample.text_class.clone();
    }
    if previous.embedding != sample.embedding {
        stored.embedding = sample.embedding.clone();
    }
    if previous.estimates != sample.estimates {
        stored.estimates = sample.estimates.clone();
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    fn samples(&mut self) -> &mut dyn SampleRepository {
        self
    }

    fn annotation_tasks(&mut self) -> &mut dyn AnnotationTaskRepository {
        self
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

impl SampleRepository for MemoryUnitOfWork {
    fn get_by_id(&mut self, id: &str) -> Result<Sample> {
        let sample = self
            .lock()?
            .samples
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("sample", id))?;
        self.remember(std::slice::from_ref(&sample));
        Ok(sample)
    }

    /// Matches in id order, like the DuckDB backend.
    fn find(&mut self, query: Option<&SampleQuery>) -> Result<Vec<Sample>> {
        let mut samples: Vec<Sample> = self
            .lock()?
            .samples
            .values()
            .filter(|s| query.is_none_or(|q| q.matches(s)))
            .cloned()
            .collect();
        samples.sort_by(|a, b| a.id.cmp(&b.id));
        self.remember(&samples);
        Ok(samples)
    }

    fn count(&mut self, query: Option<&SampleQuery>) -> Result<usize> {
        let state = self.lock()?;
        Ok(state
            .samples
            .values()
            .filter(|s| query.is_none_or(|q| q.matches(s)))
            .count())
    }

    fn create(&mut self, sample: &Sample) -> Result<()> {
        let mut state = self.lock()?;
        if state.samples.contains_key(&sample.id) {
            return Err(Error::Validation(format!(
                "sample {} already exists",
                sample.id
            )));
        }
        state.samples.insert(sample.id.clone(), sample.clone());
        drop(state);
        self.remember(std::slice::from_ref(sample));
        Ok(())
    }

    fn update(&mut self, sample: &Sample) -> Result<()> {
        {
            let mut state = self.lock()?;
            let stored = state
                .samples
                .get_mut(&sample.id)
                .ok_or_else(|| Error::not_found("sample", &sample.id))?;
            match self.read.get(&sample.id) {
                Some(previous) => merge_changes(stored, previous, sample),
                None => *stored = sample.clone(),
            }
        }
        self.remember(std::slice::from_ref(sample));
        Ok(())
    }
}

impl AnnotationTaskRepository for MemoryUnitOfWork {
    fn get_by_id(&mut self, id: &str) -> Result<AnnotationTask> {
        self.lock()?
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("annotation task", id))
    }

    fn find(&mut self) -> Result<Vec<AnnotationTask>> {
        let mut tasks: Vec<AnnotationTask> = self.lock()?.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    fn create(&mut self, task: &AnnotationTask) -> Result<()> {
        let mut state = self.lock()?;
        if state.tasks.contains_key(&task.id) {
            return Err(Error::Validation(format!(
                "annotation task {} already exists",
                task.id
            )));
        }
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn update(&mut self, task: &AnnotationTask) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| Error::not_found("annotation task", &task.id))?;
        *stored = task.clone();
        Ok(())
    }
}
