//! Repository and unit-of-work contracts shared by every pipeline stage.
//!
//! All store access happens inside a [`UnitOfWork`]: open one with
//! [`UnitOfWorkFactory::begin`], read and write through its repositories,
//! then [`commit`](UnitOfWork::commit). Dropping a unit of work discards
//! anything written since the last commit.

use crate::model::{AnnotationTask, Id, Sample};
use crate::Result;

/// Filter for [`SampleRepository::find`]. `None` fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleQuery {
    pub has_label: Option<bool>,
    pub has_embedding: Option<bool>,
    pub task_id: Option<Id>,
}

impl SampleQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_label(mut self, has_label: bool) -> Self {
        self.has_label = Some(has_label);
        self
    }

    pub fn has_embedding(mut self, has_embedding: bool) -> Self {
        self.has_embedding = Some(has_embedding);
        self
    }

    pub fn task_id(mut self, task_id: impl Into<Id>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Whether `sample` satisfies every set filter.
    pub fn matches(&self, sample: &Sample) -> bool {
        self.has_label.is_none_or(|want| sample.is_labeled() == want)
            && self
                .has_embedding
                .is_none_or(|want| sample.is_embedded() == want)
            && self
                .task_id
                .as_ref()
                .is_none_or(|id| &sample.annotation_task_id == id)
    }
}

pub trait SampleRepository {
    /// Fails with `NotFound` if no sample has this id.
    fn get_by_id(&mut self, id: &str) -> Result<Sample>;

    /// Samples matching `query`, in no particular order. `None` returns all.
    fn find(&mut self, query: Option<&SampleQuery>) -> Result<Vec<Sample>>;

    fn count(&mut self, query: Option<&SampleQuery>) -> Result<usize> {
        Ok(self.find(query)?.len())
    }

    fn create(&mut self, sample: &Sample) -> Result<()>;

    /// Replace the stored sample. Fails with `NotFound` for an unknown id.
    fn update(&mut self, sample: &Sample) -> Result<()>;
}

pub trait AnnotationTaskRepository {
    fn get_by_id(&mut self, id: &str) -> Result<AnnotationTask>;

    fn find(&mut self) -> Result<Vec<AnnotationTask>>;

    fn create(&mut self, task: &AnnotationTask) -> Result<()>;

    /// Persist renamed or appended text classes.
    fn update(&mut self, task: &AnnotationTask) -> Result<()>;
}

/// A transaction boundary over the repositories.
pub trait UnitOfWork: Send {
    fn samples(&mut self) -> &mut dyn SampleRepository;

    fn annotation_tasks(&mut self) -> &mut dyn AnnotationTaskRepository;

    /// Persist everything written since the previous commit.
    fn commit(&mut self) -> Result<()>;
}

pub trait UnitOfWorkFactory: Send + Sync {
    fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(task: &str, labeled: bool, embedded: bool) -> Sample {
        let mut s = Sample::new(task, "text");
        if labeled {
            s.text_class = Some("class".into());
        }
        if embedded {
            s.embedding = Some(vec![0.0; 3]);
        }
        s
    }

    #[test]
    fn empty_query_matches_everything() {
        let q = SampleQuery::new();
        assert!(q.matches(&sample("t", false, false)));
        assert!(q.matches(&sample("t", true, true)));
    }

    #[test]
    fn filters_combine() {
        let q = SampleQuery::new().has_label(true).has_embedding(false);
        assert!(q.matches(&sample("t", true, false)));
        assert!(!q.matches(&sample("t", true, true)));
        assert!(!q.matches(&sample("t", false, false)));
    }

    #[test]
    fn task_filter() {
        let q = SampleQuery::new().task_id("t1");
        assert!(q.matches(&sample("t1", false, false)));
        assert!(!q.matches(&sample("t2", false, false)));
    }
}
