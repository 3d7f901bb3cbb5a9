//! Annotation domain entities.
//!
//! Values handed out by a repository are snapshots. Mutating a [`Sample`] or
//! [`AnnotationTask`] has no effect on stored state until it is passed back
//! through the repository's `update`.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub type Id = String;

/// Fixed-dimension sentence embedding produced by an external model.
pub type Embedding = Vec<f32>;

/// Create a new random identifier.
pub fn create_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// A label option within an annotation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextClass {
    pub id: Id,
    pub name: String,
    pub annotation_task_id: Id,
}

impl TextClass {
    pub fn new(name: impl Into<String>, annotation_task_id: impl Into<Id>) -> Self {
        Self {
            id: create_id(),
            name: name.into(),
            annotation_task_id: annotation_task_id.into(),
        }
    }
}

/// Similarity-based confidence that a sample belongs to one text class.
///
/// Cosine similarity ranges over [-1, 1], so `confidence` is not a probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEstimate {
    pub id: Id,
    pub text_class_id: Id,
    pub confidence: f32,
}

impl ClassEstimate {
    pub fn new(text_class_id: impl Into<Id>, confidence: f32) -> Self {
        Self {
            id: create_id(),
            text_class_id: text_class_id.into(),
            confidence,
        }
    }

    pub fn update(&mut self, confidence: f32) {
        self.confidence = confidence;
    }
}

/// A named labeling scheme: the ordered set of classes samples are sorted into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationTask {
    pub id: Id,
    pub name: String,
    pub text_classes: Vec<TextClass>,
}

impl AnnotationTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: create_id(),
            name: name.into(),
            text_classes: Vec::new(),
        }
    }

    pub fn get_text_class_by_id(&self, id: &str) -> Option<&TextClass> {
        self.text_classes.iter().find(|c| c.id == id)
    }

    pub fn get_text_class_by_name(&self, name: &str) -> Option<&TextClass> {
        self.text_classes.iter().find(|c| c.name == name)
    }

    /// Append a new class. Class names are unique within a task.
    pub fn create_text_class(&mut self, name: impl Into<String>) -> Result<TextClass> {
        let name = name.into();
        if self.get_text_class_by_name(&name).is_some() {
            return Err(Error::Validation(format!(
                "text class '{name}' already exists in task {}",
                self.id
            )));
        }
        let text_class = TextClass::new(name, self.id.clone());
        self.text_classes.push(text_class.clone());
        Ok(text_class)
    }

    pub fn rename_text_class(&mut self, id: &str, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self
            .text_classes
            .iter()
            .any(|c| c.name == name && c.id != id)
        {
            return Err(Error::Validation(format!(
                "text class '{name}' already exists in task {}",
                self.id
            )));
        }
        let text_class = self
            .text_classes
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::not_found("text class", id))?;
        text_class.name = name;
        Ok(())
    }
}

/// One unit of text to be classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: Id,
    pub annotation_task_id: Id,
    pub text: String,
    /// Id of the assigned [`TextClass`]; `None` means unlabeled.
    pub text_class: Option<Id>,
    pub embedding: Option<Embedding>,
    /// At most one estimate per text class.
    pub estimates: Vec<ClassEstimate>,
}

impl Sample {
    /// A fresh sample: unlabeled, unembedded, no estimates.
    pub fn new(annotation_task_id: impl Into<Id>, text: impl Into<String>) -> Self {
        Self {
            id: create_id(),
            annotation_task_id: annotation_task_id.into(),
            text: text.into(),
            text_class: None,
            embedding: None,
            estimates: Vec::new(),
        }
    }

    pub fn is_labeled(&self) -> bool {
        self.text_class.is_some()
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }

    /// Set or clear the label. `None` is a valid "clear".
    pub fn annotate(&mut self, text_class: Option<&TextClass>) {
        self.text_class = text_class.map(|c| c.id.clone());
    }

    pub fn remove_label(&mut self) {
        self.text_class = None;
    }

    pub fn embed(&mut self, embedding: Embedding) {
        self.embedding = Some(embedding);
    }

    /// Upsert by `text_class_id`: an existing estimate for the same class is
    /// overwritten in place and keeps its id.
    pub fn add_class_estimate(&mut self, class_estimate: ClassEstimate) {
        match self
            .estimates
            .iter_mut()
            .find(|e| e.text_class_id == class_estimate.text_class_id)
        {
            Some(existing) => existing.update(class_estimate.confidence),
            None => self.estimates.push(class_estimate),
        }
    }

    pub fn add_class_estimates(&mut self, class_estimates: impl IntoIterator<Item = ClassEstimate>) {
        for class_estimate in class_estimates {
            self.add_class_estimate(class_estimate);
        }
    }

    pub fn estimate_for(&self, text_class_id: &str) -> Option<&ClassEstimate> {
        self.estimates
            .iter()
            .find(|e| e.text_class_id == text_class_id)
    }

    /// Confidence per class of `task`, in the task's class order.
    ///
    /// Classes without an estimate (no centroid yet) map to `0.0`.
    pub fn class_confidences<'a>(&self, task: &'a AnnotationTask) -> Vec<(&'a TextClass, f32)> {
        task.text_classes
            .iter()
            .map(|c| {
                let confidence = self.estimate_for(&c.id).map_or(0.0, |e| e.confidence);
                (c, confidence)
            })
            .collect()
    }

    /// The estimate with the highest confidence, if any.
    pub fn suggested_class(&self) -> Option<&ClassEstimate> {
        self.estimates.iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_classes(names: &[&str]) -> AnnotationTask {
        let mut task = AnnotationTask::new("intents");
        for name in names {
            task.create_text_class(*name).unwrap();
        }
        task
    }

    #[test]
    fn new_sample_is_blank() {
        let sample = Sample::new("task", "hello");
        assert!(!sample.is_labeled());
        assert!(!sample.is_embedded());
        assert!(sample.estimates.is_empty());
    }

    #[test]
    fn annotate_sets_and_clears() {
        let task = task_with_classes(&["weather"]);
        let class = &task.text_classes[0];
        let mut sample = Sample::new(&task.id, "will it rain");

        sample.annotate(Some(class));
        assert_eq!(sample.text_class.as_deref(), Some(class.id.as_str()));

        sample.annotate(None);
        assert!(sample.text_class.is_none());
    }

    #[test]
    fn add_class_estimate_upserts() {
        let mut sample = Sample::new("task", "text");
        sample.add_class_estimate(ClassEstimate::new("a", 0.2));
        let first_id = sample.estimates[0].id.clone();

        sample.add_class_estimate(ClassEstimate::new("a", 0.9));

        assert_eq!(sample.estimates.len(), 1);
        assert_eq!(sample.estimates[0].confidence, 0.9);
        assert_eq!(sample.estimates[0].id, first_id);
    }

    #[test]
    fn add_class_estimates_appends_new_classes() {
        let mut sample = Sample::new("task", "text");
        sample.add_class_estimates([
            ClassEstimate::new("a", 0.1),
            ClassEstimate::new("b", 0.5),
            ClassEstimate::new("a", 0.3),
        ]);
        assert_eq!(sample.estimates.len(), 2);
        assert_eq!(sample.estimate_for("a").unwrap().confidence, 0.3);
        assert_eq!(sample.estimate_for("b").unwrap().confidence, 0.5);
    }

    #[test]
    fn class_confidences_default_to_zero() {
        let task = task_with_classes(&["alarm", "music", "weather"]);
        let mut sample = Sample::new(&task.id, "play a song");
        sample.add_class_estimate(ClassEstimate::new(task.text_classes[1].id.clone(), 0.8));

        let confidences: Vec<f32> = sample
            .class_confidences(&task)
            .into_iter()
            .map(|(_, c)| c)
            .collect();
        assert_eq!(confidences, vec![0.0, 0.8, 0.0]);
    }

    #[test]
    fn suggested_class_is_highest_confidence() {
        let mut sample = Sample::new("task", "text");
        assert!(sample.suggested_class().is_none());
        sample.add_class_estimates([
            ClassEstimate::new("a", -0.2),
            ClassEstimate::new("b", 0.7),
            ClassEstimate::new("c", 0.1),
        ]);
        assert_eq!(sample.suggested_class().unwrap().text_class_id, "b");
    }

    #[test]
    fn duplicate_class_name_rejected() {
        let mut task = task_with_classes(&["alarm"]);
        let err = task.create_text_class("alarm").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(task.text_classes.len(), 1);
    }

    #[test]
    fn rename_text_class() {
        let mut task = task_with_classes(&["alarm", "music"]);
        let id = task.text_classes[0].id.clone();

        task.rename_text_class(&id, "alarms").unwrap();
        assert_eq!(task.get_text_class_by_id(&id).unwrap().name, "alarms");

        assert!(task.rename_text_class(&id, "music").is_err());
        assert!(task.rename_text_class("missing", "x").unwrap_err().is_not_found());
    }

    #[test]
    fn text_classes_belong_to_task() {
        let task = task_with_classes(&["a", "b"]);
        assert!(
            task.text_classes
                .iter()
                .all(|c| c.annotation_task_id == task.id)
        );
    }
}
