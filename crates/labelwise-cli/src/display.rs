//! Read models and terminal rendering for tasks and samples.
//!
//! Each entity has one explicit mapping function into a serializable view;
//! the same views back both the vertical cards and `--json` output.

use labelwise_core::{AnnotationTask, Sample, TextClass};
use serde::Serialize;

const MAX_LIST_ITEMS: usize = 10;
const BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassView {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: String,
    pub name: String,
    pub text_classes: Vec<ClassView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class_id: String,
    pub class_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleView {
    pub id: String,
    pub task_id: String,
    pub text: String,
    pub text_class: Option<ClassView>,
    pub embedded: bool,
    /// One entry per task class, in task order; unestimated classes are 0.0.
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub name: String,
    pub samples: usize,
    pub labeled: usize,
    pub embedded: usize,
}

// ── Mapping ──

fn class_view(class: &TextClass) -> ClassView {
    ClassView {
        id: class.id.clone(),
        name: class.name.clone(),
    }
}

pub fn task_view(task: &AnnotationTask) -> TaskView {
    TaskView {
        id: task.id.clone(),
        name: task.name.clone(),
        text_classes: task.text_classes.iter().map(class_view).collect(),
    }
}

pub fn sample_view(sample: &Sample, task: &AnnotationTask) -> SampleView {
    let text_class = sample.text_class.as_deref().map(|id| {
        task.get_text_class_by_id(id)
            .map(class_view)
            .unwrap_or_else(|| ClassView {
                id: id.to_string(),
                name: "?".into(),
            })
    });
    let predictions = sample
        .class_confidences(task)
        .into_iter()
        .map(|(class, confidence)| Prediction {
            class_id: class.id.clone(),
            class_name: class.name.clone(),
            confidence,
        })
        .collect();

    SampleView {
        id: sample.id.clone(),
        task_id: sample.annotation_task_id.clone(),
        text: sample.text.clone(),
        text_class,
        embedded: sample.is_embedded(),
        predictions,
    }
}

// ── Rendering ──

pub fn print_task_list(tasks: &[TaskView]) {
    if tasks.is_empty() {
        println!("No annotation tasks. Load one with `labelwise load <dir>`.");
        return;
    }
    for task in tasks {
        println!("{}  {} ({} classes)", task.id, task.name, task.text_classes.len());
    }
}

pub fn print_task_card(task: &TaskView) {
    println!("=== {} ===", task.name);
    println!("  {:<26} {}", "id", task.id);
    println!();
    println!("Classes");
    for (i, class) in task.text_classes.iter().enumerate() {
        println!("  {:>3}. {:<26} {}", i + 1, class.name, class.id);
    }
}

/// Print a sample as a vertical card with its class predictions.
pub fn print_sample_card(sample: &SampleView) {
    println!("=== {} ===", sample.id);
    println!("{}", sample.text);
    println!();
    let label = sample
        .text_class
        .as_ref()
        .map(|c| c.name.as_str())
        .unwrap_or("(unlabeled)");
    println!("  {:<26} {}", "label", label);
    println!(
        "  {:<26} {}",
        "embedded",
        if sample.embedded { "yes" } else { "no" }
    );
    println!();

    let mut ranked: Vec<&Prediction> = sample.predictions.iter().collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    println!("Predictions");
    for (i, prediction) in ranked.iter().take(MAX_LIST_ITEMS).enumerate() {
        println!(
            "  {:>3}. {:<26} {:>6.3} {}",
            i + 1,
            prediction.class_name,
            prediction.confidence,
            confidence_bar(prediction.confidence)
        );
    }
    if ranked.len() > MAX_LIST_ITEMS {
        println!("    ... and {} more", ranked.len() - MAX_LIST_ITEMS);
    }
}

pub fn print_status(statuses: &[TaskStatus]) {
    println!(
        "{:<24} {:>8} {:>8} {:>8}",
        "task", "samples", "labeled", "embedded"
    );
    for s in statuses {
        println!(
            "{:<24} {:>8} {:>8} {:>8}",
            s.name, s.samples, s.labeled, s.embedded
        );
    }
}

/// Horizontal bar for a cosine confidence in [-1, 1].
fn confidence_bar(confidence: f32) -> String {
    let filled = (((confidence.clamp(-1.0, 1.0) + 1.0) / 2.0) * BAR_WIDTH as f32).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelwise_core::ClassEstimate;

    fn task() -> AnnotationTask {
        let mut task = AnnotationTask::new("intents");
        task.create_text_class("set alarm").unwrap();
        task.create_text_class("get weather").unwrap();
        task.create_text_class("play music").unwrap();
        task
    }

    #[test]
    fn predictions_follow_task_order_with_zero_default() {
        let task = task();
        let mut sample = Sample::new(task.id.clone(), "wake me at six");
        sample.add_class_estimate(ClassEstimate::new(task.text_classes[2].id.clone(), 0.4));
        sample.add_class_estimate(ClassEstimate::new(task.text_classes[0].id.clone(), 0.9));

        let view = sample_view(&sample, &task);
        let got: Vec<(&str, f32)> = view
            .predictions
            .iter()
            .map(|p| (p.class_name.as_str(), p.confidence))
            .collect();
        assert_eq!(
            got,
            vec![("set alarm", 0.9), ("get weather", 0.0), ("play music", 0.4)]
        );
    }

    #[test]
    fn label_maps_to_class_name() {
        let task = task();
        let mut sample = Sample::new(task.id.clone(), "rain tomorrow?");
        assert!(sample_view(&sample, &task).text_class.is_none());

        sample.annotate(Some(&task.text_classes[1]));
        let view = sample_view(&sample, &task);
        assert_eq!(view.text_class.unwrap().name, "get weather");
        assert!(!view.embedded);
    }

    #[test]
    fn task_view_keeps_class_order() {
        let view = task_view(&task());
        let names: Vec<&str> = view.text_classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["set alarm", "get weather", "play music"]);
    }

    #[test]
    fn sample_view_serializes() {
        let task = task();
        let sample = Sample::new(task.id.clone(), "hello");
        let json = serde_json::to_value(sample_view(&sample, &task)).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["predictions"].as_array().unwrap().len(), 3);
        assert!(json["text_class"].is_null());
    }

    #[test]
    fn bar_spans_cosine_range() {
        assert_eq!(confidence_bar(-1.0), ".".repeat(BAR_WIDTH));
        assert_eq!(confidence_bar(1.0), "#".repeat(BAR_WIDTH));
        assert_eq!(confidence_bar(0.0).matches('#').count(), BAR_WIDTH / 2);
        assert_eq!(confidence_bar(3.0), "#".repeat(BAR_WIDTH));
    }
}
