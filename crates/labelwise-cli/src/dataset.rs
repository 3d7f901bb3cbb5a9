//! MTOP dataset loader.
//!
//! Reads every `*.txt` file in a directory. Each line is tab-separated:
//! `id \t IN:CLASS_NAME \t slots \t text \t ...`. Intent labels become the
//! task's text classes; all samples are imported unlabeled.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use labelwise_core::{AnnotationTask, Sample, UnitOfWorkFactory};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Stop after this many samples.
    pub limit: Option<usize>,
    /// Append ` (class name)` to each text. Useful for demos.
    pub add_class_to_text: bool,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub task: AnnotationTask,
    pub samples: Vec<Sample>,
}

/// Parse an MTOP directory into a task named `name` plus unlabeled samples.
pub fn read_mtop(dir: &Path, name: &str, options: &LoadOptions) -> anyhow::Result<Dataset> {
    anyhow::ensure!(dir.is_dir(), "dataset directory not found: {}", dir.display());

    let mut classes = BTreeSet::new();
    let mut texts = Vec::new();
    'files: for path in data_files(dir)? {
        let content =
            std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        for (lineno, line) in content.lines().enumerate() {
            if options.limit.is_some_and(|limit| texts.len() >= limit) {
                break 'files;
            }
            if line.trim().is_empty() {
                continue;
            }
            let Some((class, mut text)) = parse_line(line) else {
                warn!(file = %path.display(), line = lineno + 1, "skipping malformed line");
                continue;
            };
            if options.add_class_to_text {
                text = format!("{text} ({class})");
            }
            classes.insert(class);
            texts.push(text);
        }
    }

    let mut task = AnnotationTask::new(name);
    for class in classes {
        task.create_text_class(class)?;
    }
    let samples = texts
        .into_iter()
        .map(|text| Sample::new(task.id.clone(), text))
        .collect::<Vec<_>>();

    info!(
        task = %task.name,
        classes = task.text_classes.len(),
        samples = samples.len(),
        "read MTOP dataset"
    );
    Ok(Dataset { task, samples })
}

/// Persist a dataset in one unit of work.
pub fn store(units: &dyn UnitOfWorkFactory, dataset: &Dataset) -> labelwise_core::Result<()> {
    let mut uow = units.begin()?;
    uow.annotation_tasks().create(&dataset.task)?;
    for sample in &dataset.samples {
        uow.samples().create(sample)?;
    }
    uow.commit()
}

/// `*.txt` files in `dir`, sorted by name.
fn data_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `(class name, text)` from one MTOP line.
fn parse_line(line: &str) -> Option<(String, String)> {
    let mut columns = line.split('\t');
    let _id = columns.next()?;
    let intent = columns.next()?;
    let _slots = columns.next()?;
    let text = columns.next()?;

    let class = intent.get(3..)?.replace('_', " ").to_lowercase();
    if class.is_empty() || text.is_empty() {
        return None;
    }
    Some((class, text.to_string()))
}
