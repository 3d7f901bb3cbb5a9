use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use labelwise_core::{AnnotationTask, SamplingStrategy, ScoredSamples, Settings};
use labelwise_worker::{WorkerHandle, WorkerState};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod dataset;
mod display;

use app::App;

#[derive(Parser)]
#[command(author, version, about = "Active-learning text annotation", long_about = None)]
struct Cli {
    /// DuckDB database file
    #[arg(
        long,
        global = true,
        env = "LABELWISE_DATABASE",
        default_value = "labelwise.duckdb"
    )]
    database: PathBuf,

    /// Keep everything in memory; nothing is persisted
    #[arg(long, global = true)]
    in_memory: bool,

    /// How the next sample to annotate is chosen
    #[arg(
        long,
        global = true,
        env = "LABELWISE_SAMPLING",
        value_enum,
        default_value_t = Sampling::Random
    )]
    sampling: Sampling,

    /// Print machine-readable JSON instead of cards
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import an MTOP dataset directory as a new annotation task
    Load {
        /// Directory containing MTOP `*.txt` files
        dir: PathBuf,

        /// Task name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        /// Maximum number of samples to import
        #[arg(long)]
        limit: Option<usize>,

        /// Append the gold class to each text (demo mode)
        #[arg(long)]
        add_class_to_text: bool,
    },

    /// List annotation tasks
    Tasks,

    /// Show one annotation task and its classes
    Task { task_id: String },

    /// Show the next sample to annotate
    Next { task_id: String },

    /// Label a sample; omit the class to clear its label
    Annotate {
        sample_id: String,
        /// Class id or class name
        class: Option<String>,
    },

    /// Show a sample with its class predictions
    Show { sample_id: String },

    /// Per-task sample, label and embedding counts
    Status,

    /// Run one estimation cycle and exit
    Estimate {
        #[arg(long, env = "LABELWISE_SCORED", value_enum, default_value_t = Scored::Labeled)]
        scored: Scored,
    },

    /// Run background workers until interrupted
    Work(WorkArgs),

    /// Annotate interactively, with optional background workers
    Label {
        task_id: String,

        #[command(flatten)]
        work: WorkArgs,
    },
}

#[derive(Args, Clone)]
struct WorkArgs {
    /// Run the embedding worker
    #[arg(long)]
    embedding: bool,

    /// Run the estimation worker
    #[arg(long)]
    estimation: bool,

    /// Directory holding `model.onnx` and `tokenizer.json`
    #[arg(
        long,
        env = "LABELWISE_MODEL_DIR",
        default_value = "models/all-MiniLM-L6-v2"
    )]
    model_dir: PathBuf,

    /// Seconds an idle worker sleeps before polling again
    #[arg(long, env = "LABELWISE_IDLE_SECS", default_value_t = 10)]
    idle_secs: u64,

    /// Retry failed cycles instead of exiting
    #[arg(long)]
    keep_going: bool,

    /// Samples the estimation worker scores
    #[arg(long, env = "LABELWISE_SCORED", value_enum, default_value_t = Scored::Labeled)]
    scored: Scored,
}

#[derive(Clone, Copy, ValueEnum)]
enum Sampling {
    Random,
    LeastConfident,
}

impl From<Sampling> for SamplingStrategy {
    fn from(s: Sampling) -> Self {
        match s {
            Sampling::Random => Self::Random,
            Sampling::LeastConfident => Self::LeastConfident,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Scored {
    Labeled,
    Unlabeled,
    All,
}

impl From<Scored> for ScoredSamples {
    fn from(s: Scored) -> Self {
        match s {
            Scored::Labeled => Self::Labeled,
            Scored::Unlabeled => Self::Unlabeled,
            Scored::All => Self::All,
        }
    }
}

impl Cli {
    fn settings(&self) -> Settings {
        let mut settings = Settings {
            database: (!self.in_memory).then(|| self.database.clone()),
            sampling: self.sampling.into(),
            ..Settings::default()
        };
        match &self.command {
            Command::Work(work) | Command::Label { work, .. } => {
                settings.embedding_model_dir = work.model_dir.clone();
                settings.idle_interval_secs = work.idle_secs;
                settings.stop_on_error = !work.keep_going;
                settings.scored_samples = work.scored.into();
            }
            Command::Estimate { scored } => settings.scored_samples = (*scored).into(),
            _ => {}
        }
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::build(cli.settings())?;
    let json = cli.json;

    match cli.command {
        Command::Load {
            dir,
            name,
            limit,
            add_class_to_text,
        } => {
            let name = name.unwrap_or_else(|| {
                dir.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "dataset".into())
            });
            let options = dataset::LoadOptions {
                limit,
                add_class_to_text,
            };
            let data = dataset::read_mtop(&dir, &name, &options)?;
            dataset::store(app.units(), &data)?;
            println!(
                "Loaded {} samples into task {} ({})",
                data.samples.len(),
                data.task.name,
                data.task.id
            );
        }

        Command::Tasks => {
            let tasks: Vec<_> = app
                .annotator()
                .list_annotation_tasks()?
                .iter()
                .map(display::task_view)
                .collect();
            if json {
                print_json(&tasks)?;
            } else {
                display::print_task_list(&tasks);
            }
        }

        Command::Task { task_id } => {
            let task = display::task_view(&app.annotator().fetch_annotation_task(&task_id)?);
            if json {
                print_json(&task)?;
            } else {
                display::print_task_card(&task);
            }
        }

        Command::Next { task_id } => {
            let task = app.annotator().fetch_annotation_task(&task_id)?;
            match app.annotator().get_next_sample(&task_id)? {
                Some(sample) => show_sample(&display::sample_view(&sample, &task), json)?,
                None if json => println!("null"),
                None => println!("No unlabeled samples left in {}.", task.name),
            }
        }

        Command::Annotate { sample_id, class } => {
            let (_, task) = app.sample_with_task(&sample_id)?;
            let class_id = class.map(|c| resolve_class(&task, &c)).transpose()?;
            let sample = app
                .annotator()
                .annotate_sample(&sample_id, class_id.as_deref())?;
            show_sample(&display::sample_view(&sample, &task), json)?;
        }

        Command::Show { sample_id } => {
            let (sample, task) = app.sample_with_task(&sample_id)?;
            show_sample(&display::sample_view(&sample, &task), json)?;
        }

        Command::Status => {
            let statuses = app.status()?;
            if json {
                print_json(&statuses)?;
            } else {
                display::print_status(&statuses);
            }
        }

        Command::Estimate { .. } => {
            let stage = app.estimation_stage();
            let report = tokio::task::spawn_blocking(move || stage.estimate_samples()).await??;
            println!(
                "{} centroids, {} samples scored, {} updated",
                report.centroids, report.scored, report.changed
            );
        }

        Command::Work(work) => {
            let shutdown = watch_shutdown();
            let handles = spawn_workers(&app, &work, &shutdown)?;
            join_workers(handles, &shutdown).await?;
        }

        Command::Label { task_id, work } => {
            let shutdown = watch_shutdown();
            let handles = if work.embedding || work.estimation {
                spawn_workers(&app, &work, &shutdown)?
            } else {
                Vec::new()
            };
            let input = BufReader::new(tokio::io::stdin()).lines();
            label_loop(&app, &task_id, &handles, input, shutdown.subscribe()).await?;
            shutdown.send_replace(true);
            join_workers(handles, &shutdown).await?;
        }
    }

    Ok(())
}

/// Shutdown channel flipped by Ctrl+C.
fn watch_shutdown() -> Arc<watch::Sender<bool>> {
    let (stop, _) = watch::channel(false);
    let stop = Arc::new(stop);
    let on_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down");
            on_signal.send_replace(true);
        }
    });
    stop
}

fn spawn_workers(
    app: &App,
    work: &WorkArgs,
    shutdown: &watch::Sender<bool>,
) -> anyhow::Result<Vec<WorkerHandle>> {
    // No stage flag means both stages.
    let both = !work.embedding && !work.estimation;
    let embedder = if work.embedding || both {
        Some(app.load_embedder()?)
    } else {
        None
    };
    info!(
        idle_secs = app.settings().idle_interval_secs,
        stop_on_error = app.settings().stop_on_error,
        "starting workers"
    );
    Ok(app
        .workers(embedder, work.estimation || both)
        .into_iter()
        .map(|w| w.spawn(shutdown.subscribe()))
        .collect())
}

/// Wait for every worker. The first failure stops the others.
async fn join_workers(
    handles: Vec<WorkerHandle>,
    shutdown: &watch::Sender<bool>,
) -> anyhow::Result<()> {
    let mut joins = JoinSet::new();
    for handle in handles {
        let stage = handle.stage();
        joins.spawn(async move { (stage, handle.join().await) });
    }

    let mut failure = None;
    while let Some(joined) = joins.join_next().await {
        let (stage, result) = joined.context("worker task aborted")?;
        match result {
            Ok(stats) => info!(stage, cycles = stats.cycles, "worker finished"),
            Err(err) => {
                shutdown.send_replace(true);
                failure.get_or_insert(err);
            }
        }
    }
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Interactive labeling until the task is done, the user quits, input ends
/// or shutdown is requested.
async fn label_loop<R: AsyncBufRead + Unpin>(
    app: &App,
    task_id: &str,
    workers: &[WorkerHandle],
    mut lines: Lines<R>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let task = app.annotator().fetch_annotation_task(task_id)?;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        if let Some(failed) = workers.iter().find(|w| w.state() == WorkerState::Failed) {
            warn!(stage = failed.stage(), "worker failed, stopping session");
            return Ok(());
        }
        let Some(sample) = app.annotator().get_next_sample(task_id)? else {
            println!("All samples in {} are labeled.", task.name);
            return Ok(());
        };
        display::print_sample_card(&display::sample_view(&sample, &task));
        println!();
        for (i, class) in task.text_classes.iter().enumerate() {
            println!("  [{}] {}", i + 1, class.name);
        }
        let busy: Vec<&str> = workers
            .iter()
            .filter(|w| w.is_working())
            .map(|w| w.stage())
            .collect();
        if !busy.is_empty() {
            println!("  ({} running)", busy.join(", "));
        }
        println!("Class number or name, empty to skip, q to quit:");

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Ok(_) = shutdown.wait_for(|stop| *stop) => {
                info!("shutdown requested, ending session");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let input = line.trim();
        match input {
            "q" | "quit" => return Ok(()),
            "" => continue,
            _ => {}
        }
        let class_id = match input.parse::<usize>() {
            Ok(n) if (1..=task.text_classes.len()).contains(&n) => {
                task.text_classes[n - 1].id.clone()
            }
            _ => match resolve_class(&task, input) {
                Ok(id) => id,
                Err(err) => {
                    println!("{err}");
                    continue;
                }
            },
        };
        match app.annotator().annotate_sample(&sample.id, Some(&class_id)) {
            Err(err) if err.is_transient() => {
                warn!(sample_id = %sample.id, error = %err, "label not saved");
                println!("The store is busy, label not saved. Try again.");
                continue;
            }
            result => {
                result?;
            }
        }
        // Give the estimation worker a moment before the next prompt.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Accept either a class id or a class name of `task`.
fn resolve_class(task: &AnnotationTask, class: &str) -> anyhow::Result<String> {
    task.get_text_class_by_id(class)
        .or_else(|| task.get_text_class_by_name(class))
        .map(|c| c.id.clone())
        .with_context(|| format!("no class '{class}' in task {}", task.name))
}

fn show_sample(view: &display::SampleView, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(view)
    } else {
        display::print_sample_card(view);
        Ok(())
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
