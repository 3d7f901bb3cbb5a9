//! DuckDB storage layer: the durable annotation store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use duckdb::{Connection, params, params_from_iter};
use labelwise_core::{
    AnnotationTask, AnnotationTaskRepository, ClassEstimate, Error, Result, Sample, SampleQuery,
    SampleRepository, TextClass, UnitOfWork, UnitOfWorkFactory,
};
use tracing::{debug, info, warn};

use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS annotation_tasks (
    id VARCHAR PRIMARY KEY,
    name VARCHAR NOT NULL
);
CREATE TABLE IF NOT EXISTS text_classes (
    id VARCHAR PRIMARY KEY,
    annotation_task_id VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    position INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS samples (
    id VARCHAR PRIMARY KEY,
    annotation_task_id VARCHAR NOT NULL,
    text VARCHAR NOT NULL,
    text_class VARCHAR,
    embedding VARCHAR
);
CREATE TABLE IF NOT EXISTS class_estimates (
    id VARCHAR NOT NULL,
    sample_id VARCHAR NOT NULL,
    text_class_id VARCHAR NOT NULL,
    confidence REAL NOT NULL,
    position INTEGER NOT NULL
);
";

fn db(err: duckdb::Error) -> Error {
    StoreError::DuckDb(err).into()
}

fn json(err: serde_json::Error) -> Error {
    StoreError::Json(err).into()
}

/// Durable annotation store backed by DuckDB.
///
/// Every unit of work runs on its own connection to the same database inside
/// one transaction. Estimates have no unique index: `(sample, text_class)`
/// uniqueness follows from `update` replacing a sample's estimate rows
/// wholesale with the domain object's already-deduplicated set.
///
/// `update` writes only the columns that differ from the version the unit of
/// work read, and leaves estimate rows alone unless the estimates changed.
/// Annotation, embedding and estimation each own different columns, so they
/// do not conflict when they overlap on the same sample.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for file-backed storage that survives across process restarts.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> std::result::Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> std::result::Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened annotation database");
        Ok(store)
    }

    fn init(conn: Connection) -> std::result::Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl UnitOfWorkFactory for DuckStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .try_clone()
            .map_err(db)?;
        conn.execute_batch("BEGIN TRANSACTION").map_err(db)?;
        Ok(Box::new(DuckUnitOfWork {
            conn,
            in_transaction: true,
            read: HashMap::new(),
        }))
    }
}

/// One DuckDB transaction. Rolls back on drop unless committed.
pub struct DuckUnitOfWork {
    conn: Connection,
    in_transaction: bool,
    /// Last version of each sample read or written through this unit of work.
    read: HashMap<String, Sample>,
}

struct SampleRow {
    id: String,
    annotation_task_id: String,
    text: String,
    text_class: Option<String>,
    embedding: Option<String>,
}

impl DuckUnitOfWork {
    fn remember(&mut self, samples: &[Sample]) {
        for sample in samples {
            self.read.insert(sample.id.clone(), sample.clone());
        }
    }

    fn load_samples(&self, where_sql: &str, args: &[String]) -> Result<Vec<Sample>> {
        let sql = format!(
            "SELECT s.id, s.annotation_task_id, s.text, s.text_class, s.embedding
             FROM samples s {where_sql} ORDER BY s.id"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(db)?;
        let rows: Vec<SampleRow> = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(SampleRow {
                    id: row.get(0)?,
                    annotation_task_id: row.get(1)?,
                    text: row.get(2)?,
                    text_class: row.get(3)?,
                    embedding: row.get(4)?,
                })
            })
            .map_err(db)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db)?;

        let mut estimates = self.load_estimates(where_sql, args)?;

        rows.into_iter()
            .map(|row| {
                let embedding = row
                    .embedding
                    .as_deref()
                    .map(serde_json::from_str::<Vec<f32>>)
                    .transpose()
                    .map_err(json)?;
                Ok(Sample {
                    estimates: estimates.remove(&row.id).unwrap_or_default(),
                    id: row.id,
                    annotation_task_id: row.annotation_task_id,
                    text: row.text,
                    text_class: row.text_class,
                    embedding,
                })
            })
            .collect()
    }

    fn load_estimates(
        &self,
        where_sql: &str,
        args: &[String],
    ) -> Result<HashMap<String, Vec<ClassEstimate>>> {
        let sql = format!(
            "SELECT e.sample_id, e.id, e.text_class_id, e.confidence
             FROM class_estimates e JOIN samples s ON s.id = e.sample_id
             {where_sql} ORDER BY e.sample_id, e.position"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(db)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ClassEstimate {
                        id: row.get(1)?,
                        text_class_id: row.get(2)?,
                        confidence: row.get(3)?,
                    },
                ))
            })
            .map_err(db)?;

        let mut by_sample: HashMap<String, Vec<ClassEstimate>> = HashMap::new();
        for row in rows {
            let (sample_id, estimate) = row.map_err(db)?;
            by_sample.entry(sample_id).or_default().push(estimate);
        }
        Ok(by_sample)
    }

    fn write_estimates(&self, sample: &Sample) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM class_estimates WHERE sample_id = ?",
                params![sample.id],
            )
            .map_err(db)?;
        for (position, estimate) in sample.estimates.iter().enumerate() {
            self.conn
                .execute(
                    "INSERT INTO class_estimates (id, sample_id, text_class_id, confidence, position)
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        estimate.id,
                        sample.id,
                        estimate.text_class_id,
                        estimate.confidence,
                        position as i64
                    ],
                )
                .map_err(db)?;
        }
        Ok(())
    }

    fn sample_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*)::BIGINT FROM samples WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .map_err(db)?;
        Ok(count > 0)
    }

    fn load_text_classes(&self, task_id: &str) -> Result<Vec<TextClass>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, annotation_task_id FROM text_classes
                 WHERE annotation_task_id = ? ORDER BY position",
            )
            .map_err(db)?;
        let classes = stmt
            .query_map(params![task_id], |row| {
                Ok(TextClass {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    annotation_task_id: row.get(2)?,
                })
            })
            .map_err(db)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db)?;
        Ok(classes)
    }

    fn write_text_classes(&self, task: &AnnotationTask) -> Result<()> {
        for (position, text_class) in task.text_classes.iter().enumerate() {
            let changed = self
                .conn
                .execute(
                    "UPDATE text_classes SET name = ?, position = ? WHERE id = ?",
                    params![text_class.name, position as i64, text_class.id],
                )
                .map_err(db)?;
            if changed == 0 {
                self.conn
                    .execute(
                        "INSERT INTO text_classes (id, annotation_task_id, name, position)
                         VALUES (?, ?, ?, ?)",
                        params![text_class.id, task.id, text_class.name, position as i64],
                    )
                    .map_err(db)?;
            }
        }
        Ok(())
    }
}

fn encode_embedding(sample: &Sample) -> Result<Option<String>> {
    sample
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(json)
}

/// `SET` assignments for the sample columns that differ from `previous`, plus
/// their arguments. Without a previous version every column is assigned.
fn changed_columns(
    previous: Option<&Sample>,
    sample: &Sample,
) -> Result<(String, Vec<Option<String>>)> {
    let mut assignments = Vec::new();
    let mut args = Vec::new();

    if previous.is_none_or(|p| p.annotation_task_id != sample.annotation_task_id) {
        assignments.push("annotation_task_id = ?");
        args.push(Some(sample.annotation_task_id.clone()));
    }
    if previous.is_none_or(|p| p.text != sample.text) {
        assignments.push("text = ?");
        args.push(Some(sample.text.clone()));
    }
    if previous.is_none_or(|p| p.text_class != sample.text_class) {
        assignments.push("text_class = ?");
        args.push(sample.text_class.clone());
    }
    if previous.is_none_or(|p| p.embedding != sample.embedding) {
        assignments.push("embedding = ?");
        args.push(encode_embedding(sample)?);
    }
    Ok((assignments.join(", "), args))
}

/// `WHERE` clause over the `samples s` alias plus its positional arguments.
fn where_clause(query: Option<&SampleQuery>) -> (String, Vec<String>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut args = Vec::new();

    if let Some(query) = query {
        match query.has_label {
            Some(true) => conditions.push("s.text_class IS NOT NULL"),
            Some(false) => conditions.push("s.text_class IS NULL"),
            None => {}
        }
        match query.has_embedding {
            Some(true) => conditions.push("s.embedding IS NOT NULL"),
            Some(false) => conditions.push("s.embedding IS NULL"),
            None => {}
        }
        if let Some(task_id) = &query.task_id {
            conditions.push("s.annotation_task_id = ?");
            args.push(task_id.clone());
        }
    }

    if conditions.is_empty() {
        (String::new(), args)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), args)
    }
}

impl UnitOfWork for DuckUnitOfWork {
    fn samples(&mut self) -> &mut dyn SampleRepository {
        self
    }

    fn annotation_tasks(&mut self) -> &mut dyn AnnotationTaskRepository {
        self
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(db)?;
        self.in_transaction = false;
        debug!("committed unit of work");
        self.conn.execute_batch("BEGIN TRANSACTION").map_err(db)?;
        self.in_transaction = true;
        Ok(())
    }
}

impl Drop for DuckUnitOfWork {
    fn drop(&mut self) {
        if self.in_transaction
            && let Err(e) = self.conn.execute_batch("ROLLBACK")
        {
            warn!(error = %e, "rollback failed");
        }
    }
}

impl SampleRepository for DuckUnitOfWork {
    fn get_by_id(&mut self, id: &str) -> Result<Sample> {
        let samples = self.load_samples("WHERE s.id = ?", &[id.to_string()])?;
        self.remember(&samples);
        samples
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("sample", id))
    }

    fn find(&mut self, query: Option<&SampleQuery>) -> Result<Vec<Sample>> {
        let (where_sql, args) = where_clause(query);
        let samples = self.load_samples(&where_sql, &args)?;
        self.remember(&samples);
        Ok(samples)
    }

    fn count(&mut self, query: Option<&SampleQuery>) -> Result<usize> {
        let (where_sql, args) = where_clause(query);
        let sql = format!("SELECT count(*)::BIGINT FROM samples s {where_sql}");
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))
            .map_err(db)?;
        Ok(count as usize)
    }

    fn create(&mut self, sample: &Sample) -> Result<()> {
        if self.sample_exists(&sample.id)? {
            return Err(Error::Validation(format!(
                "sample {} already exists",
                sample.id
            )));
        }
        let embedding = encode_embedding(sample)?;
        self.conn
            .execute(
                "INSERT INTO samples (id, annotation_task_id, text, text_class, embedding)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    sample.id,
                    sample.annotation_task_id,
                    sample.text,
                    sample.text_class,
                    embedding
                ],
            )
            .map_err(db)?;
        self.write_estimates(sample)?;
        self.remember(std::slice::from_ref(sample));
        Ok(())
    }

    fn update(&mut self, sample: &Sample) -> Result<()> {
        let previous = self.read.get(&sample.id);
        let estimates_changed = previous.is_none_or(|p| p.estimates != sample.estimates);
        let (assignments, mut args) = changed_columns(previous, sample)?;

        if !assignments.is_empty() {
            args.push(Some(sample.id.clone()));
            let changed = self
                .conn
                .execute(
                    &format!("UPDATE samples SET {assignments} WHERE id = ?"),
                    params_from_iter(args.iter()),
                )
                .map_err(db)?;
            if changed == 0 {
                return Err(Error::not_found("sample", &sample.id));
            }
        } else if !self.sample_exists(&sample.id)? {
            return Err(Error::not_found("sample", &sample.id));
        }

        if estimates_changed {
            self.write_estimates(sample)?;
        }
        self.remember(std::slice::from_ref(sample));
        Ok(())
    }
}

impl AnnotationTaskRepository for DuckUnitOfWork {
    fn get_by_id(&mut self, id: &str) -> Result<AnnotationTask> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM annotation_tasks WHERE id = ?")
            .map_err(db)?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db)?;
        let (id, name) = rows
            .next()
            .transpose()
            .map_err(db)?
            .ok_or_else(|| Error::not_found("annotation task", id))?;
        let text_classes = self.load_text_classes(&id)?;
        Ok(AnnotationTask {
            id,
            name,
            text_classes,
        })
    }

    fn find(&mut self) -> Result<Vec<AnnotationTask>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM annotation_tasks ORDER BY name, id")
            .map_err(db)?;
        let heads: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db)?;
        heads
            .into_iter()
            .map(|(id, name)| {
                let text_classes = self.load_text_classes(&id)?;
                Ok(AnnotationTask {
                    id,
                    name,
                    text_classes,
                })
            })
            .collect()
    }

    fn create(&mut self, task: &AnnotationTask) -> Result<()> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*)::BIGINT FROM annotation_tasks WHERE id = ?",
                params![task.id],
                |row| row.get(0),
            )
            .map_err(db)?;
        if count > 0 {
            return Err(Error::Validation(format!(
                "annotation task {} already exists",
                task.id
            )));
        }
        self.conn
            .execute(
                "INSERT INTO annotation_tasks (id, name) VALUES (?, ?)",
                params![task.id, task.name],
            )
            .map_err(db)?;
        self.write_text_classes(task)
    }

    fn update(&mut self, task: &AnnotationTask) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE annotation_tasks SET name = ? WHERE id = ?",
                params![task.name, task.id],
            )
            .map_err(db)?;
        if changed == 0 {
            return Err(Error::not_found("annotation task", &task.id));
        }
        self.write_text_classes(task)
    }
}
