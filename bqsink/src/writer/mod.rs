//! The write orchestrator: the only component with network side effects.
//!
//! Issues streaming-insert and load-job requests, classifies remote
//! failures, retries or escalates them, and drives the asynchronous
//! job-completion protocol. Designed for concurrent callers: the client and
//! configuration are accessible without locks, while the table-rotation
//! cursor, the schema cache, and the pending-job queue each sit behind their
//! own lock.

mod jobs;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::bigquery::{
    BigQueryClient, is_already_exists_conflict, is_conflict, is_not_found,
};
use crate::clients::models::{
    Clustering, InsertAllRequest, InsertAllRow, JobReference, Table, TableReference,
    TimePartitioning, record_schema_from_wire, table_schema_from,
};
use crate::config::SinkConfig;
use crate::error::{ErrorKind, SinkError, SinkResult, is_retryable_reason};
use crate::schema::{RecordSchema, SchemaCache};
use crate::upload::UploadBody;
use crate::{bail, sink_error};

pub use jobs::{JobOutcome, LoadJobQueue, PendingLoadJob};

/// Maximum attempts of the internal create-table retry loop.
const CREATE_TABLE_MAX_ATTEMPTS: u32 = 5;
/// Initial wait of the create-table retry loop; doubles per attempt.
const CREATE_TABLE_INITIAL_WAIT_MS: u64 = 1_000;
/// Upper bound of the random jitter added to each create-table wait.
const CREATE_TABLE_JITTER_MS: u64 = 500;
/// Prefix of every job id issued by this writer.
const JOB_ID_PREFIX: &str = "bqsink_job_";
/// Maximum length of a BigQuery job id.
const MAX_JOB_ID_LEN: usize = 1024;

/// Result of a single non-blocking job poll.
#[derive(Debug)]
pub enum JobPoll {
    Running,
    Done { error: Option<SinkError> },
}

/// One failed row of a streaming-insert request.
#[derive(Debug, Clone)]
pub struct RowInsertError {
    pub index: u32,
    pub reason: String,
    pub message: String,
}

/// Per-row error policy for streaming inserts.
///
/// Without a configured row-identity field, duplicates are harmless and
/// every per-row error is worth retrying. With row identity configured,
/// duplicates indicate a logic bug and only reason codes from the retryable
/// list justify a requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertErrorPolicy {
    RetryAll,
    ByReason,
}

/// Outcome of one streaming-insert request. Per-row errors are data, not
/// exceptions: the caller decides retry eligibility from the reason codes.
#[derive(Debug, Default)]
pub struct InsertOutcome {
    pub row_errors: Vec<RowInsertError>,
}

impl InsertOutcome {
    /// Returns whether every row was accepted.
    pub fn is_ok(&self) -> bool {
        self.row_errors.is_empty()
    }

    /// Returns whether every failed row is retryable under the policy.
    pub fn all_retryable(&self, policy: InsertErrorPolicy) -> bool {
        match policy {
            InsertErrorPolicy::RetryAll => true,
            InsertErrorPolicy::ByReason => self
                .row_errors
                .iter()
                .all(|row_error| is_retryable_reason(&row_error.reason)),
        }
    }
}

/// Write orchestrator for one configured output.
#[derive(Debug, Clone)]
pub struct BigQueryWriter {
    client: BigQueryClient,
    config: SinkConfig,
    schema_cache: SchemaCache,
    rotation: Arc<Mutex<usize>>,
    pending_jobs: LoadJobQueue,
}

impl BigQueryWriter {
    /// Creates a writer after validating the destination configuration.
    pub fn new(client: BigQueryClient, config: SinkConfig) -> SinkResult<BigQueryWriter> {
        config.validate().map_err(|err| {
            sink_error!(
                ErrorKind::ConfigError,
                "Invalid sink configuration",
                err
            )
        })?;

        Ok(BigQueryWriter {
            client,
            config,
            schema_cache: SchemaCache::new(),
            rotation: Arc::new(Mutex::new(0)),
            pending_jobs: LoadJobQueue::new(),
        })
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// The queue of submitted-but-not-terminal load jobs.
    pub fn pending_jobs(&self) -> &LoadJobQueue {
        &self.pending_jobs
    }

    /// Per-row error policy derived from the configuration: strict when a
    /// row-identity field is configured, duplicate-tolerant otherwise.
    pub fn insert_error_policy(&self) -> InsertErrorPolicy {
        if self.config.insert_id_field.is_some() {
            InsertErrorPolicy::ByReason
        } else {
            InsertErrorPolicy::RetryAll
        }
    }

    /// Claims the next destination table, rotating round-robin across the
    /// configured list.
    ///
    /// Read-then-rotate happens under one lock so two concurrent writers can
    /// never claim the same slot out of order.
    pub async fn next_table(&self) -> TableReference {
        let mut cursor = self.rotation.lock().await;
        let table = self.config.tables[*cursor].clone();
        *cursor = (*cursor + 1) % self.config.tables.len();

        TableReference::new(&self.config.project, &self.config.dataset, table)
    }

    /// Creates a destination table with the configured partitioning and
    /// clustering.
    ///
    /// Idempotent: a 409 "Already Exists" conflict is success. Transient
    /// failures are retried internally with a bounded doubling backoff; this
    /// is the only operation that carries its own retry loop.
    pub async fn create_table(
        &self,
        table: &TableReference,
        schema: &RecordSchema,
    ) -> SinkResult<()> {
        let body = Table {
            table_reference: table.clone(),
            schema: Some(table_schema_from(schema)),
            time_partitioning: self.config.time_partitioning.as_ref().map(|partitioning| {
                TimePartitioning {
                    partition_type: partitioning.partition_type.clone(),
                    expiration_ms: partitioning.expiration_ms,
                    field: partitioning.field.clone(),
                }
            }),
            clustering: (!self.config.clustering_fields.is_empty()).then(|| Clustering {
                fields: self.config.clustering_fields.clone(),
            }),
        };

        let mut wait = Duration::from_millis(CREATE_TABLE_INITIAL_WAIT_MS);
        for attempt in 1..=CREATE_TABLE_MAX_ATTEMPTS {
            match self.client.insert_table(&body).await {
                Ok(_) => {
                    info!(table = %table, "created table");
                    return Ok(());
                }
                Err(error) if is_already_exists_conflict(&error) => {
                    debug!(table = %table, "table already exists");
                    return Ok(());
                }
                Err(error) if error.is_retryable() && attempt < CREATE_TABLE_MAX_ATTEMPTS => {
                    let jitter = rand::thread_rng().gen_range(0..=CREATE_TABLE_JITTER_MS);
                    warn!(
                        table = %table,
                        attempt,
                        wait_ms = wait.as_millis() as u64 + jitter,
                        error = %error,
                        "table creation failed, backing off before retry"
                    );
                    sleep(wait + Duration::from_millis(jitter)).await;
                    wait *= 2;
                }
                Err(error) => return Err(error),
            }
        }

        bail!(
            ErrorKind::ServerError,
            "Table creation retries exhausted",
            table
        )
    }

    /// Streams formatted rows into a table.
    ///
    /// Per-row insertion errors are reported in the outcome, not raised; the
    /// caller applies [`BigQueryWriter::insert_error_policy`] to decide
    /// between requeueing and escalation.
    pub async fn insert_rows(
        &self,
        table: &TableReference,
        rows: Vec<Map<String, Value>>,
        template_suffix: Option<&str>,
    ) -> SinkResult<InsertOutcome> {
        let rows = rows
            .into_iter()
            .map(|json| InsertAllRow {
                insert_id: self
                    .config
                    .insert_id_field
                    .as_deref()
                    .and_then(|path| lookup_path(&json, path)),
                json,
            })
            .collect();

        let request = InsertAllRequest {
            skip_invalid_rows: Some(self.config.skip_invalid_rows),
            ignore_unknown_values: Some(self.config.ignore_unknown_values),
            template_suffix: template_suffix.map(Into::into),
            rows,
        };

        let response = self.client.insert_all(table, &request).await?;
        let row_errors: Vec<RowInsertError> = response
            .insert_errors
            .into_iter()
            .map(|insert_errors| {
                let first = insert_errors.errors.into_iter().next().unwrap_or_default();
                RowInsertError {
                    index: insert_errors.index,
                    reason: first.reason.unwrap_or_default(),
                    message: first.message.unwrap_or_default(),
                }
            })
            .collect();

        if !row_errors.is_empty() {
            warn!(
                table = %table,
                failed_rows = row_errors.len(),
                "streaming insert reported per-row errors"
            );
        }

        Ok(InsertOutcome { row_errors })
    }

    /// Fetches the live table schema and refreshes the cache with it.
    ///
    /// Errors are logged and mean "no newer schema available": the caller
    /// keeps working with the last good cached schema.
    pub async fn fetch_schema(&self, table: &TableReference) -> Option<Arc<RecordSchema>> {
        match self.client.get_table(table).await {
            Ok(fetched) => match fetched.schema {
                Some(wire) => match record_schema_from_wire(&wire.fields) {
                    Ok(schema) => Some(self.schema_cache.insert(table.to_string(), schema).await),
                    Err(error) => {
                        warn!(table = %table, error = %error, "fetched schema is not usable");
                        None
                    }
                },
                None => {
                    warn!(table = %table, "fetched table carries no schema");
                    None
                }
            },
            Err(error) => {
                warn!(table = %table, error = %error, "schema fetch failed, keeping cached schema");
                None
            }
        }
    }

    /// Returns the cached schema for a table, refreshing it once the
    /// configured TTL has expired and falling back to the stale value when
    /// the refresh fails.
    pub async fn cached_schema(&self, table: &TableReference) -> Option<Arc<RecordSchema>> {
        let ttl = Duration::from_secs(self.config.schema_cache_ttl_secs);
        let key = table.to_string();

        if let Some(schema) = self.schema_cache.get_fresh(&key, ttl).await {
            return Some(schema);
        }

        match self.fetch_schema(table).await {
            Some(schema) => Some(schema),
            None => self.schema_cache.get(&key).await,
        }
    }

    /// Submits one load job and returns its reference for polling.
    ///
    /// When the destination table already exists the schema is omitted from
    /// the submission, since the live schema takes precedence. A missing
    /// table either fails outright or, with auto-create enabled, is created
    /// here followed by a retryable "table not ready" signal: the payload is
    /// requeued rather than silently resubmitted, because a fresh table may
    /// take time to become insert-ready.
    ///
    /// A `job_id_hint` pins a deterministic job id so a redelivered chunk
    /// maps onto the same job; if the service reports that id as already
    /// submitted, the existing job is polled instead of failing.
    pub async fn submit_load_job<S>(
        &self,
        table: &TableReference,
        source: S,
        payload_len: u64,
        schema: &RecordSchema,
        job_id_hint: Option<&str>,
    ) -> SinkResult<JobReference>
    where
        S: Read + Send + 'static,
    {
        let include_schema = match self.client.get_table(table).await {
            Ok(_) => false,
            Err(error) if is_not_found(&error) => {
                if !self.config.auto_create_table {
                    return Err(sink_error!(
                        ErrorKind::TableMissing,
                        "Destination table does not exist",
                        table
                    ));
                }

                self.create_table(table, schema).await?;
                info!(table = %table, "destination table created, payload must be retried next cycle");
                bail!(
                    ErrorKind::TableNotReady,
                    "Destination table was just created and is not insert-ready",
                    table
                );
            }
            Err(error) => {
                // Existence is unknown; existing-table precedence only
                // applies when existence is confirmed.
                warn!(
                    table = %table,
                    error = %error,
                    "table existence check failed, submitting with schema attached"
                );
                true
            }
        };

        let job_id = match job_id_hint {
            Some(hint) => derived_job_id(hint),
            None => generated_job_id(),
        };
        let job_reference = JobReference {
            project_id: table.project_id.clone(),
            job_id,
            location: None,
        };

        let wire_schema = include_schema.then(|| table_schema_from(schema));
        let body = UploadBody::for_load(
            table,
            wire_schema,
            Some(job_reference.clone()),
            source,
            payload_len,
        )?;

        match self.client.insert_load_job(&table.project_id, body).await {
            Ok(job) => {
                let job_reference = job.job_reference.unwrap_or(job_reference);
                info!(table = %table, job = %job_reference, "load job submitted");
                Ok(job_reference)
            }
            Err(error) if job_id_hint.is_some() && is_conflict(&error) => {
                info!(
                    job = %job_reference,
                    "identical load job already submitted, polling the existing job"
                );
                Ok(job_reference)
            }
            Err(error) => Err(error),
        }
    }

    /// Polls a job once without blocking across polls; repeated-poll
    /// scheduling belongs to the caller.
    pub async fn poll_job(&self, job: &JobReference) -> SinkResult<JobPoll> {
        let fetched = self.client.get_job(job).await?;
        let Some(status) = fetched.status else {
            return Ok(JobPoll::Running);
        };

        if status.state != "DONE" {
            return Ok(JobPoll::Running);
        }

        match status.error_result {
            None => Ok(JobPoll::Done { error: None }),
            Some(proto) => {
                let message = proto.message.unwrap_or_default();
                let mut error = sink_error!(
                    ErrorKind::JobFailed,
                    "Load job finished with an error",
                    format!("{job}: {message}")
                );
                if let Some(reason) = proto.reason {
                    error = error.with_reason(reason);
                }

                Ok(JobPoll::Done { error: Some(error) })
            }
        }
    }

    /// Polls a job to completion with the configured fixed interval, for
    /// callers that want synchronous semantics.
    pub async fn await_job(&self, job: &JobReference) -> SinkResult<()> {
        let interval = Duration::from_millis(self.config.job_poll_interval_ms);

        loop {
            match self.poll_job(job).await? {
                JobPoll::Running => sleep(interval).await,
                JobPoll::Done { error: None } => return Ok(()),
                JobPoll::Done { error: Some(error) } => return Err(error),
            }
        }
    }

    /// Drains one polling tick over the pending-job queue: every queued job
    /// is polled once, running jobs are re-enqueued, and terminal jobs yield
    /// exactly one outcome each for the caller's commit/rollback handling.
    pub async fn poll_pending(&self) -> Vec<JobOutcome> {
        let batch = self.pending_jobs.take_batch().await;
        if batch.is_empty() {
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        let mut still_running = Vec::new();
        for job in batch {
            let poll = self.poll_job(&job.job).await;
            jobs::settle_poll(job, poll, &mut outcomes, &mut still_running);
        }

        for job in still_running {
            self.pending_jobs.requeue(job).await;
        }

        outcomes
    }
}

/// Normalizes a caller-supplied identifier into a legal, deterministic job
/// id: the same hint always maps to the same id, so redelivery of a chunk
/// dedups against its earlier submission.
fn derived_job_id(hint: &str) -> String {
    let mut job_id = String::with_capacity(JOB_ID_PREFIX.len() + hint.len());
    job_id.push_str(JOB_ID_PREFIX);
    for c in hint.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            job_id.push(c);
        } else {
            job_id.push('_');
        }
    }

    job_id.truncate(MAX_JOB_ID_LEN);
    job_id
}

/// Generates a fresh job id for submissions without a dedup hint.
fn generated_job_id() -> String {
    format!("{JOB_ID_PREFIX}{}", Uuid::new_v4().simple())
}

/// Resolves a dotted path inside a row and renders the value as a string.
fn lookup_path(row: &Map<String, Value>, path: &str) -> Option<String> {
    let mut segments = path.split('.');
    let mut current = row.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::StaticAuthenticator;
    use serde_json::json;

    fn writer(tables: &[&str], insert_id_field: Option<&str>) -> BigQueryWriter {
        let config: SinkConfig = serde_json::from_value(json!({
            "project": "acme",
            "dataset": "events",
            "tables": tables,
            "insert_id_field": insert_id_field,
        }))
        .unwrap();

        let client = BigQueryClient::new(
            Arc::new(StaticAuthenticator::new("token")),
            Duration::from_secs(5),
        )
        .unwrap();

        BigQueryWriter::new(client, config).unwrap()
    }

    #[tokio::test]
    async fn rotation_walks_the_table_list_in_order() {
        let writer = writer(&["a", "b", "c"], None);

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(writer.next_table().await.table_id);
        }

        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn concurrent_rotation_assigns_slots_evenly() {
        let writer = Arc::new(writer(&["a", "b", "c"], None));

        let mut handles = Vec::new();
        for _ in 0..30 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.next_table().await.table_id
            }));
        }

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_insert(0usize) += 1;
        }

        assert_eq!(counts["a"], 10);
        assert_eq!(counts["b"], 10);
        assert_eq!(counts["c"], 10);
    }

    #[test]
    fn derived_job_ids_are_deterministic_and_legal() {
        let first = derived_job_id("chunk 55/2020-07-31.log");
        let second = derived_job_id("chunk 55/2020-07-31.log");
        assert_eq!(first, second);
        assert_eq!(first, "bqsink_job_chunk_55_2020-07-31_log");

        assert_ne!(generated_job_id(), generated_job_id());
    }

    #[test]
    fn lookup_path_walks_nested_objects() {
        let row = json!({
            "id": 42,
            "meta": {"uuid": "abc-123", "flags": [1, 2]},
        });
        let row = row.as_object().unwrap();

        assert_eq!(lookup_path(row, "id").unwrap(), "42");
        assert_eq!(lookup_path(row, "meta.uuid").unwrap(), "abc-123");
        assert!(lookup_path(row, "meta.missing").is_none());
        assert!(lookup_path(row, "meta.flags").is_none());
    }

    #[test]
    fn insert_policy_follows_row_identity_configuration() {
        assert_eq!(
            writer(&["a"], None).insert_error_policy(),
            InsertErrorPolicy::RetryAll
        );
        assert_eq!(
            writer(&["a"], Some("meta.uuid")).insert_error_policy(),
            InsertErrorPolicy::ByReason
        );
    }

    #[test]
    fn insert_outcomes_classify_by_policy() {
        let outcome = InsertOutcome {
            row_errors: vec![
                RowInsertError {
                    index: 0,
                    reason: "backendError".to_string(),
                    message: String::new(),
                },
                RowInsertError {
                    index: 3,
                    reason: "invalid".to_string(),
                    message: String::new(),
                },
            ],
        };

        assert!(!outcome.is_ok());
        assert!(outcome.all_retryable(InsertErrorPolicy::RetryAll));
        assert!(!outcome.all_retryable(InsertErrorPolicy::ByReason));

        let transient_only = InsertOutcome {
            row_errors: vec![RowInsertError {
                index: 1,
                reason: "timeout".to_string(),
                message: String::new(),
            }],
        };
        assert!(transient_only.all_retryable(InsertErrorPolicy::ByReason));
    }
}
