//! The record formatter: pure glue between raw host records and the schema
//! model.
//!
//! Merges externally injected metadata (ingestion timestamp, routing tag)
//! into the record, rewrites key names via configured rules, and delegates to
//! [`RecordSchema::format`]. Performs no network or file I/O.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::error;

use crate::error::{ErrorKind, SinkResult};
use crate::schema::RecordSchema;
use crate::sink_error;

/// Metadata the host framework supplies alongside each raw record.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    /// Logical ingestion timestamp of the record.
    pub timestamp: DateTime<Utc>,
    /// Routing tag of the record.
    pub tag: String,
}

/// Key-rewrite and metadata-injection options for a formatter.
#[derive(Debug, Clone, Default)]
pub struct FormatterOptions {
    /// Ordered regex substitutions applied to every key, first to last.
    /// Each entry is `(pattern, replacement)`; replacements may use `$1`
    /// capture groups.
    pub key_rewrites: Vec<(String, String)>,
    /// Strip characters outside `[A-Za-z0-9_]` from keys, after the rewrite
    /// rules ran.
    pub sanitize_keys: bool,
    /// Row field that receives the ingestion timestamp, unless the record
    /// already carries one.
    pub timestamp_field: Option<String>,
    /// Row field that receives the routing tag, unless the record already
    /// carries one.
    pub tag_field: Option<String>,
}

/// Applies one schema to one record, producing a delivery-ready row.
#[derive(Debug, Clone)]
pub struct RecordFormatter {
    schema: Arc<RecordSchema>,
    rewrites: Vec<(Regex, String)>,
    sanitize_keys: bool,
    timestamp_field: Option<String>,
    tag_field: Option<String>,
}

impl RecordFormatter {
    /// Creates a formatter, compiling the key-rewrite patterns.
    ///
    /// An invalid pattern is a fatal configuration error.
    pub fn new(schema: Arc<RecordSchema>, options: FormatterOptions) -> SinkResult<RecordFormatter> {
        let mut rewrites = Vec::with_capacity(options.key_rewrites.len());
        for (pattern, replacement) in options.key_rewrites {
            let compiled = Regex::new(&pattern).map_err(|err| {
                sink_error!(
                    ErrorKind::ConfigError,
                    "Invalid key rewrite pattern",
                    pattern,
                    source: err
                )
            })?;
            rewrites.push((compiled, replacement));
        }

        Ok(RecordFormatter {
            schema,
            rewrites,
            sanitize_keys: options.sanitize_keys,
            timestamp_field: options.timestamp_field,
            tag_field: options.tag_field,
        })
    }

    /// The schema this formatter applies.
    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Formats one raw record into a row.
    ///
    /// A record that fails coercion is logged together with the schema it was
    /// checked against and the error is re-raised: one malformed record must
    /// not silently corrupt a batch, and the host decides batch-level
    /// handling.
    pub fn format(
        &self,
        record: &Map<String, Value>,
        meta: &RecordMeta,
        is_load: bool,
    ) -> SinkResult<Map<String, Value>> {
        let mut merged = self.rewrite_object(record);

        if let Some(tag_field) = &self.tag_field {
            merged
                .entry(tag_field.clone())
                .or_insert_with(|| Value::String(meta.tag.clone()));
        }
        if let Some(timestamp_field) = &self.timestamp_field {
            merged
                .entry(timestamp_field.clone())
                .or_insert_with(|| epoch_value(meta.timestamp));
        }

        match self.schema.format(&merged, is_load) {
            Ok(row) => Ok(row),
            Err(err) => {
                let schema_fields: Vec<&str> =
                    self.schema.fields().iter().map(|field| field.name()).collect();
                let record = Value::Object(merged);
                error!(
                    record = %record,
                    schema_fields = ?schema_fields,
                    error = %err,
                    "failed to format record against schema"
                );
                Err(err)
            }
        }
    }

    /// Rewrites the keys of an object, recursing into nested objects and
    /// arrays. When two keys collapse to the same name the later one wins.
    fn rewrite_object(&self, record: &Map<String, Value>) -> Map<String, Value> {
        let mut rewritten = Map::new();
        for (key, value) in record {
            rewritten.insert(self.rewrite_key(key), self.rewrite_value(value));
        }

        rewritten
    }

    fn rewrite_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(object) => Value::Object(self.rewrite_object(object)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.rewrite_value(item)).collect())
            }
            other => other.clone(),
        }
    }

    fn rewrite_key(&self, key: &str) -> String {
        let mut key = key.to_string();
        for (pattern, replacement) in &self.rewrites {
            key = pattern.replace_all(&key, replacement.as_str()).into_owned();
        }
        if self.sanitize_keys {
            key.retain(|c| c.is_ascii_alphanumeric() || c == '_');
        }

        key
    }
}

/// Renders an instant as fractional epoch seconds, the form the timestamp
/// coercion resolves back to the same microsecond.
fn epoch_value(timestamp: DateTime<Utc>) -> Value {
    Value::from(timestamp.timestamp_micros() as f64 / 1_000_000.0)
}
