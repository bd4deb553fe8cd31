//! Typed wire models for the BigQuery REST v2 resources the data-plane
//! touches: table management, streaming inserts, and load jobs.
//!
//! Field names follow the REST API's camelCase; int64 values that the API
//! encodes as decimal strings go through a tolerant (de)serializer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, SinkResult};
use crate::schema::{FieldMode, FieldSchema, FieldType, RecordSchema};

/// (project, dataset, table) triple identifying one destination table.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableReference {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> TableReference {
        TableReference {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// One field of a table schema in wire form.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<TableFieldSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Describes the fields in a table.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub fields: Vec<TableFieldSchema>,
}

/// Time-based partitioning specification for a table.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimePartitioning {
    /// DAY, HOUR, MONTH, or YEAR.
    #[serde(rename = "type")]
    pub partition_type: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "int64_string"
    )]
    pub expiration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Clustering specification for a table.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Clustering {
    pub fields: Vec<String>,
}

/// The slice of the Table resource used for create and schema-fetch calls.
/// Output-only response fields are ignored on deserialization.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    #[serde(default)]
    pub table_reference: TableReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_partitioning: Option<TimePartitioning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering: Option<Clustering>,
}

/// One structured error returned by the service, carrying the
/// machine-readable reason code that drives retry classification.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorProto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error body of a failed REST call.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Top-level error envelope of a failed REST call.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// One row of a streaming-insert request.
#[derive(Clone, PartialEq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<String>,
    pub json: Map<String, Value>,
}

/// Body of a tabledata.insertAll call.
#[derive(Clone, PartialEq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_invalid_rows: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_unknown_values: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_suffix: Option<String>,
    pub rows: Vec<InsertAllRow>,
}

/// Per-row failure reported by tabledata.insertAll.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InsertErrors {
    pub index: u32,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

/// Response of a tabledata.insertAll call.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllResponse {
    #[serde(default)]
    pub insert_errors: Vec<InsertErrors>,
}

/// Identifies one job within a project.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl fmt::Display for JobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project_id, self.job_id)
    }
}

/// Current state and outcome of a job.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// PENDING, RUNNING, or DONE.
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_result: Option<ErrorProto>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

/// Load-specific job configuration.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigurationLoad {
    pub source_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    pub destination_table: TableReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_unknown_values: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bad_records: Option<i32>,
}

/// Job configuration envelope; only load jobs are issued by this crate.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<JobConfigurationLoad>,
}

/// The slice of the Job resource used for submission and polling.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_reference: Option<JobReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<JobConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

/// Converts a schema-model field to its wire form.
impl From<&FieldSchema> for TableFieldSchema {
    fn from(field: &FieldSchema) -> TableFieldSchema {
        TableFieldSchema {
            name: field.name().to_string(),
            field_type: field.field_type().as_wire().to_string(),
            mode: Some(field.mode().as_wire().to_string()),
            fields: field
                .nested()
                .map(|nested| nested.fields().iter().map(Into::into).collect()),
            description: None,
        }
    }
}

/// Converts a full record schema to its wire form.
pub fn table_schema_from(schema: &RecordSchema) -> TableSchema {
    TableSchema {
        fields: schema.fields().iter().map(Into::into).collect(),
    }
}

/// Rebuilds a record schema from the wire form returned by tables.get.
pub fn record_schema_from_wire(fields: &[TableFieldSchema]) -> SinkResult<RecordSchema> {
    let mut schema = RecordSchema::new();

    for wire_field in fields {
        let Some(field_type) = FieldType::parse(&wire_field.field_type) else {
            bail!(
                ErrorKind::UnknownFieldType,
                "Fetched schema contains an unknown field type",
                format!("{}: {}", wire_field.name, wire_field.field_type)
            );
        };

        let mode = match wire_field.mode.as_deref() {
            Some(mode_name) => match FieldMode::parse(mode_name) {
                Some(mode) => mode,
                None => bail!(
                    ErrorKind::ConfigError,
                    "Fetched schema contains an unknown field mode",
                    format!("{}: {mode_name}", wire_field.name)
                ),
            },
            None => FieldMode::Nullable,
        };

        let field = if field_type == FieldType::Record {
            let children = wire_field.fields.as_deref().unwrap_or_default();
            if children.is_empty() {
                bail!(
                    ErrorKind::ConfigError,
                    "Fetched record field has no nested fields",
                    wire_field.name.clone()
                );
            }
            FieldSchema::record(wire_field.name.clone(), mode, record_schema_from_wire(children)?)?
        } else {
            FieldSchema::scalar(wire_field.name.clone(), field_type, mode)?
        };

        schema.add_field(field)?;
    }

    Ok(schema)
}

/// Serializes optional int64 values as the decimal strings the REST API uses
/// and accepts either a string or a number on input.
mod int64_string {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_str(&value.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        Option::<Raw>::deserialize(deserializer)?
            .map(|raw| match raw {
                Raw::Int(value) => Ok(value),
                Raw::Str(text) => text.parse::<i64>().map_err(D::Error::custom),
            })
            .transpose()
    }
}
