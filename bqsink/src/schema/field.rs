use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::conversions::time::{
    DATE_FORMAT, DATETIME_FORMAT, TIME_FORMAT, TIMESTAMP_FORMAT, coerce_instant,
};
use crate::conversions::{coerce_bool, numeric};
use crate::error::{ErrorKind, SinkResult};
use crate::schema::RecordSchema;
use crate::{bail, sink_error};

/// Maximum length of a BigQuery column name.
const MAX_FIELD_NAME_LEN: usize = 128;

/// The closed set of BigQuery column types handled by the data-plane.
///
/// The warehouse's open per-type hierarchy maps onto this tagged variant so
/// dispatch in [`FieldSchema::format_one`] stays exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
    DateTime,
    Time,
    Numeric,
    BigNumeric,
    Json,
    Geography,
    Record,
}

impl FieldType {
    /// Parses a type name case-insensitively, accepting the REST API aliases
    /// (`INT64`, `FLOAT64`, `BOOL`, `STRUCT`).
    pub fn parse(name: &str) -> Option<FieldType> {
        match name.to_ascii_uppercase().as_str() {
            "STRING" => Some(FieldType::String),
            "INTEGER" | "INT64" => Some(FieldType::Integer),
            "FLOAT" | "FLOAT64" => Some(FieldType::Float),
            "BOOLEAN" | "BOOL" => Some(FieldType::Boolean),
            "TIMESTAMP" => Some(FieldType::Timestamp),
            "DATE" => Some(FieldType::Date),
            "DATETIME" => Some(FieldType::DateTime),
            "TIME" => Some(FieldType::Time),
            "NUMERIC" => Some(FieldType::Numeric),
            "BIGNUMERIC" => Some(FieldType::BigNumeric),
            "JSON" => Some(FieldType::Json),
            "GEOGRAPHY" => Some(FieldType::Geography),
            "RECORD" | "STRUCT" => Some(FieldType::Record),
            _ => None,
        }
    }

    /// Returns the canonical REST API spelling of this type.
    pub fn as_wire(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Date => "DATE",
            FieldType::DateTime => "DATETIME",
            FieldType::Time => "TIME",
            FieldType::Numeric => "NUMERIC",
            FieldType::BigNumeric => "BIGNUMERIC",
            FieldType::Json => "JSON",
            FieldType::Geography => "GEOGRAPHY",
            FieldType::Record => "RECORD",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Cardinality qualifier on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

impl FieldMode {
    /// Parses a mode name case-insensitively.
    pub fn parse(name: &str) -> Option<FieldMode> {
        match name.to_ascii_uppercase().as_str() {
            "NULLABLE" => Some(FieldMode::Nullable),
            "REQUIRED" => Some(FieldMode::Required),
            "REPEATED" => Some(FieldMode::Repeated),
            _ => None,
        }
    }

    /// Returns the canonical REST API spelling of this mode.
    pub fn as_wire(&self) -> &'static str {
        match self {
            FieldMode::Nullable => "NULLABLE",
            FieldMode::Required => "REQUIRED",
            FieldMode::Repeated => "REPEATED",
        }
    }
}

impl fmt::Display for FieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Returns whether a name is a legal BigQuery column name: a letter or
/// underscore followed by up to 127 letters, digits, or underscores.
pub fn is_valid_field_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_FIELD_NAME_LEN {
        return false;
    }

    let mut bytes = name.bytes();
    let first = bytes.next().expect("name is non-empty");
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return false;
    }

    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Validates a field name, producing a configuration error on failure.
pub(crate) fn validate_field_name(name: &str) -> SinkResult<()> {
    if !is_valid_field_name(name) {
        bail!(
            ErrorKind::InvalidFieldName,
            "Field name is not a valid BigQuery column name",
            name
        );
    }

    Ok(())
}

/// One named, typed, mode-qualified field of a table row.
///
/// A field of type [`FieldType::Record`] owns the nested [`RecordSchema`]
/// that describes its children.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    name: String,
    field_type: FieldType,
    mode: FieldMode,
    fields: Option<RecordSchema>,
}

impl FieldSchema {
    /// Creates a scalar (non-record) field.
    pub fn scalar(
        name: impl Into<String>,
        field_type: FieldType,
        mode: FieldMode,
    ) -> SinkResult<FieldSchema> {
        let name = name.into();
        validate_field_name(&name)?;

        if field_type == FieldType::Record {
            bail!(
                ErrorKind::ConfigError,
                "Record fields must carry a nested field list",
                name
            );
        }

        Ok(FieldSchema {
            name,
            field_type,
            mode,
            fields: None,
        })
    }

    /// Creates a record field owning the given nested schema.
    pub fn record(
        name: impl Into<String>,
        mode: FieldMode,
        fields: RecordSchema,
    ) -> SinkResult<FieldSchema> {
        let name = name.into();
        validate_field_name(&name)?;

        Ok(FieldSchema {
            name,
            field_type: FieldType::Record,
            mode,
            fields: Some(fields),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn mode(&self) -> FieldMode {
        self.mode
    }

    /// Returns the nested schema for record fields.
    pub fn nested(&self) -> Option<&RecordSchema> {
        self.fields.as_ref()
    }

    pub(crate) fn nested_mut(&mut self) -> Option<&mut RecordSchema> {
        self.fields.as_mut()
    }

    /// Applies the mode-aware coercion to one input value.
    ///
    /// An absent value yields an absent result for nullable fields, a warning
    /// plus an absent result for required fields (bad user data is not a
    /// system failure; the row is still produced), and an empty sequence for
    /// repeated fields. Present repeated values have each element coerced
    /// individually, dropping elements that coerce to absent.
    pub fn format(&self, value: Option<&Value>, is_load: bool) -> SinkResult<Option<Value>> {
        match self.mode {
            FieldMode::Nullable => match value {
                None => Ok(None),
                Some(value) => self.format_one(value, is_load),
            },
            FieldMode::Required => match value {
                None => {
                    warn!(
                        field = %self.name,
                        "required field has no value, omitting it from the row"
                    );
                    Ok(None)
                }
                Some(value) => self.format_one(value, is_load),
            },
            FieldMode::Repeated => {
                let Some(value) = value else {
                    return Ok(Some(Value::Array(Vec::new())));
                };

                let elements: Vec<&Value> = match value {
                    Value::Array(elements) => elements.iter().collect(),
                    single => vec![single],
                };

                let mut formatted = Vec::with_capacity(elements.len());
                for element in elements {
                    if let Some(element) = self.format_one(element, is_load)? {
                        formatted.push(element);
                    }
                }

                Ok(Some(Value::Array(formatted)))
            }
        }
    }

    /// Applies the type-specific coercion to a single value.
    ///
    /// The `is_load` flag selects the batch-load wire form where it differs
    /// from the streaming-insert wire form (currently only JSON columns: a
    /// load file carries embedded JSON verbatim, a streaming insert needs a
    /// string-typed field).
    pub fn format_one(&self, value: &Value, is_load: bool) -> SinkResult<Option<Value>> {
        if value.is_null() {
            return Ok(None);
        }

        let formatted = match self.field_type {
            FieldType::String | FieldType::Geography => Value::String(stringify(value)?),
            FieldType::Json => {
                if is_load {
                    value.clone()
                } else {
                    Value::String(serde_json::to_string(value)?)
                }
            }
            FieldType::Integer => Value::from(numeric::to_integer(value)?),
            FieldType::Float => Value::from(numeric::to_float(value)?),
            FieldType::Numeric | FieldType::BigNumeric => {
                Value::String(numeric::to_decimal_string(value)?)
            }
            FieldType::Boolean => Value::Bool(coerce_bool(value)),
            FieldType::Timestamp => match coerce_instant(value)? {
                Some(instant) => Value::String(instant.format(TIMESTAMP_FORMAT).to_string()),
                None => value.clone(),
            },
            FieldType::Date => match calendar_instant(value)? {
                Some(instant) => Value::String(instant.format(DATE_FORMAT).to_string()),
                None => value.clone(),
            },
            FieldType::DateTime => match calendar_instant(value)? {
                Some(instant) => Value::String(instant.format(DATETIME_FORMAT).to_string()),
                None => value.clone(),
            },
            FieldType::Time => match calendar_instant(value)? {
                Some(instant) => Value::String(instant.format(TIME_FORMAT).to_string()),
                None => value.clone(),
            },
            FieldType::Record => match (value, &self.fields) {
                (Value::Object(record), Some(nested)) => {
                    Value::Object(nested.format(record, is_load)?)
                }
                (other, Some(_)) => {
                    warn!(
                        field = %self.name,
                        "record field received a non-record value, passing it through"
                    );
                    other.clone()
                }
                (_, None) => {
                    return Err(sink_error!(
                        ErrorKind::ConfigError,
                        "Record field has no nested schema",
                        self.name
                    ));
                }
            },
        };

        Ok(Some(formatted))
    }
}

/// Converts a value to its string representation; composite values are
/// serialized to a compact JSON string.
fn stringify(value: &Value) -> SinkResult<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => serde_json::to_string(value)?,
        other => other.to_string(),
    })
}

/// Interprets a value as an instant for DATE/DATETIME/TIME columns.
///
/// Only actual numbers are time-valued here; strings pass through unchanged.
/// The numeric-looking-string rule is specific to TIMESTAMP columns.
fn calendar_instant(value: &Value) -> SinkResult<Option<chrono::DateTime<chrono::Utc>>> {
    match value {
        Value::Number(_) => coerce_instant(value),
        _ => Ok(None),
    }
}
