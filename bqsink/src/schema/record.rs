use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SinkResult};
use crate::schema::field::{FieldMode, FieldSchema, FieldType, validate_field_name};

/// One entry of a declarative schema definition.
///
/// This is the configuration-facing shape: type and mode travel as strings
/// and are validated when the schema is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldDescriptor>>,
}

/// An insertion-ordered, name-keyed tree of [`FieldSchema`] describing one
/// table's row shape.
///
/// Built once at configuration time (or from a fetched table schema) and
/// immutable afterwards except for whole-schema replacement.
#[derive(Debug, Clone, Default)]
pub struct RecordSchema {
    fields: Vec<FieldSchema>,
    index: HashMap<String, usize>,
}

impl RecordSchema {
    pub fn new() -> RecordSchema {
        RecordSchema::default()
    }

    /// Builds a schema from an ordered list of field descriptors.
    ///
    /// Record-typed descriptors must carry a non-empty nested field list and
    /// unknown type or mode names fail; both are fatal configuration errors.
    pub fn load_schema(descriptors: &[FieldDescriptor]) -> SinkResult<RecordSchema> {
        let mut schema = RecordSchema::new();
        for descriptor in descriptors {
            let field = field_from_descriptor(descriptor)?;
            schema.add_field(field)?;
        }

        Ok(schema)
    }

    /// Registers a single scalar field, creating intermediate record fields
    /// for dotted names.
    ///
    /// `a.b` resolves (or creates) the record field `a` and registers `b`
    /// inside it. Re-registering an existing field is a configuration error,
    /// except when the existing field is a timestamp, which is tolerated
    /// silently so configs that redundantly declare the ingestion-time field
    /// keep loading.
    pub fn register_field(&mut self, name: &str, field_type: FieldType) -> SinkResult<()> {
        if let Some((head, rest)) = name.split_once('.') {
            validate_field_name(head)?;

            if !self.index.contains_key(head) {
                let nested = FieldSchema::record(head, FieldMode::Nullable, RecordSchema::new())?;
                self.push_field(nested);
            }

            let position = self.index[head];
            let parent = &mut self.fields[position];
            let Some(nested) = parent.nested_mut() else {
                bail!(
                    ErrorKind::DuplicateField,
                    "Field is already registered as a non-record type",
                    head
                );
            };

            return nested.register_field(rest, field_type);
        }

        validate_field_name(name)?;

        if field_type == FieldType::Record {
            bail!(
                ErrorKind::ConfigError,
                "Record fields cannot be registered by name, use a schema definition",
                name
            );
        }

        if let Some(existing) = self.field(name) {
            if existing.field_type() == FieldType::Timestamp {
                debug!(field = name, "field already registered as timestamp, ignoring");
                return Ok(());
            }

            bail!(
                ErrorKind::DuplicateField,
                "Field is already registered",
                name
            );
        }

        self.push_field(FieldSchema::scalar(name, field_type, FieldMode::Nullable)?);

        Ok(())
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.index.get(name).map(|position| &self.fields[*position])
    }

    /// Returns the fields in registration order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Formats one input record into a delivery-ready row.
    ///
    /// Keys with a nil value are skipped entirely. Keys with a matching field
    /// are coerced through [`FieldSchema::format`]; keys unknown to the
    /// schema are copied through unchanged (the schema is additive, not a
    /// strict filter).
    pub fn format(
        &self,
        record: &Map<String, Value>,
        is_load: bool,
    ) -> SinkResult<Map<String, Value>> {
        let mut row = Map::new();

        for (key, value) in record {
            if value.is_null() {
                continue;
            }

            match self.field(key) {
                Some(field) => {
                    if let Some(formatted) = field.format(Some(value), is_load)? {
                        row.insert(key.clone(), formatted);
                    }
                }
                None => {
                    row.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(row)
    }

    /// Adds a fully built field, rejecting duplicates.
    pub(crate) fn add_field(&mut self, field: FieldSchema) -> SinkResult<()> {
        if self.index.contains_key(field.name()) {
            bail!(
                ErrorKind::DuplicateField,
                "Field is already registered",
                field.name()
            );
        }

        self.push_field(field);

        Ok(())
    }

    fn push_field(&mut self, field: FieldSchema) {
        self.index.insert(field.name().to_string(), self.fields.len());
        self.fields.push(field);
    }
}

/// Builds one [`FieldSchema`] from its declarative descriptor.
fn field_from_descriptor(descriptor: &FieldDescriptor) -> SinkResult<FieldSchema> {
    let Some(field_type) = FieldType::parse(&descriptor.field_type) else {
        bail!(
            ErrorKind::UnknownFieldType,
            "Unknown field type in schema definition",
            format!("{}: {}", descriptor.name, descriptor.field_type)
        );
    };

    let mode = match descriptor.mode.as_deref() {
        Some(mode_name) => match FieldMode::parse(mode_name) {
            Some(mode) => mode,
            None => bail!(
                ErrorKind::ConfigError,
                "Unknown field mode in schema definition",
                format!("{}: {mode_name}", descriptor.name)
            ),
        },
        None => FieldMode::Nullable,
    };

    if field_type == FieldType::Record {
        let nested = match descriptor.fields.as_deref() {
            Some(children) if !children.is_empty() => RecordSchema::load_schema(children)?,
            _ => bail!(
                ErrorKind::ConfigError,
                "Record field requires a nested field list",
                descriptor.name.clone()
            ),
        };

        return FieldSchema::record(descriptor.name.clone(), mode, nested);
    }

    FieldSchema::scalar(descriptor.name.clone(), field_type, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptors(raw: Value) -> Vec<FieldDescriptor> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn load_schema_builds_nested_records() {
        let schema = RecordSchema::load_schema(&descriptors(json!([
            {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
            {"name": "payload", "type": "RECORD", "fields": [
                {"name": "kind", "type": "STRING"},
                {"name": "at", "type": "TIMESTAMP"},
            ]},
        ])))
        .unwrap();

        assert_eq!(schema.len(), 2);
        let payload = schema.field("payload").unwrap();
        assert_eq!(payload.field_type(), FieldType::Record);
        assert_eq!(payload.nested().unwrap().len(), 2);
    }

    #[test]
    fn load_schema_rejects_unknown_types_and_bare_records() {
        let err = RecordSchema::load_schema(&descriptors(json!([
            {"name": "x", "type": "TUPLE"},
        ])))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownFieldType);

        let err = RecordSchema::load_schema(&descriptors(json!([
            {"name": "x", "type": "RECORD"},
        ])))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn load_schema_rejects_duplicate_names() {
        let err = RecordSchema::load_schema(&descriptors(json!([
            {"name": "x", "type": "STRING"},
            {"name": "x", "type": "INTEGER"},
        ])))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateField);
    }

    #[test]
    fn dotted_registration_creates_intermediate_records() {
        let mut schema = RecordSchema::new();
        schema.register_field("meta.source.host", FieldType::String).unwrap();
        schema.register_field("meta.source.port", FieldType::Integer).unwrap();
        schema.register_field("meta.at", FieldType::Timestamp).unwrap();

        let meta = schema.field("meta").unwrap();
        assert_eq!(meta.field_type(), FieldType::Record);

        let source = meta.nested().unwrap().field("source").unwrap();
        assert_eq!(source.nested().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_registration_is_an_error_except_timestamps() {
        let mut schema = RecordSchema::new();
        schema.register_field("id", FieldType::Integer).unwrap();
        let err = schema.register_field("id", FieldType::String).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateField);

        // A field already registered as timestamp tolerates re-registration.
        schema.register_field("at", FieldType::Timestamp).unwrap();
        schema.register_field("at", FieldType::Timestamp).unwrap();
        schema.register_field("at", FieldType::String).unwrap();
        assert_eq!(schema.field("at").unwrap().field_type(), FieldType::Timestamp);
    }

    #[test]
    fn registering_through_a_scalar_fails() {
        let mut schema = RecordSchema::new();
        schema.register_field("id", FieldType::Integer).unwrap();
        let err = schema.register_field("id.sub", FieldType::String).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateField);
    }

    #[test]
    fn format_coerces_known_keys_and_passes_unknown_ones() {
        let schema = RecordSchema::load_schema(&descriptors(json!([
            {"name": "id", "type": "INTEGER"},
            {"name": "tags", "type": "STRING", "mode": "REPEATED"},
        ])))
        .unwrap();

        let record = json!({
            "id": "42",
            "tags": ["a", null, "b"],
            "extra": {"untouched": true},
            "skipped": null,
        });
        let row = schema
            .format(record.as_object().unwrap(), false)
            .unwrap();

        assert_eq!(Value::Object(row), json!({
            "id": 42,
            "tags": ["a", "b"],
            "extra": {"untouched": true},
        }));
    }

    #[test]
    fn format_recurses_into_records() {
        let schema = RecordSchema::load_schema(&descriptors(json!([
            {"name": "payload", "type": "RECORD", "fields": [
                {"name": "count", "type": "INTEGER"},
            ]},
        ])))
        .unwrap();

        let record = json!({"payload": {"count": "7", "other": "kept"}});
        let row = schema.format(record.as_object().unwrap(), false).unwrap();

        assert_eq!(
            Value::Object(row),
            json!({"payload": {"count": 7, "other": "kept"}})
        );
    }
}
