//! The typed schema model.
//!
//! Defines how an arbitrary nested input value is validated and coerced into
//! the warehouse's wire representation: field types and modes, the owning
//! record tree, declarative schema loading and dotted-path registration, and
//! the shared fetched-schema cache.

mod cache;
mod field;
mod record;

pub use cache::SchemaCache;
pub use field::{FieldMode, FieldSchema, FieldType, is_valid_field_name};
pub use record::{FieldDescriptor, RecordSchema};
