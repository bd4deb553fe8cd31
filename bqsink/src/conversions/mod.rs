//! Scalar coercion helpers used by the schema model.
//!
//! Each submodule converts arbitrary JSON input values into one family of
//! BigQuery wire representations. The schema model decides *which* coercion
//! applies; these helpers decide *how* a value gets there.

mod bool;
pub mod numeric;
pub mod time;

pub use bool::coerce_bool;
