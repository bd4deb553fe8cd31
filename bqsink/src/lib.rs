//! Ingestion data-plane for a columnar warehouse.
//!
//! Takes semi-structured records and delivers them to BigQuery over the REST
//! API, either as low-latency streaming row inserts or as batch load jobs
//! built from an incrementally encoded multipart upload body.
//!
//! The crate splits into pure data transformations and one networked
//! component:
//!
//! - [`schema`]: typed field definitions and the coercion of arbitrary
//!   nested input into wire form.
//! - [`format`]: applies a schema to one record, merging host metadata and
//!   rewriting key names.
//! - [`upload`]: the cursor-based multipart body encoder for load jobs.
//! - [`writer`]: the write orchestrator handling streaming inserts, load-job
//!   submission and polling, retry classification, and table rotation.
//! - [`clients`]: the REST client and wire models underneath the writer.
//!
//! Buffering, flush scheduling, and credential refresh belong to the host;
//! the latter is abstracted as [`clients::Authenticator`].

pub mod clients;
pub mod config;
pub mod conversions;
pub mod error;
pub mod format;
mod macros;
pub mod schema;
pub mod upload;
pub mod writer;
