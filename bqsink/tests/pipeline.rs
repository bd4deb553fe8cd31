//! Offline end-to-end coverage of the format → encode pipeline: raw records
//! are coerced through a schema, serialized to a newline-delimited payload,
//! and framed into the multipart upload body a load job submits.

use std::sync::Arc;

use bqsink::clients::models::{JobReference, TableReference, table_schema_from};
use bqsink::format::{FormatterOptions, RecordFormatter, RecordMeta};
use bqsink::schema::{FieldDescriptor, RecordSchema};
use bqsink::upload::UploadBody;
use chrono::DateTime;
use serde_json::{Map, Value, json};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn event_schema() -> Arc<RecordSchema> {
    let descriptors: Vec<FieldDescriptor> = serde_json::from_value(json!([
        {"name": "time", "type": "TIMESTAMP"},
        {"name": "tag", "type": "STRING"},
        {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
        {"name": "amount", "type": "NUMERIC"},
        {"name": "labels", "type": "STRING", "mode": "REPEATED"},
        {"name": "attrs", "type": "JSON"},
        {"name": "origin", "type": "RECORD", "fields": [
            {"name": "host", "type": "STRING"},
            {"name": "port", "type": "INTEGER"},
        ]},
    ]))
    .unwrap();

    Arc::new(RecordSchema::load_schema(&descriptors).unwrap())
}

fn formatter() -> RecordFormatter {
    RecordFormatter::new(
        event_schema(),
        FormatterOptions {
            key_rewrites: vec![("-".to_string(), "_".to_string())],
            sanitize_keys: true,
            timestamp_field: Some("time".to_string()),
            tag_field: Some("tag".to_string()),
        },
    )
    .unwrap()
}

fn meta() -> RecordMeta {
    RecordMeta {
        timestamp: DateTime::from_timestamp(1_596_214_800, 0).unwrap(),
        tag: "app.payments".to_string(),
    }
}

fn record(id: u64) -> Map<String, Value> {
    json!({
        "id": id.to_string(),
        "amount": "123456789012345.6789",
        "labels": ["a", null, "b"],
        "attrs": {"colour": "green"},
        "origin": {"host": "web-1", "port": "8080"},
    })
    .as_object()
    .unwrap()
    .clone()
}

#[test]
fn records_format_into_warehouse_ready_rows() {
    init_tracing();

    let row = formatter().format(&record(42), &meta(), false).unwrap();

    assert_eq!(row["id"], json!(42));
    assert_eq!(row["amount"], json!("123456789012345.6789"));
    assert_eq!(row["labels"], json!(["a", "b"]));
    assert_eq!(row["time"], json!("2020-07-31 17:00:00.000000+00:00"));
    assert_eq!(row["tag"], json!("app.payments"));
    assert_eq!(row["origin"], json!({"host": "web-1", "port": 8080}));
    // Streaming inserts need JSON columns as strings.
    assert_eq!(row["attrs"], json!(r#"{"colour":"green"}"#));
}

#[test]
fn load_rows_keep_embedded_json() {
    init_tracing();

    let row = formatter().format(&record(42), &meta(), true).unwrap();
    assert_eq!(row["attrs"], json!({"colour": "green"}));
}

#[test]
fn formatted_rows_round_trip_through_the_upload_body() {
    init_tracing();

    let formatter = formatter();
    let mut payload = Vec::new();
    for id in [1u64, 2, 3] {
        let row = formatter.format(&record(id), &meta(), true).unwrap();
        serde_json::to_writer(&mut payload, &Value::Object(row)).unwrap();
        payload.push(b'\n');
    }

    let table = TableReference::new("acme", "payments", "events_20200731");
    let job_reference = JobReference {
        project_id: "acme".to_string(),
        job_id: "bqsink_job_pipeline".to_string(),
        location: None,
    };
    let schema = table_schema_from(&event_schema());

    // Read the body in small bounded chunks, as a transport would.
    let mut body = UploadBody::for_load_bytes(
        &table,
        Some(schema),
        Some(job_reference),
        payload.clone(),
    )
    .unwrap();
    let declared_len = body.total_len();

    let mut assembled = Vec::new();
    loop {
        let chunk = body.read(Some(7)).unwrap();
        if chunk.is_empty() {
            break;
        }
        assembled.extend_from_slice(&chunk);
    }

    assert_eq!(assembled.len() as u64, declared_len);

    // A rewound unbounded read reproduces the same bytes.
    body.rewind();
    let replay = body.read(None).unwrap();
    assert_eq!(replay.to_vec(), assembled);

    // The metadata part carries the destination and the pinned job id.
    let text = String::from_utf8(assembled).unwrap();
    let metadata_line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("metadata JSON part");
    let metadata: Value = serde_json::from_str(metadata_line).unwrap();

    assert_eq!(metadata["jobReference"]["jobId"], json!("bqsink_job_pipeline"));
    assert_eq!(
        metadata["configuration"]["load"]["destinationTable"]["tableId"],
        json!("events_20200731")
    );
    assert_eq!(
        metadata["configuration"]["load"]["sourceFormat"],
        json!("NEWLINE_DELIMITED_JSON")
    );
    assert_eq!(
        metadata["configuration"]["load"]["schema"]["fields"][2]["name"],
        json!("id")
    );

    // The payload region survives byte-for-byte.
    let payload_text = String::from_utf8(payload).unwrap();
    assert!(text.contains(&payload_text));

    // And each payload line is still a valid coerced row.
    for line in payload_text.lines() {
        let row: Value = serde_json::from_str(line).unwrap();
        assert_eq!(row["amount"], json!("123456789012345.6789"));
        assert_eq!(row["attrs"], json!({"colour": "green"}));
    }
}
