//! Thin typed client for the BigQuery REST v2 endpoints used by the
//! data-plane: table management, streaming inserts, and load jobs.
//!
//! Every call maps a failed response to a [`SinkError`] carrying the
//! machine-readable reason code extracted from the error body, which is what
//! the write orchestrator classifies on.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use reqwest::{StatusCode, header};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::clients::Authenticator;
use crate::clients::models::{
    ErrorResponse, InsertAllRequest, InsertAllResponse, Job, JobReference, Table, TableReference,
};
use crate::error::{ErrorKind, SinkError, SinkResult};
use crate::upload::{UploadBody, multipart_content_type};

/// Default REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
/// Default media-upload endpoint for load-job bodies.
pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";

/// Chunk granularity when streaming an upload body.
const UPLOAD_STREAM_CHUNK: usize = 64 * 1024;

/// Client for the warehouse REST API.
#[derive(Debug, Clone)]
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    upload_base_url: String,
    authenticator: Arc<dyn Authenticator>,
}

impl BigQueryClient {
    /// Creates a client with the given credential capability and per-request
    /// timeout.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        request_timeout: Duration,
    ) -> SinkResult<BigQueryClient> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(BigQueryClient {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            upload_base_url: DEFAULT_UPLOAD_BASE_URL.to_string(),
            authenticator,
        })
    }

    /// Overrides the service endpoints. Used for emulators and tests.
    pub fn with_base_urls(
        mut self,
        base_url: impl Into<String>,
        upload_base_url: impl Into<String>,
    ) -> BigQueryClient {
        self.base_url = base_url.into();
        self.upload_base_url = upload_base_url.into();
        self
    }

    /// Fetches a table resource; the caller inspects `schema` or existence.
    pub async fn get_table(&self, table: &TableReference) -> SinkResult<Table> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.base_url, table.project_id, table.dataset_id, table.table_id
        );

        debug!(table = %table, "fetching table");

        self.send(self.http.get(url)).await
    }

    /// Creates a table.
    pub async fn insert_table(&self, table: &Table) -> SinkResult<Table> {
        let reference = &table.table_reference;
        let url = format!(
            "{}/projects/{}/datasets/{}/tables",
            self.base_url, reference.project_id, reference.dataset_id
        );

        debug!(table = %reference, "creating table");

        self.send(self.http.post(url).json(table)).await
    }

    /// Issues one streaming-insert request.
    pub async fn insert_all(
        &self,
        table: &TableReference,
        request: &InsertAllRequest,
    ) -> SinkResult<InsertAllResponse> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url, table.project_id, table.dataset_id, table.table_id
        );

        debug!(table = %table, rows = request.rows.len(), "streaming rows");

        self.send(self.http.post(url).json(request)).await
    }

    /// Submits a load job, streaming the multipart body without buffering it
    /// whole.
    pub async fn insert_load_job<S>(
        &self,
        project_id: &str,
        body: UploadBody<S>,
    ) -> SinkResult<Job>
    where
        S: Read + Send + 'static,
    {
        let url = format!("{}/projects/{}/jobs", self.upload_base_url, project_id);
        let total_len = body.total_len();

        debug!(project_id, body_bytes = total_len, "submitting load job");

        let request = self
            .http
            .post(url)
            .query(&[("uploadType", "multipart")])
            .header(header::CONTENT_TYPE, multipart_content_type())
            .header(header::CONTENT_LENGTH, total_len)
            .body(reqwest::Body::wrap_stream(stream::iter(
                body.into_chunks(UPLOAD_STREAM_CHUNK),
            )));

        self.send(request).await
    }

    /// Fetches the current state of a job.
    pub async fn get_job(&self, job: &JobReference) -> SinkResult<Job> {
        let url = format!(
            "{}/projects/{}/jobs/{}",
            self.base_url, job.project_id, job.job_id
        );

        let request = match &job.location {
            Some(location) => self.http.get(url).query(&[("location", location)]),
            None => self.http.get(url),
        };

        self.send(request).await
    }

    /// Attaches authorization, sends, and decodes one request.
    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> SinkResult<T> {
        let token = self.authenticator.access_token().await?;
        let response = request
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            )
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            // A stale credential must not be reused on the next attempt.
            warn!("authentication rejected, invalidating cached credential");
            self.authenticator.invalidate();
        }

        Err(classify_response(status, &body))
    }
}

/// Builds a [`SinkError`] from a non-success response, extracting the reason
/// code from the structured error body when one is present.
fn classify_response(status: StatusCode, body: &str) -> SinkError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let (message, reason) = match parsed {
        Some(envelope) => {
            let reason = envelope
                .error
                .errors
                .first()
                .and_then(|error| error.reason.clone());
            (envelope.error.message, reason)
        }
        None => (body.trim().to_string(), None),
    };

    let kind = if status == StatusCode::UNAUTHORIZED {
        ErrorKind::AuthenticationError
    } else if status.is_client_error() {
        ErrorKind::ClientError
    } else {
        ErrorKind::ServerError
    };

    let error = SinkError::from((
        kind,
        "BigQuery request rejected",
        format!("HTTP {}: {message}", status.as_u16()),
    ));

    match reason {
        Some(reason) => error.with_reason(reason),
        None => error,
    }
}

/// Returns whether an error is the service's not-found response.
pub fn is_not_found(error: &SinkError) -> bool {
    error.reason() == Some("notFound")
        || error
            .detail()
            .is_some_and(|detail| detail.starts_with("HTTP 404"))
}

/// Returns whether an error is an HTTP 409 conflict.
pub fn is_conflict(error: &SinkError) -> bool {
    error.reason() == Some("duplicate")
        || error
            .detail()
            .is_some_and(|detail| detail.starts_with("HTTP 409"))
}

/// Returns whether an error is the idempotent-create conflict: HTTP 409 with
/// the service's "Already Exists" message.
pub fn is_already_exists_conflict(error: &SinkError) -> bool {
    is_conflict(error) && error.detail().is_some_and(|detail| detail.contains("Already Exists"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_error(status: u16, reason: &str, message: &str) -> String {
        format!(
            r#"{{"error": {{"code": {status}, "message": "{message}", "errors": [{{"reason": "{reason}", "message": "{message}"}}]}}}}"#
        )
    }

    #[test]
    fn not_found_responses_carry_the_reason() {
        let error = classify_response(
            StatusCode::NOT_FOUND,
            &service_error(404, "notFound", "Not Found: Table acme:events.events"),
        );

        assert_eq!(error.kind(), ErrorKind::ClientError);
        assert_eq!(error.reason(), Some("notFound"));
        assert!(is_not_found(&error));
        assert!(!error.is_retryable());
    }

    #[test]
    fn conflicts_detect_the_already_exists_pattern() {
        let error = classify_response(
            StatusCode::CONFLICT,
            &service_error(409, "duplicate", "Already Exists: Table acme:events.events"),
        );

        assert!(is_conflict(&error));
        assert!(is_already_exists_conflict(&error));
        assert!(!error.is_retryable());

        let other_conflict = classify_response(
            StatusCode::CONFLICT,
            &service_error(409, "duplicate", "Already Exists: Job acme:job_1"),
        );
        assert!(is_already_exists_conflict(&other_conflict));
    }

    #[test]
    fn server_errors_classify_retryable() {
        let error = classify_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &service_error(500, "backendError", "Backend error"),
        );

        assert_eq!(error.kind(), ErrorKind::ServerError);
        assert_eq!(error.reason(), Some("backendError"));
        assert!(error.is_retryable());
    }

    #[test]
    fn rate_limits_are_retryable_client_errors() {
        let error = classify_response(
            StatusCode::FORBIDDEN,
            &service_error(403, "rateLimitExceeded", "Exceeded rate limits"),
        );

        assert_eq!(error.kind(), ErrorKind::ClientError);
        assert!(error.is_retryable());
    }

    #[test]
    fn unauthorized_maps_to_authentication_error() {
        let error = classify_response(
            StatusCode::UNAUTHORIZED,
            &service_error(401, "authError", "Invalid credentials"),
        );

        assert_eq!(error.kind(), ErrorKind::AuthenticationError);
        assert!(!error.is_retryable());
    }

    #[test]
    fn unstructured_bodies_still_classify_by_status() {
        let error = classify_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");

        assert_eq!(error.kind(), ErrorKind::ServerError);
        assert_eq!(error.reason(), None);
        assert!(error.is_retryable());
    }
}
