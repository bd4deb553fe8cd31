//! Error types and result definitions for the ingestion data-plane.
//!
//! Provides a single crate-wide error type with classification metadata. A
//! [`SinkError`] carries an [`ErrorKind`], a static description, optional
//! dynamic detail, the machine-readable BigQuery *reason* code when one was
//! returned by the service, and captured diagnostic context (callsite and
//! backtrace). The reason code is what drives retry-vs-escalate decisions in
//! the write path.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for data-plane operations using [`SinkError`].
pub type SinkResult<T> = Result<T, SinkError>;

/// Reason codes that identify transient remote failures.
///
/// A job or row failure carrying one of these reasons is safe to requeue and
/// retry; any other reason requires escalation (redelivery or a secondary
/// destination) instead.
const RETRYABLE_REASONS: &[&str] = &[
    "backendError",
    "internalError",
    "rateLimitExceeded",
    "quotaExceeded",
    "timeout",
];

/// Returns whether a BigQuery reason code identifies a transient failure.
pub fn is_retryable_reason(reason: &str) -> bool {
    RETRYABLE_REASONS.contains(&reason)
}

/// Specific categories of errors that can occur in the ingestion data-plane.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration errors, raised at setup and never retried.
    ConfigError,
    InvalidFieldName,
    UnknownFieldType,
    DuplicateField,

    // Remote service errors.
    ClientError,
    ServerError,
    AuthenticationError,
    TableMissing,
    /// The destination table was just auto-created and is not insert-ready
    /// yet; the payload must be retried on a later cycle.
    TableNotReady,
    JobFailed,

    // Data and transformation errors.
    ConversionError,
    InvalidData,
    SerializationError,
    DeserializationError,

    // Transport errors.
    IoError,

    Unknown,
}

/// Detailed payload stored inside a [`SinkError`].
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    reason: Option<String>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for ingestion data-plane operations.
#[derive(Debug, Clone)]
pub struct SinkError {
    payload: ErrorPayload,
}

impl SinkError {
    /// Creates a [`SinkError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SinkError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                reason: None,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            },
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the BigQuery reason code attached to this error, if any.
    pub fn reason(&self) -> Option<&str> {
        self.payload.reason.as_deref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Attaches a machine-readable reason code and returns the modified
    /// instance.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.payload.reason = Some(reason.into());
        self
    }

    /// Attaches an originating [`error::Error`] and returns the modified
    /// instance. The stored source is preserved across clones and exposed via
    /// [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Returns whether the failure is safe to retry.
    ///
    /// When the remote service supplied a reason code, the reason decides.
    /// Without a reason, server-side and transport failures are considered
    /// transient, as is the table-just-created signal; everything else
    /// requires escalation.
    pub fn is_retryable(&self) -> bool {
        match self.reason() {
            Some(reason) => is_retryable_reason(reason),
            None => matches!(
                self.kind(),
                ErrorKind::ServerError | ErrorKind::IoError | ErrorKind::TableNotReady
            ),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let payload = &self.payload;
        let location = payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        if let Some(reason) = payload.reason.as_deref() {
            write!(f, "\n  Reason: {reason}")?;
        }
        if let Some(detail) = payload.detail.as_deref() {
            write!(f, "\n  Detail: {detail}")?;
        }

        Ok(())
    }
}

impl error::Error for SinkError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

impl PartialEq for SinkError {
    fn eq(&self, other: &SinkError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

/// Creates a [`SinkError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SinkError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SinkError {
        SinkError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`SinkError`] from an error kind, static description, and
/// dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SinkError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SinkError {
        SinkError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`SinkError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for SinkError {
    #[track_caller]
    fn from(err: std::io::Error) -> SinkError {
        let detail = err.to_string();
        let source = Arc::new(err);
        SinkError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`SinkError`] with the appropriate
/// error kind based on the error category.
impl From<serde_json::Error> for SinkError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SinkError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        SinkError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`chrono::ParseError`] to [`SinkError`] with
/// [`ErrorKind::ConversionError`].
impl From<chrono::ParseError> for SinkError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> SinkError {
        let detail = err.to_string();
        let source = Arc::new(err);
        SinkError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Datetime parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`std::num::ParseIntError`] to [`SinkError`] with
/// [`ErrorKind::ConversionError`].
impl From<std::num::ParseIntError> for SinkError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> SinkError {
        let detail = err.to_string();
        let source = Arc::new(err);
        SinkError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Integer parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`std::num::ParseFloatError`] to [`SinkError`] with
/// [`ErrorKind::ConversionError`].
impl From<std::num::ParseFloatError> for SinkError {
    #[track_caller]
    fn from(err: std::num::ParseFloatError) -> SinkError {
        let detail = err.to_string();
        let source = Arc::new(err);
        SinkError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Float parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`bigdecimal::ParseBigDecimalError`] to [`SinkError`] with
/// [`ErrorKind::ConversionError`].
impl From<bigdecimal::ParseBigDecimalError> for SinkError {
    #[track_caller]
    fn from(err: bigdecimal::ParseBigDecimalError) -> SinkError {
        let detail = err.to_string();
        let source = Arc::new(err);
        SinkError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Decimal parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`reqwest::Error`] to [`SinkError`].
///
/// Request timeouts are tagged with the `timeout` reason so they classify as
/// retryable; connectivity failures map to [`ErrorKind::IoError`].
impl From<reqwest::Error> for SinkError {
    #[track_caller]
    fn from(err: reqwest::Error) -> SinkError {
        let timed_out = err.is_timeout();
        let detail = err.to_string();
        let source = Arc::new(err);
        let error = SinkError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("HTTP request failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        );

        if timed_out {
            error.with_reason("timeout")
        } else {
            error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_classification_follows_the_retryable_list() {
        assert!(is_retryable_reason("backendError"));
        assert!(is_retryable_reason("internalError"));
        assert!(is_retryable_reason("rateLimitExceeded"));
        assert!(is_retryable_reason("quotaExceeded"));
        assert!(is_retryable_reason("timeout"));

        assert!(!is_retryable_reason("invalid"));
        assert!(!is_retryable_reason("notFound"));
        assert!(!is_retryable_reason("duplicate"));
        assert!(!is_retryable_reason("stopped"));
    }

    #[test]
    fn reason_takes_precedence_over_kind() {
        let err = SinkError::from((ErrorKind::ServerError, "backend hiccup"));
        assert!(err.is_retryable());

        let err =
            SinkError::from((ErrorKind::ServerError, "rejected payload")).with_reason("invalid");
        assert!(!err.is_retryable());

        let err = SinkError::from((ErrorKind::ClientError, "throttled"))
            .with_reason("rateLimitExceeded");
        assert!(err.is_retryable());
    }

    #[test]
    fn reasonless_kinds_classify_by_category() {
        assert!(SinkError::from((ErrorKind::IoError, "connection reset")).is_retryable());
        assert!(SinkError::from((ErrorKind::TableNotReady, "just created")).is_retryable());
        assert!(!SinkError::from((ErrorKind::ClientError, "bad request")).is_retryable());
        assert!(!SinkError::from((ErrorKind::ConfigError, "bad config")).is_retryable());
        assert!(!SinkError::from((ErrorKind::AuthenticationError, "expired")).is_retryable());
    }

    #[test]
    fn display_includes_reason_and_detail() {
        let err = SinkError::from((ErrorKind::JobFailed, "load job failed", "quota blown"))
            .with_reason("quotaExceeded");
        let rendered = err.to_string();

        assert!(rendered.contains("JobFailed"));
        assert!(rendered.contains("load job failed"));
        assert!(rendered.contains("Reason: quotaExceeded"));
        assert!(rendered.contains("Detail: quota blown"));
    }
}
