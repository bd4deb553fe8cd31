use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, SinkResult};

/// Wire format for TIMESTAMP columns: microsecond precision with an explicit
/// UTC offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";
/// Wire format for DATE columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Wire format for DATETIME columns: microsecond precision, no offset.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
/// Wire format for TIME columns.
pub const TIME_FORMAT: &str = "%H:%M:%S%.6f";

/// Builds an instant from whole epoch seconds.
pub fn from_epoch_seconds(secs: i64) -> SinkResult<DateTime<Utc>> {
    match DateTime::from_timestamp(secs, 0) {
        Some(instant) => Ok(instant),
        None => bail!(
            ErrorKind::ConversionError,
            "Epoch seconds out of range",
            secs
        ),
    }
}

/// Builds an instant from fractional epoch seconds, keeping microsecond
/// precision.
pub fn from_epoch_fractional(secs: f64) -> SinkResult<DateTime<Utc>> {
    if !secs.is_finite() {
        bail!(
            ErrorKind::ConversionError,
            "Epoch value is not finite",
            secs
        );
    }

    let micros = (secs * 1_000_000.0).round() as i64;
    match DateTime::from_timestamp_micros(micros) {
        Some(instant) => Ok(instant),
        None => bail!(
            ErrorKind::ConversionError,
            "Epoch seconds out of range",
            secs
        ),
    }
}

/// Interprets a value as an instant when it is time-valued.
///
/// Numbers are epoch seconds (fractional when they carry a fraction). A
/// numeric-looking string without a decimal point is an integer epoch value;
/// one with a decimal point is a fractional epoch value. Everything else is
/// not time-valued and the caller passes it through unchanged.
pub fn coerce_instant(value: &Value) -> SinkResult<Option<DateTime<Utc>>> {
    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                from_epoch_seconds(secs).map(Some)
            } else if let Some(secs) = n.as_f64() {
                from_epoch_fractional(secs).map(Some)
            } else {
                bail!(ErrorKind::ConversionError, "Epoch value out of range", n)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if is_integer_literal(trimmed) {
                from_epoch_seconds(trimmed.parse::<i64>()?).map(Some)
            } else if is_fractional_literal(trimmed) {
                from_epoch_fractional(trimmed.parse::<f64>()?).map(Some)
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}

/// Returns whether a string is an optionally signed run of digits.
fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Returns whether a string is an optionally signed decimal literal with a
/// single decimal point.
fn is_fractional_literal(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    match unsigned.split_once('.') {
        Some((whole, frac)) => {
            !whole.is_empty()
                && !frac.is_empty()
                && whole.bytes().all(|b| b.is_ascii_digit())
                && frac.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
