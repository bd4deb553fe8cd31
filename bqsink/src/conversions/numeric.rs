use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, SinkResult};

/// Truncates a numeric value or numeric string to a signed 64-bit integer.
pub fn to_integer(value: &Value) -> SinkResult<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64() {
                Ok(f.trunc() as i64)
            } else {
                bail!(
                    ErrorKind::ConversionError,
                    "Integer value out of range",
                    n
                )
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Ok(i)
            } else if let Ok(f) = trimmed.parse::<f64>() {
                Ok(f.trunc() as i64)
            } else {
                bail!(
                    ErrorKind::ConversionError,
                    "Value is not convertible to an integer",
                    s
                )
            }
        }
        other => bail!(
            ErrorKind::ConversionError,
            "Value is not convertible to an integer",
            other
        ),
    }
}

/// Converts a numeric value or numeric string to double precision.
pub fn to_float(value: &Value) -> SinkResult<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            crate::sink_error!(ErrorKind::ConversionError, "Float value out of range", n)
        }),
        Value::String(s) => {
            let parsed = s.trim().parse::<f64>()?;
            Ok(parsed)
        }
        other => bail!(
            ErrorKind::ConversionError,
            "Value is not convertible to a float",
            other
        ),
    }
}

/// Converts a numeric value or numeric string to its canonical decimal
/// string representation.
///
/// The decimal digits travel as text the whole way, so a NUMERIC or
/// BIGNUMERIC value never passes through a binary double and never loses
/// precision.
pub fn to_decimal_string(value: &Value) -> SinkResult<String> {
    let literal = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => bail!(
            ErrorKind::ConversionError,
            "Value is not convertible to a decimal",
            other
        ),
    };

    let decimal = BigDecimal::from_str(&literal)?;
    Ok(decimal.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_truncate() {
        assert_eq!(to_integer(&json!(42)).unwrap(), 42);
        assert_eq!(to_integer(&json!(7.9)).unwrap(), 7);
        assert_eq!(to_integer(&json!(-7.9)).unwrap(), -7);
        assert_eq!(to_integer(&json!("42")).unwrap(), 42);
        assert_eq!(to_integer(&json!("123.45")).unwrap(), 123);
    }

    #[test]
    fn non_numeric_integer_input_fails() {
        assert!(to_integer(&json!("forty-two")).is_err());
        assert!(to_integer(&json!(true)).is_err());
    }

    #[test]
    fn floats_convert() {
        assert_eq!(to_float(&json!(2.5)).unwrap(), 2.5);
        assert_eq!(to_float(&json!("2.5")).unwrap(), 2.5);
        assert_eq!(to_float(&json!(3)).unwrap(), 3.0);
        assert!(to_float(&json!([])).is_err());
    }

    #[test]
    fn decimal_strings_keep_every_digit() {
        // More fractional digits than a double can represent.
        let input = "123456789012345.6789";
        assert_eq!(to_decimal_string(&json!(input)).unwrap(), input);

        let wide = "99999999999999999999999999999.999999999";
        assert_eq!(to_decimal_string(&json!(wide)).unwrap(), wide);
    }

    #[test]
    fn decimal_accepts_numbers_and_rejects_garbage() {
        assert_eq!(to_decimal_string(&json!(42)).unwrap(), "42");
        assert_eq!(to_decimal_string(&json!("-0.5")).unwrap(), "-0.5");
        assert!(to_decimal_string(&json!("not a number")).is_err());
    }
}
