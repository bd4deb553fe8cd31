//! Macros for data-plane error handling.
//!
//! Provides convenience macros for creating and returning
//! [`crate::error::SinkError`] instances with reduced boilerplate.

/// Creates a [`crate::error::SinkError`] from error kind and description.
///
/// Accepts an optional dynamic detail (any `Display` value) as third
/// argument and an optional `source:` error.
#[macro_export]
macro_rules! sink_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::SinkError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::SinkError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::SinkError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::SinkError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Creates and returns a [`crate::error::SinkError`] from the current
/// function.
///
/// Combines error creation with early return for error conditions that
/// terminate execution immediately. Supports the same arguments as
/// [`sink_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::sink_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::sink_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::sink_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::sink_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
