//! The gateway's error taxonomy (spec §7).
//!
//! Every error carries a canonical status-code family (mirroring HTTP
//! families), a stable machine code, a human message, optional structured
//! details, and a flag distinguishing operational (recoverable) errors from
//! programmatic (fatal) ones.

use serde::Serialize;
use thiserror::Error;

/// Broad classification of what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Validation,
    NotFound,
    RateLimit,
    Timeout,
    Connection,
    MessageDelivery,
    BackendService,
    Configuration,
    Database,
    ExternalService,
    ResourceExhaustion,
    SocketEvent,
}

impl ErrorKind {
    /// The HTTP status family this kind mirrors.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Authentication => 401,
            Self::Authorization => 403,
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::RateLimit => 429,
            Self::Timeout => 504,
            Self::Connection | Self::ExternalService | Self::BackendService => 502,
            Self::MessageDelivery | Self::SocketEvent => 500,
            Self::ResourceExhaustion => 503,
            Self::Configuration | Self::Database => 500,
        }
    }

    /// Whether this kind of error is recoverable (operational) or should be
    /// treated as fatal (programmatic) and terminate the process after
    /// logging, per spec §7.
    #[must_use]
    pub fn is_operational(self) -> bool {
        !matches!(self, Self::Configuration)
    }
}

/// The gateway's canonical error type.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GatewayError {
    #[must_use]
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.kind.is_operational()
    }

    /// Shape this error for a socket `error` envelope: `{event, message, code}`.
    #[must_use]
    pub fn as_socket_error(&self, event: &str) -> serde_json::Value {
        serde_json::json!({
            "event": event,
            "message": self.message,
            "code": self.code,
        })
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Trait for error types that can be constructed from a plain message string.
///
/// Mirrors the teacher's `FromMessage`/`impl_context!` ergonomics so every
/// crate gets `.context()`/`.with_context()` without re-deriving it.
pub trait FromMessage: Sized {
    fn from_message(kind: ErrorKind, message: String) -> Self;
}

impl FromMessage for GatewayError {
    fn from_message(kind: ErrorKind, message: String) -> Self {
        Self::new(kind, "internal-error", message)
    }
}

/// Generates `.context()`/`.with_context()` on `Result<T, E>` and
/// `Option<T>`, producing a `GatewayError` of the given kind.
#[macro_export]
macro_rules! context_ext {
    () => {
        pub trait Context<T> {
            fn context(self, kind: $crate::error::ErrorKind, context: impl Into<String>) -> $crate::error::Result<T>;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, kind: $crate::error::ErrorKind, context: impl Into<String>) -> $crate::error::Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <$crate::error::GatewayError as $crate::error::FromMessage>::from_message(
                        kind,
                        format!("{ctx}: {source}"),
                    )
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, kind: $crate::error::ErrorKind, context: impl Into<String>) -> $crate::error::Result<T> {
                self.ok_or_else(|| {
                    <$crate::error::GatewayError as $crate::error::FromMessage>::from_message(
                        kind,
                        context.into(),
                    )
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_families_match_spec() {
        assert_eq!(ErrorKind::Authentication.status_code(), 401);
        assert_eq!(ErrorKind::Validation.status_code(), 400);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::RateLimit.status_code(), 429);
    }

    #[test]
    fn configuration_errors_are_programmatic() {
        assert!(!ErrorKind::Configuration.is_operational());
        assert!(ErrorKind::Validation.is_operational());
    }

    #[test]
    fn socket_error_shape() {
        let err = GatewayError::new(ErrorKind::Validation, "missing-token", "token is required");
        let shape = err.as_socket_error("authenticate");
        assert_eq!(shape["event"], "authenticate");
        assert_eq!(shape["code"], "missing-token");
    }
}
