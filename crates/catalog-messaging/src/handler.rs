//! Message handlers and the failures they report.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use catalog_core::error::DomainError;
use thiserror::Error;

use crate::message::MessageContext;

/// Closed taxonomy of handler failures. Classification only ever looks at
/// this discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The payload is malformed or breaks a business rule.
    Validation,
    /// The payload is well formed but can never be processed.
    Unprocessable,
    /// A dependency (database, network, cache) failed.
    Infrastructure,
    /// The handler did not finish within its deadline.
    Timeout,
    /// Anything else, including panics.
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Validation,
        ErrorKind::Unprocessable,
        ErrorKind::Infrastructure,
        ErrorKind::Timeout,
        ErrorKind::Unknown,
    ];

    /// Stable lowercase name, used in headers and configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Unprocessable => "unprocessable",
            Self::Infrastructure => "infrastructure",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown error kind name.
#[derive(Debug, Error)]
#[error("unknown error kind: {0}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownErrorKind(name.to_owned()))
    }
}

/// A failure reported by a [`MessageHandler`].
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Payload or business rule violation.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Permanently unprocessable message.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, message)
    }

    /// Dependency failure.
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Infrastructure, message)
    }

    /// Deadline exceeded.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Unclassified failure.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// The failure kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<DomainError> for HandlerError {
    fn from(err: DomainError) -> Self {
        let kind = match &err {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::Unprocessable(_)
            | DomainError::AggregateNotFound(_)
            | DomainError::InvalidState(_) => ErrorKind::Unprocessable,
            DomainError::ConcurrencyConflict { .. } | DomainError::Infrastructure(_) => {
                ErrorKind::Infrastructure
            }
        };
        Self::new(kind, err.to_string())
    }
}

/// Processes the payload of a consumed message.
///
/// A returned error and a panic are treated the same way by the runtime.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message.
    async fn handle(&self, payload: &[u8], ctx: &MessageContext) -> Result<(), HandlerError>;
}

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Adapts a closure returning a boxed future into a [`MessageHandler`].
///
/// The closure receives owned copies of the payload and context.
pub struct FnMessageHandler<F> {
    f: F,
}

impl<F> FnMessageHandler<F>
where
    F: Fn(Vec<u8>, MessageContext) -> BoxedHandlerFuture + Send + Sync,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> MessageHandler for FnMessageHandler<F>
where
    F: Fn(Vec<u8>, MessageContext) -> BoxedHandlerFuture + Send + Sync,
{
    async fn handle(&self, payload: &[u8], ctx: &MessageContext) -> Result<(), HandlerError> {
        (self.f)(payload.to_vec(), ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_parses_case_insensitively() {
        assert_eq!("Validation".parse::<ErrorKind>().unwrap(), ErrorKind::Validation);
        assert_eq!(" timeout ".parse::<ErrorKind>().unwrap(), ErrorKind::Timeout);
        assert!("fatal".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_error_kind_names_round_trip_through_display() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.to_string().parse::<ErrorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_domain_errors_map_to_handler_kinds() {
        // Arrange
        let validation = DomainError::Validation("price must be positive".into());
        let conflict = DomainError::ConcurrencyConflict {
            aggregate_id: uuid::Uuid::nil(),
            expected: 1,
            actual: 2,
        };
        let state = DomainError::InvalidState("already discontinued".into());

        // Act
        let validation = HandlerError::from(validation);
        let conflict = HandlerError::from(conflict);
        let state = HandlerError::from(state);

        // Assert
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert_eq!(conflict.kind(), ErrorKind::Infrastructure);
        assert_eq!(state.kind(), ErrorKind::Unprocessable);
        assert!(validation.message().contains("price must be positive"));
    }
}
