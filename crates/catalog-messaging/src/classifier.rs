//! Maps handler failures to a retry decision.

use std::collections::HashSet;

use crate::handler::{ErrorKind, HandlerError};

/// Whether a failed message may be tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Transient failure; the router may retry.
    Retriable,
    /// Permanent failure; the message goes straight to its terminal outcome.
    NonRetriable,
}

/// Classifies failures by their [`ErrorKind`] against a set of kinds that are
/// never retried. Pure and infallible.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    non_retriable: HashSet<ErrorKind>,
}

impl ErrorClassifier {
    /// Creates a classifier treating exactly `kinds` as non-retriable.
    pub fn new(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            non_retriable: kinds.into_iter().collect(),
        }
    }

    /// Classifies a failure.
    #[must_use]
    pub fn classify(&self, error: &HandlerError) -> Retryability {
        self.classify_kind(error.kind())
    }

    /// Classifies a bare error kind.
    #[must_use]
    pub fn classify_kind(&self, kind: ErrorKind) -> Retryability {
        if self.non_retriable.contains(&kind) {
            Retryability::NonRetriable
        } else {
            Retryability::Retriable
        }
    }
}

impl Default for ErrorClassifier {
    /// `Validation` and `Unprocessable` are non-retriable.
    fn default() -> Self {
        Self::new([ErrorKind::Validation, ErrorKind::Unprocessable])
    }
}
