//! Provider error classification.
//!
//! CloudFormation reports a missing stack as a generic validation error whose
//! message says the stack "does not exist". The classification below is the
//! only place that inspects error text; everything else branches on
//! [`ProviderErrorKind`].

use std::time::Duration;
use thiserror::Error;

/// Substring that identifies a missing stack in a provider error payload.
pub const NOT_FOUND_SIGNAL: &str = "does not exist";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The named stack does not exist upstream.
    NotFound,
    /// Request rate exceeded.
    Throttled,
    /// Credentials lack the required permission.
    AccessDenied,
    /// The call did not finish within the configured bound.
    Timeout,
    Other,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderErrorKind::NotFound => "not found",
            ProviderErrorKind::Throttled => "throttled",
            ProviderErrorKind::AccessDenied => "access denied",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Other => "error",
        };
        write!(f, "{s}")
    }
}

/// Classify a provider failure from its error code and rendered message.
///
/// The not-found signal is matched on the message alone; the error code for
/// a missing stack is the same one used for every other validation failure.
pub fn classify_provider_error(code: Option<&str>, message: &str) -> ProviderErrorKind {
    if message.contains(NOT_FOUND_SIGNAL) {
        return ProviderErrorKind::NotFound;
    }

    match code {
        Some("Throttling" | "ThrottlingException" | "RequestLimitExceeded") => {
            ProviderErrorKind::Throttled
        }
        Some("AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation") => {
            ProviderErrorKind::AccessDenied
        }
        _ => ProviderErrorKind::Other,
    }
}

/// A failed call against the provisioning service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ProviderError {
    pub operation: &'static str,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(
        operation: &'static str,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    /// Build an error whose kind is derived by [`classify_provider_error`].
    pub fn classify(
        operation: &'static str,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let kind = classify_provider_error(code, &message);
        Self::new(operation, kind, message)
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::new(
            operation,
            ProviderErrorKind::Timeout,
            format!("no response within {after:?}"),
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}
