//! Error taxonomy for the upload/media subsystem and its mapping onto HTTP
//! responses and Sentry reporting.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use std::io;

/// Domain errors raised by the guard, the catalog and the upload store.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Traversal attempt, malformed filename or a path resolving outside the root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Missing required field or a disallowed value.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage I/O failed while {context}: {source}")]
    StorageIo {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The catalog backend failed or did not answer in time.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

impl MediaError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::StorageIo {
            context: context.into(),
            source,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

/// Error category determines whether an error should be reported to Sentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Actual bugs that need investigation - ALWAYS report to Sentry
    Bug,
    /// Expected failures (validation, not found) - never report to Sentry
    Expected,
    /// Operational issues (database down, timeouts) - report as warnings
    Operational,
}

/// A structured application error with full context for debugging.
#[derive(Debug)]
pub struct AppError {
    /// The HTTP status code to return
    pub status: StatusCode,
    /// User-facing error message (sanitized)
    pub message: String,
    /// Internal error details for logging (not exposed to users)
    pub internal_message: Option<String>,
    /// The operation/endpoint that failed
    pub operation: &'static str,
    /// Error category for Sentry filtering
    pub category: ErrorCategory,
    /// Additional context as key-value pairs
    pub context: Vec<(&'static str, String)>,
}

impl AppError {
    /// Create a new bug error (will be reported to Sentry as Error)
    pub fn bug(operation: &'static str, internal_msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error. Please try again or contact support.".to_string(),
            internal_message: Some(internal_msg.into()),
            operation,
            category: ErrorCategory::Bug,
            context: Vec::new(),
        }
    }

    /// Create an expected error (will NOT be reported to Sentry)
    pub fn expected(
        status: StatusCode,
        operation: &'static str,
        user_msg: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: user_msg.into(),
            internal_message: None,
            operation,
            category: ErrorCategory::Expected,
            context: Vec::new(),
        }
    }

    /// Create an operational error (will be reported to Sentry as Warning)
    pub fn operational(
        status: StatusCode,
        operation: &'static str,
        user_msg: impl Into<String>,
        internal_msg: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: user_msg.into(),
            internal_message: Some(internal_msg.into()),
            operation,
            category: ErrorCategory::Operational,
            context: Vec::new(),
        }
    }

    /// Map a domain error onto the HTTP surface of `operation`.
    pub fn from_media(operation: &'static str, err: MediaError) -> Self {
        match err {
            MediaError::InvalidPath(_) | MediaError::Validation(_) => {
                Self::bad_request(operation, err.to_string())
            }
            MediaError::NotFound(_) => Self::not_found(operation, err.to_string()),
            MediaError::StorageIo { .. } => {
                Self::bug(operation, err.to_string()).with_message("File operation failed")
            }
            MediaError::CatalogUnavailable(_) => Self::operational(
                StatusCode::SERVICE_UNAVAILABLE,
                operation,
                "Media catalog temporarily unavailable. Please try again.",
                err.to_string(),
            ),
        }
    }

    /// Add context to the error
    #[must_use]
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Override the user-facing message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Report this error to Sentry if appropriate
    pub fn report_to_sentry(&self) {
        match self.category {
            ErrorCategory::Bug => self.capture_sentry_error(),
            ErrorCategory::Operational => self.capture_sentry_warning(),
            ErrorCategory::Expected => self.add_sentry_breadcrumb(),
        }
    }

    fn capture_sentry_error(&self) {
        tracing::error!(
            operation = self.operation,
            status = %self.status,
            internal = self.internal_message.as_deref().unwrap_or(""),
            "request failed"
        );
        sentry::with_scope(
            |scope| {
                scope.set_fingerprint(Some(&[self.operation, self.status.as_str()]));
                for (key, value) in &self.context {
                    scope.set_extra(*key, value.clone().into());
                }
                scope.set_tag("operation", self.operation);
                scope.set_tag("status_code", self.status.as_str());
                scope.set_tag("error_category", "bug");
            },
            || {
                let msg = format!(
                    "[{}] {} - {}",
                    self.operation,
                    self.status,
                    self.internal_message.as_deref().unwrap_or(&self.message)
                );
                sentry::capture_message(&msg, sentry::Level::Error);
            },
        );
    }

    fn capture_sentry_warning(&self) {
        tracing::warn!(
            operation = self.operation,
            internal = self.internal_message.as_deref().unwrap_or(""),
            "operational failure"
        );
        sentry::with_scope(
            |scope| {
                scope.set_fingerprint(Some(&[self.operation, "operational"]));
                for (key, value) in &self.context {
                    scope.set_extra(*key, value.clone().into());
                }
                scope.set_tag("operation", self.operation);
                scope.set_tag("error_category", "operational");
            },
            || {
                let msg = format!(
                    "[{}] Operational issue: {}",
                    self.operation,
                    self.internal_message.as_deref().unwrap_or(&self.message)
                );
                sentry::capture_message(&msg, sentry::Level::Warning);
            },
        );
    }

    fn add_sentry_breadcrumb(&self) {
        sentry::add_breadcrumb(sentry::Breadcrumb {
            category: Some("expected_error".into()),
            message: Some(format!(
                "[{}] {} - {}",
                self.operation, self.status, self.message
            )),
            level: sentry::Level::Info,
            data: self
                .context
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone().into()))
                .collect(),
            ..Default::default()
        });
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.operation, self.status, self.message)
    }
}

impl std::error::Error for AppError {}

#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    message: String,
    data: Option<()>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.report_to_sentry();

        let body = Json(ErrorResponse {
            code: self.status.as_u16(),
            message: self.message.clone(),
            data: None,
        });

        (self.status, body).into_response()
    }
}

// Convenience constructors for common error types
impl AppError {
    /// Bad request - invalid input from client (expected, not a bug)
    pub fn bad_request(operation: &'static str, message: impl Into<String>) -> Self {
        Self::expected(StatusCode::BAD_REQUEST, operation, message)
    }

    /// Not found (expected, not a bug)
    pub fn not_found(operation: &'static str, message: impl Into<String>) -> Self {
        Self::expected(StatusCode::NOT_FOUND, operation, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bug_error_has_correct_status() {
        let err = AppError::bug("test_op", "something broke");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.category, ErrorCategory::Bug);
    }

    #[test]
    fn test_expected_error_has_correct_category() {
        let err = AppError::bad_request("test_op", "invalid input");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.category, ErrorCategory::Expected);
    }

    #[test]
    fn test_context_chaining() {
        let err = AppError::bug("test_op", "error")
            .with_context("media_id", "abc")
            .with_context("path", "/uploads/images/a.jpg");
        assert_eq!(err.context.len(), 2);
    }

    #[test]
    fn test_media_error_status_mapping() {
        let cases = [
            (MediaError::InvalidPath("x".into()), StatusCode::BAD_REQUEST),
            (MediaError::validation("x"), StatusCode::BAD_REQUEST),
            (MediaError::not_found("media"), StatusCode::NOT_FOUND),
            (
                MediaError::io("deleting", io::Error::from(io::ErrorKind::PermissionDenied)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                MediaError::CatalogUnavailable("timeout".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from_media("op", err).status, status);
        }
    }

    #[test]
    fn test_catalog_outage_is_operational() {
        let err = AppError::from_media("op", MediaError::CatalogUnavailable("down".into()));
        assert_eq!(err.category, ErrorCategory::Operational);
        assert!(err.internal_message.unwrap().contains("down"));
    }
}
