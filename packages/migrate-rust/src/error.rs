//! Error types for remote calls and migration runs.

use std::collections::BTreeMap;
use std::fmt;

use crate::service::stage::Stage;

/// Field names whose uniqueness errors mean "a record like this already exists".
const DUPLICATE_FIELDS: &[&str] = &["title", "uid", "name"];

/// Field messages reporting a uniqueness violation.
const DUPLICATE_MESSAGES: &[&str] = &["is not unique", "already exists"];

/// Machine-readable category of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A record or definition with the same title/identifier/name exists.
    AlreadyExists,
    /// The addressed record or definition does not exist.
    NotFound,
    /// The repository throttled the call.
    RateLimited,
    /// The payload failed validation.
    Validation,
    /// Anything else.
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Validation => "validation",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Structured failure returned by every [`ContentRepository`](crate::ContentRepository) call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category} error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
pub struct RepositoryError {
    /// Category used by callers to pick a recovery path.
    pub category: ErrorCategory,
    /// Repository-specific error code, if reported.
    pub code: Option<u32>,
    /// Human-readable message.
    pub message: String,
    /// Per-field validation messages.
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl RepositoryError {
    /// Creates an error with no code and no field errors.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            code: None,
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }

    /// A duplicate-title error on the given field.
    #[must_use]
    pub fn duplicate(field: &str) -> Self {
        let mut err = Self::new(ErrorCategory::Validation, "entry validation failed");
        err.field_errors
            .insert(field.to_string(), vec!["is not unique".to_string()]);
        err
    }

    /// A missing-resource error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    /// A throttling error.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::new(ErrorCategory::RateLimited, "too many requests")
    }

    /// Attaches a repository error code.
    #[must_use]
    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    /// Whether the failure means an equivalent entity is already present.
    ///
    /// True for [`ErrorCategory::AlreadyExists`] and for validation failures
    /// reporting the title, uid or name field as not unique. Other messages
    /// on those fields, such as "is required", are ordinary failures.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self.category {
            ErrorCategory::AlreadyExists => true,
            ErrorCategory::Validation => DUPLICATE_FIELDS.iter().any(|field| {
                self.field_errors.get(*field).is_some_and(|messages| {
                    messages.iter().any(|message| {
                        DUPLICATE_MESSAGES.iter().any(|dup| message.contains(dup))
                    })
                })
            }),
            _ => false,
        }
    }

    /// Whether the failure means the addressed entity does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.category == ErrorCategory::NotFound
    }

    /// Whether the call may succeed if retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::RateLimited
    }
}

/// Fatal failures that abort a migration run.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Snapshot data a stage cannot do without was missing or unreadable.
    #[error(
        "snapshot unavailable during {stage} (content type: {}, locale: {}): {source}",
        .content_type.as_deref().unwrap_or("-"),
        .locale.as_deref().unwrap_or("-")
    )]
    FatalIo {
        stage: Stage,
        content_type: Option<String>,
        locale: Option<String>,
        #[source]
        source: anyhow::Error,
    },
    /// A checkpoint file could not be read or written.
    #[error("checkpoint failure: {0}")]
    Checkpoint(#[source] anyhow::Error),
}

impl MigrationError {
    /// Wraps a snapshot read failure with the stage and scope it happened in.
    pub fn fatal_io(
        stage: Stage,
        content_type: Option<&str>,
        locale: Option<&str>,
        source: anyhow::Error,
    ) -> Self {
        Self::FatalIo {
            stage,
            content_type: content_type.map(str::to_string),
            locale: locale.map(str::to_string),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_title_counts_as_already_exists() {
        assert!(RepositoryError::duplicate("title").is_already_exists());
        assert!(RepositoryError::duplicate("uid").is_already_exists());
        assert!(!RepositoryError::duplicate("body").is_already_exists());
        assert!(RepositoryError::new(ErrorCategory::AlreadyExists, "dup").is_already_exists());
    }

    #[test]
    fn required_title_is_not_a_duplicate() {
        let mut err = RepositoryError::new(ErrorCategory::Validation, "entry validation failed");
        err.field_errors
            .insert("title".to_string(), vec!["is required".to_string()]);
        assert!(!err.is_already_exists());

        err.field_errors
            .get_mut("title")
            .unwrap()
            .push("is not unique".to_string());
        assert!(err.is_already_exists());
    }

    #[test]
    fn only_rate_limits_are_retryable() {
        assert!(RepositoryError::rate_limited().is_retryable());
        assert!(!RepositoryError::not_found("gone").is_retryable());
    }

    #[test]
    fn display_includes_code_when_present() {
        let err = RepositoryError::not_found("entry missing").with_code(141);
        assert_eq!(err.to_string(), "not_found error 141: entry missing");
        let err = RepositoryError::rate_limited();
        assert_eq!(err.to_string(), "rate_limited error: too many requests");
    }

    #[test]
    fn fatal_io_reports_scope() {
        let err = MigrationError::fatal_io(
            Stage::EntriesCreate,
            Some("page"),
            None,
            anyhow::anyhow!("page index missing"),
        );
        let text = err.to_string();
        assert!(text.contains("entries_create"));
        assert!(text.contains("page"));
        assert!(text.contains("page index missing"));
    }
}
