use std::sync::Arc;

use thiserror::Error;

use crate::models::Record;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while importing
/// records. It uses the `thiserror` crate for ergonomic error handling and
/// automatic conversion from underlying library errors.
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Examples
///
/// ```
/// use seedbank_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::ImportClosed)
/// }
///
/// assert_eq!(example().unwrap_err().to_string(), "Import closed");
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps connection failures, query errors and constraint violations
    /// raised while writing sources, items or queue jobs.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A fingerprint could not be parsed from its hex representation.
    #[error("Invalid info hash: {0}")]
    InvalidInfoHash(String),

    /// A record failed validation before persistence.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The import session no longer accepts records.
    #[error("Import closed")]
    ImportClosed,

    /// The downstream processing queue rejected a batch.
    #[error("Publish error: {0}")]
    PublishError(String),

    /// Configuration value is missing or malformed.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check DATABASE_URL."
                        .to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::InvalidInfoHash(value) => {
                format!(
                    "Invalid info hash: {}\n   Expected 40 hexadecimal characters.",
                    value
                )
            }
            AppError::ImportClosed => {
                "The import has already been closed; no more records are accepted.".to_string()
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your environment variables.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if retrying the same batch could succeed.
    ///
    /// Persistence is idempotent (create-or-ignore sources, keyed upsert of
    /// items), so transient storage and queue failures are safe to retry.
    /// Validation failures are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use seedbank_core::error::AppError;
    ///
    /// assert!(AppError::PublishError("queue unavailable".to_string()).is_retryable());
    /// assert!(!AppError::InvalidRecord("empty source".to_string()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::DatabaseError(e) => !matches!(
                e,
                sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::TypeNotFound { .. }
                    | sqlx::Error::Decode(_)
            ),
            AppError::PublishError(_) => true,
            AppError::SerializationError(_)
            | AppError::InvalidInfoHash(_)
            | AppError::InvalidRecord(_)
            | AppError::ImportClosed
            | AppError::ConfigError(_) => false,
        }
    }
}

/// A batch that failed to persist, together with the cause.
///
/// The records are exactly the batch that was handed to the persister; they
/// are never re-queued by the session.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub records: Vec<Record>,
    pub error: Arc<AppError>,
}

impl BatchFailure {
    pub fn new(records: Vec<Record>, error: AppError) -> Self {
        Self {
            records,
            error: Arc::new(error),
        }
    }
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} records: {}", self.records.len(), self.error)
    }
}

/// Ordered list of batch failures accumulated by an import session.
#[derive(Error, Debug, Clone, Default)]
#[error("one or more batches failed to import")]
pub struct ImportErrors(pub Vec<BatchFailure>);

impl ImportErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BatchFailure> {
        self.0.iter()
    }

    /// Total number of records across all failed batches.
    pub fn failed_records(&self) -> usize {
        self.0.iter().map(|f| f.records.len()).sum()
    }

    /// Returns `None` when no batch failed.
    pub fn or_none(self) -> Option<Self> {
        if self.is_empty() { None } else { Some(self) }
    }
}

impl<'a> IntoIterator for &'a ImportErrors {
    type Item = &'a BatchFailure;
    type IntoIter = std::slice::Iter<'a, BatchFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
