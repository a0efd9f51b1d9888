//! Append-only log of batch failures shared across an import session.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{BatchFailure, ImportErrors};

/// Thread-safe, append-only collection of [`BatchFailure`]s.
///
/// Unbounded and never deduplicated: every failed batch gets an entry.
#[derive(Debug, Default)]
pub struct ErrorLog {
    failures: Mutex<Vec<BatchFailure>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, failure: BatchFailure) {
        self.lock().push(failure);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All failures so far, oldest first.
    pub fn snapshot(&self) -> ImportErrors {
        ImportErrors(self.lock().clone())
    }

    /// The failures as an error, or `None` if no batch has failed.
    pub fn or_none(&self) -> Option<ImportErrors> {
        self.snapshot().or_none()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<BatchFailure>> {
        // A panic while pushing cannot leave the Vec half-written.
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
