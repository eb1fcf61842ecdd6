//! Error types for the record store.

use crate::types::{EntityKind, VersionId};
use thiserror::Error;

/// Main error type for store operations.
///
/// Errors are `Clone` because a single fetch failure may be fanned out to
/// every subscriber of a query stream.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    // --- Validation ---
    #[error("Duplicate outcome for task version {task_version_id} occurrence {occurrence_index}")]
    DuplicateOutcome {
        task_version_id: VersionId,
        occurrence_index: usize,
    },

    #[error("More than one {kind} in the same call targets id {id}")]
    AmbiguousHead { kind: EntityKind, id: String },

    #[error("{kind} {id} references missing {target_kind} version {target}")]
    DanglingRelationship {
        kind: EntityKind,
        id: String,
        target_kind: EntityKind,
        target: VersionId,
    },

    #[error("{kind} with id {id} already exists")]
    IdConflict { kind: EntityKind, id: String },

    #[error("Version {0} already exists")]
    VersionIdConflict(VersionId),

    #[error("Task version {task_version_id} has no occurrence {occurrence_index}")]
    InvalidOccurrence {
        task_version_id: VersionId,
        occurrence_index: usize,
    },

    #[error("Outcome for task {task_id} is overshadowed by newer task version {newer}")]
    OutcomeOvershadowed { task_id: String, newer: VersionId },

    #[error("Task {id} has an invalid schedule: {reason}")]
    InvalidSchedule { id: String, reason: String },

    #[error("Record kind mismatch: expected {expected}, got {got}")]
    KindMismatch { expected: EntityKind, got: EntityKind },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // --- Not found ---
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} {id} has been deleted")]
    Deleted { kind: EntityKind, id: String },

    // --- I/O ---
    #[error("IO error ({kind:?}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store has been closed")]
    StoreClosed,

    // --- Corruption ---
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Cycle detected in version chain at {0}")]
    ChainCycle(VersionId),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Operation panicked: {0}")]
    OperationPanicked(String),

    #[error("Outcome {outcome} references missing task version {task_version_id}")]
    OrphanedOutcome {
        outcome: VersionId,
        task_version_id: VersionId,
    },
}

/// Coarse classification of a [`StoreError`].
///
/// Validation and not-found errors are caller mistakes and are never retried
/// by the store. I/O errors may be retried by the caller. Corruption is fatal
/// to the operation and is never repaired silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Io,
    Corruption,
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::DuplicateOutcome { .. }
            | StoreError::AmbiguousHead { .. }
            | StoreError::DanglingRelationship { .. }
            | StoreError::IdConflict { .. }
            | StoreError::VersionIdConflict(_)
            | StoreError::InvalidOccurrence { .. }
            | StoreError::OutcomeOvershadowed { .. }
            | StoreError::InvalidSchedule { .. }
            | StoreError::KindMismatch { .. }
            | StoreError::InvalidOperation(_) => ErrorCategory::Validation,

            StoreError::NotFound { .. } | StoreError::Deleted { .. } => ErrorCategory::NotFound,

            StoreError::Io { .. }
            | StoreError::Serialization(_)
            | StoreError::Deserialization(_)
            | StoreError::Locked
            | StoreError::NotInitialized
            | StoreError::InvalidFormat(_)
            | StoreError::StoreClosed => ErrorCategory::Io,

            StoreError::Corruption(_)
            | StoreError::ChainCycle(_)
            | StoreError::ChecksumMismatch { .. }
            | StoreError::OperationPanicked(_)
            | StoreError::OrphanedOutcome { .. } => ErrorCategory::Corruption,
        }
    }

    /// True for errors a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Io
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
