//! Map error types

use thiserror::Error;

use crate::sync::Phase;

/// Errors returned by [`SortedMap`](crate::SortedMap) operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("An entry with the same key already exists")]
    DuplicateKey,

    #[error("Key not found")]
    KeyNotFound,

    #[error("Reader/writer protocol violated: {violations} violation(s), {active_readers} active reader(s), phase {phase}")]
    InvariantViolation {
        violations: u64,
        active_readers: usize,
        phase: Phase,
    },
}

impl MapError {
    /// Check if the caller can recover by choosing another key or operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            MapError::DuplicateKey => true,
            MapError::KeyNotFound => true,
            MapError::InvariantViolation { .. } => false,
        }
    }
}
