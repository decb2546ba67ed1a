//! Crate-wide error taxonomy for the exploration engine.
//!
//! One `thiserror`-derived enum covers every failure kind named in the
//! component design: validation, safety pre-flight, resource exhaustion,
//! git/container/filesystem failures, lock contention, merge conflicts and
//! timeouts. Call sites that aggregate several fallible steps use
//! `anyhow::Result` and convert into this enum only at the boundary where a
//! caller needs to match on the kind (see `ConflictsUnresolved`, exit codes).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplorationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("safety check failed: {0}")]
    Safety(String),

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("container error: {0}")]
    Container(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("lock timeout on {path}: held for {held_ms}ms past TTL")]
    LockTimeout { path: String, held_ms: u64 },

    #[error("merge conflicts unresolved: {0} file(s)")]
    ConflictsUnresolved(usize),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("pull request error: {0}")]
    Pr(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("exploration not found: {0}")]
    NotFound(String),

    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ExplorationError>;

/// Process-level exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERIC_FAILURE: i32 = 1;
    pub const SAFETY_VALIDATION_FAILED: i32 = 2;
    pub const CONFLICT_UNRESOLVED: i32 = 3;
}

impl ExplorationError {
    /// Map an error to the process exit code a CLI entry point should use.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExplorationError::Safety(_) => exit_code::SAFETY_VALIDATION_FAILED,
            ExplorationError::ConflictsUnresolved(_) => exit_code::CONFLICT_UNRESOLVED,
            _ => exit_code::GENERIC_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_for_known_error_kinds() {
        assert_eq!(ExplorationError::Safety("x".into()).exit_code(), 2);
        assert_eq!(ExplorationError::ConflictsUnresolved(2).exit_code(), 3);
        assert_eq!(ExplorationError::Merge("x".into()).exit_code(), 1);
    }
}
