// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Errors produced by the indexing engine.
///
/// The variants map onto the recovery policy of the scan coordinator:
/// - `TransientRpc` and `Protocol` skip the affected block and record a gap
/// - `NotFound` is absorbed by attribution resolution as `unknown`
/// - `StorageConflict` is a benign duplicate and never escapes the writer
/// - `Storage` stops the scan
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Transient RPC failure: {0}")]
    TransientRpc(String),

    #[error("Unexpected RPC payload: {0}")]
    Protocol(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    StorageConflict(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

impl LedgerError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            LedgerError::TransientRpc(_) => "transient_rpc",
            LedgerError::Protocol(_) => "protocol",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::StorageConflict(_) => "storage_conflict",
            LedgerError::Storage(_) => "storage",
            LedgerError::Config(_) => "config",
            LedgerError::Cancelled => "cancelled",
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransientRpc(_))
    }

    /// Whether the failure is confined to a single block and the scan may continue past it
    pub fn is_block_local(&self) -> bool {
        matches!(
            self,
            LedgerError::TransientRpc(_) | LedgerError::Protocol(_) | LedgerError::NotFound(_)
        )
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_labels_are_distinct() {
        let errors = [
            LedgerError::TransientRpc("timeout".into()),
            LedgerError::Protocol("bad json".into()),
            LedgerError::NotFound("tx".into()),
            LedgerError::StorageConflict("dup".into()),
            LedgerError::Storage("down".into()),
            LedgerError::Config("bad".into()),
            LedgerError::Cancelled,
        ];
        let labels: std::collections::HashSet<_> = errors.iter().map(|e| e.error_type()).collect();
        assert_eq!(labels.len(), errors.len());
        for label in labels {
            assert!(label.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn test_only_transient_rpc_is_retryable() {
        assert!(LedgerError::TransientRpc("x".into()).is_retryable());
        assert!(!LedgerError::Protocol("x".into()).is_retryable());
        assert!(!LedgerError::Storage("x".into()).is_retryable());
        assert!(!LedgerError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_storage_failure_is_not_block_local() {
        assert!(LedgerError::Protocol("x".into()).is_block_local());
        assert!(LedgerError::TransientRpc("x".into()).is_block_local());
        assert!(!LedgerError::Storage("x".into()).is_block_local());
        assert!(!LedgerError::Cancelled.is_block_local());
    }
}
