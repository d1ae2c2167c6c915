// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query execution error types

use thiserror::Error;

/// Continuation token errors
///
/// Every variant means the caller handed back a token this client cannot
/// resume from. Only the optimistic direct execution fallback ever recovers
/// from one of these automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed continuation token: {0}")]
    Malformed(String),

    #[error("Continuation token is from a newer version of the client ({0}); upgrade the client to resume it")]
    FromNewerVersion(String),

    #[error("Continuation token is no longer supported: {0}")]
    NoLongerSupported(String),
}

impl TokenError {
    /// Create a malformed token error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Sub-status codes carried by a `Gone` response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoneSubStatus {
    /// Cached collection metadata is outdated and must be refreshed
    NameCacheIsStale,
    /// The targeted partition key range no longer exists
    PartitionKeyRangeGone,
    CompletingSplit,
    CompletingPartitionMigration,
}

impl GoneSubStatus {
    /// Whether the partition topology changed under the request
    pub fn is_split(&self) -> bool {
        matches!(
            self,
            GoneSubStatus::PartitionKeyRangeGone
                | GoneSubStatus::CompletingSplit
                | GoneSubStatus::CompletingPartitionMigration
        )
    }
}

/// Query execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    ContinuationToken(#[from] TokenError),

    #[error("Gone ({sub_status:?}): {message}")]
    Gone {
        sub_status: GoneSubStatus,
        message: String,
    },

    #[error("Backend error {status_code}/{sub_status}: {message}")]
    Backend {
        status_code: u16,
        sub_status: u32,
        message: String,
    },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Partition topology changed incompatibly: {0}")]
    PartitionTopologyChanged(String),

    #[error("Query plan error: {0}")]
    QueryPlan(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate
pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    /// Create a malformed continuation token error
    pub fn malformed_token<S: Into<String>>(msg: S) -> Self {
        Self::ContinuationToken(TokenError::Malformed(msg.into()))
    }

    /// Create a gone error
    pub fn gone<S: Into<String>>(sub_status: GoneSubStatus, msg: S) -> Self {
        Self::Gone {
            sub_status,
            message: msg.into(),
        }
    }

    /// Create a throttling error (429)
    pub fn throttled<S: Into<String>>(msg: S) -> Self {
        Self::Backend {
            status_code: 429,
            sub_status: 3200,
            message: msg.into(),
        }
    }

    /// Create a request timeout error (408)
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Backend {
            status_code: 408,
            sub_status: 0,
            message: msg.into(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is any continuation token failure
    pub fn is_malformed_token(&self) -> bool {
        matches!(self, QueryError::ContinuationToken(_))
    }

    /// Whether the backend reported stale collection metadata
    pub fn is_name_cache_stale(&self) -> bool {
        matches!(
            self,
            QueryError::Gone {
                sub_status: GoneSubStatus::NameCacheIsStale,
                ..
            }
        )
    }

    /// Whether the targeted range split or moved
    pub fn is_partition_split(&self) -> bool {
        matches!(self, QueryError::Gone { sub_status, .. } if sub_status.is_split())
    }

    /// Whether the failure is transient and left to an outer retry policy
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueryError::Backend {
                status_code: 408 | 429 | 503,
                ..
            }
        )
    }

    /// Programming misuse, never translated into a page failure
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueryError::InvalidOperation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_converts_into_query_error() {
        let error: QueryError = TokenError::FromNewerVersion("2.0".to_string()).into();
        assert!(error.is_malformed_token());
        assert!(error.to_string().contains("newer version"));
    }

    #[test]
    fn test_gone_classification() {
        let stale = QueryError::gone(GoneSubStatus::NameCacheIsStale, "stale");
        assert!(stale.is_name_cache_stale());
        assert!(!stale.is_partition_split());

        let split = QueryError::gone(GoneSubStatus::CompletingSplit, "split");
        assert!(split.is_partition_split());
        assert!(!split.is_name_cache_stale());
    }

    #[test]
    fn test_transient_and_fatal() {
        assert!(QueryError::throttled("busy").is_transient());
        assert!(QueryError::timeout("slow").is_transient());
        assert!(!QueryError::Cancelled.is_transient());
        assert!(QueryError::invalid_operation("advanced twice").is_fatal());
    }
}
