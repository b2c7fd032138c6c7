//! Errors - エラー型と分類
//!
//! # 分類
//! - `StoreError`: ストアへの I/O 失敗（ループ側でバックオフして再試行）
//! - `ExecutionError`: JobExecutor の失敗（タスクを `error` に遷移、ワーカーは継続）
//! - `TransitionError`: 状態機械に存在しない遷移
//!
//! claim 競合（ClaimLost）はエラーではなく `app::claim::ClaimOutcome::Lost` で表現します。

use std::time::Duration;

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity failure, timeout, or a 5xx from the backing store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed record: {0}")]
    Decode(String),

    #[error("record not found: {0}")]
    NotFound(TaskId),

    #[error("record already exists: {0}")]
    AlreadyExists(TaskId),
}

impl StoreError {
    /// Connectivity failures, as opposed to "the store answered and said no".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Failure reported by a job executor.
///
/// `Display` is what gets written into the record's `error_detail`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("payload decoding failed: {0}")]
    Decode(String),

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutionError::Failed(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: TaskStatus, to: TaskStatus },
}
