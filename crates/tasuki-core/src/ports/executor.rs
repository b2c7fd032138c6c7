//! JobExecutor port - claim 済みタスクに対して呼び出し側のロジックを実行
//!
//! 実処理（ファイル転送、要約 API 呼び出しなど）はコアの外側にあり、
//! コアは `payload_ref` を渡して結果を受け取るだけです。

use async_trait::async_trait;

use crate::domain::{ExecutionError, PayloadRef};

/// A job function supplied at worker construction time.
///
/// - Invoked once per claimed task, never concurrently for the same record.
/// - Must not keep mutable state between invocations.
/// - Failures are returned, never thrown; panics are caught by the caller
///   and recorded as `ExecutionError::Panicked`.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, payload_ref: &PayloadRef) -> Result<(), ExecutionError>;
}
