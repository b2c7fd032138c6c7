//! Execute - claim 済みタスクの実行と終端遷移の書き込み
//!
//! # フロー
//! 1. JobExecutor を別タスクで実行（panic も `ExecutionError::Panicked` として回収）
//! 2. タイムアウトが設定されていれば超過で `ExecutionError::TimedOut`
//! 3. 結果から終端パッチ（done / error）を作り、`update` で 1 回だけ書き込む
//!
//! 終端書き込みに失敗してもリトライしません。レコードは in-progress のまま残ります
//! （回収の仕組みはこのクレートにはありません）。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{
    ExecutionError, PayloadRef, StoreError, TaskId, TaskRecord, TaskStatus, TransitionError,
};
use crate::ports::{Clock, JobExecutor, RecordStore};

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Run the executor against `payload_ref`, catching panics and enforcing
/// `timeout` when one is given.
pub async fn run_job(
    executor: Arc<dyn JobExecutor>,
    payload_ref: PayloadRef,
    timeout: Option<Duration>,
) -> Result<(), ExecutionError> {
    let handle = tokio::spawn(async move { executor.execute(&payload_ref).await });
    let abort = handle.abort_handle();

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(ExecutionError::TimedOut(limit));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(ExecutionError::Panicked(panic_message(
            err.into_panic(),
        ))),
        Err(err) => Err(ExecutionError::Failed(format!("job task stopped: {err}"))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Write the terminal state for a record this worker claimed.
///
/// `claimed` must be the record committed by the claim; the patch is derived
/// from it so an illegal transition is refused before anything is written.
pub async fn finalize(
    store: &dyn RecordStore,
    clock: &dyn Clock,
    id: &TaskId,
    claimed: &TaskRecord,
    result: Result<(), &ExecutionError>,
) -> Result<TaskStatus, FinalizeError> {
    let patch = claimed.finish(clock.now(), result)?;
    store.update(id, &patch).await?;
    Ok(patch.status)
}
