//! RecordStore port - キューの正本（共有ストア）
//!
//! ワーカー同士はこのストアだけを共有します。ロックマネージャもリースもありません。
//! 並行制御の唯一の道具は `conditional_update`（レコード単位の原子的な read-modify-write）です。
//!
//! # 実装
//! - **InMemoryRecordStore**: テスト・ローカル用（`impls::memory`）
//! - **RealtimeDbStore**: Firebase Realtime Database REST（`impls::rtdb`）

use async_trait::async_trait;

use crate::domain::{RecordField, RecordPatch, StoreError, TaskId, TaskRecord};

/// Transform passed to [`RecordStore::conditional_update`].
///
/// Receives the current value (`None` when the record is gone) and returns
/// the value to write, or `None` to abort without writing.
pub type Transform<'a> = &'a (dyn Fn(Option<&TaskRecord>) -> Option<TaskRecord> + Send + Sync);

/// RecordStore は task record の読み書きを抽象化
///
/// # 設計原則
/// - 接続失敗は `StoreError::Unavailable` として返す（アダプタ内でリトライしない）
/// - 「見つからない」はエラーではなく `Ok(None)`
/// - `conditional_update` は同じ id への並行呼び出しに対して原子的であること
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// At most one record whose `field` equals `value`.
    ///
    /// Implementations document their tie-break among several matches.
    async fn find_one(
        &self,
        field: RecordField,
        value: &str,
    ) -> Result<Option<(TaskId, TaskRecord)>, StoreError>;

    /// Atomically apply `transform` to the current value. Returns whether a
    /// write was committed.
    ///
    /// `transform` may be invoked more than once; it must be pure.
    async fn conditional_update(
        &self,
        id: &TaskId,
        transform: Transform<'_>,
    ) -> Result<bool, StoreError>;

    /// Unconditional merge-write. Only for records this worker already owns.
    async fn update(&self, id: &TaskId, patch: &RecordPatch) -> Result<(), StoreError>;

    /// Every record in the namespace (operator view, not used by the poll loop).
    async fn list(&self) -> Result<Vec<(TaskId, TaskRecord)>, StoreError>;
}
