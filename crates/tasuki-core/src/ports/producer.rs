//! TaskProducer port - waiting レコードの投入
//!
//! ワーカー（コア）はタスクを作りません。これは CLI の `enqueue` やテストのための口です。

use async_trait::async_trait;

use crate::domain::{PayloadRef, StoreError, TaskId};

#[async_trait]
pub trait TaskProducer: Send + Sync {
    /// Write `{status: "waiting", path: payload_ref}` under `id`.
    ///
    /// Fails with `StoreError::AlreadyExists` rather than overwriting.
    async fn enqueue(&self, id: &TaskId, payload_ref: &PayloadRef) -> Result<(), StoreError>;
}
