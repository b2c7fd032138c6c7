//! Claim - waiting レコードを compare-and-set で 1 件だけ確保
//!
//! # フロー
//! 1. `conditional_update` に「status が waiting のときだけ in-progress にする」transform を渡す
//! 2. commit されたら、このワーカーが排他的に所有している
//! 3. commit されなければ他のワーカーが先に取った（ClaimLost）。エラーではない
//!
//! ロックもリースも使いません。ストアの原子的な条件付き書き込みだけが頼りです。

use std::sync::Mutex;

use crate::domain::{StoreError, TaskId, TaskRecord};
use crate::ports::{Clock, RecordStore};

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The committed `in-progress` record, now owned by this worker.
    Claimed(TaskRecord),

    /// Someone else changed the record first (or it is gone). Nothing was written.
    Lost,
}

/// Attempt the `waiting -> in-progress` transition on `id`.
pub async fn claim(
    store: &dyn RecordStore,
    clock: &dyn Clock,
    id: &TaskId,
) -> Result<ClaimOutcome, StoreError> {
    let now = clock.now();
    // the store may run the transform several times; keep the last output
    let written: Mutex<Option<TaskRecord>> = Mutex::new(None);

    let transform = |current: Option<&TaskRecord>| {
        let next = current.and_then(|record| record.claimed(now));
        if let Ok(mut slot) = written.lock() {
            slot.clone_from(&next);
        }
        next
    };

    if !store.conditional_update(id, &transform).await? {
        return Ok(ClaimOutcome::Lost);
    }

    match written.into_inner().ok().flatten() {
        Some(record) => Ok(ClaimOutcome::Claimed(record)),
        None => Err(StoreError::Decode(format!(
            "store committed a claim on {id} without producing a record"
        ))),
    }
}
