//! In-memory record store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{PayloadRef, RecordField, RecordPatch, StoreError, TaskId, TaskRecord};
use crate::ports::{RecordStore, TaskProducer, Transform};

/// In-memory implementation of [`RecordStore`].
///
/// Design:
/// - One `Mutex` around the whole map; every call holds it for its full
///   duration, so `conditional_update` is trivially atomic.
/// - `find_one` tie-break: oldest `last_updated` first (records without a
///   timestamp come before any stamped record), then lexicographic id.
/// - `set_unavailable(true)` makes every call fail with `Unavailable`.
pub struct InMemoryRecordStore {
    records: Mutex<BTreeMap<TaskId, TaskRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Seed the store with records.
    pub fn with_records(records: impl IntoIterator<Item = (TaskId, TaskRecord)>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert or overwrite a record directly.
    pub async fn insert(&self, id: TaskId, record: TaskRecord) {
        self.records.lock().await.insert(id, record);
    }

    /// Point read.
    pub async fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.records.lock().await.get(id).cloned()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_one(
        &self,
        field: RecordField,
        value: &str,
    ) -> Result<Option<(TaskId, TaskRecord)>, StoreError> {
        self.check_available()?;
        let records = self.records.lock().await;
        let found = records
            .iter()
            .filter(|(_, record)| field.value_of(record) == value)
            .min_by(|(a_id, a), (b_id, b)| {
                a.last_updated
                    .cmp(&b.last_updated)
                    .then_with(|| a_id.cmp(b_id))
            })
            .map(|(id, record)| (id.clone(), record.clone()));
        Ok(found)
    }

    async fn conditional_update(
        &self,
        id: &TaskId,
        transform: Transform<'_>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        match transform(records.get(id)) {
            Some(next) => {
                records.insert(id.clone(), next);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update(&self, id: &TaskId, patch: &RecordPatch) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.apply(patch);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(TaskId, TaskRecord)>, StoreError> {
        self.check_available()?;
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect())
    }
}

#[async_trait]
impl TaskProducer for InMemoryRecordStore {
    async fn enqueue(&self, id: &TaskId, payload_ref: &PayloadRef) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        if records.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.clone()));
        }
        records.insert(id.clone(), TaskRecord::waiting(payload_ref.clone()));
        Ok(())
    }
}
