//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryRecordStore**: テスト・ローカル実行用のストア
//! - **RealtimeDbStore**: Firebase Realtime Database（REST）
//! - **CommandExecutor**: 外部コマンドをジョブとして起動

pub mod command;
pub mod memory;
pub mod rtdb;

use std::sync::Arc;

use crate::config::{ConfigError, StoreKind, TasukiConfig};
use crate::ports::{RecordStore, TaskProducer};

// 主要な型を再エクスポート
pub use self::command::CommandExecutor;
pub use self::memory::InMemoryRecordStore;
pub use self::rtdb::{RealtimeDbOptions, RealtimeDbStore};

/// A configured store, usable both as the worker's record store and as a
/// producer.
#[derive(Clone)]
pub enum Backend {
    Memory(Arc<InMemoryRecordStore>),
    RealtimeDb(Arc<RealtimeDbStore>),
}

impl Backend {
    /// Build the store named in `config.store`.
    pub fn open(config: &TasukiConfig) -> Result<Self, ConfigError> {
        match config.store.kind {
            StoreKind::Memory => Ok(Backend::Memory(Arc::new(InMemoryRecordStore::new()))),
            StoreKind::Rtdb => {
                let database_url = config
                    .store
                    .database_url
                    .clone()
                    .ok_or_else(|| ConfigError::Invalid("store.database_url is required".into()))?;
                let options = RealtimeDbOptions {
                    database_url,
                    namespace: config.queue.namespace.clone(),
                    auth_token: config.store.auth_token(),
                    max_transaction_retries: config.store.max_transaction_retries,
                    request_timeout: config.store.request_timeout(),
                };
                let store = RealtimeDbStore::new(options)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Ok(Backend::RealtimeDb(Arc::new(store)))
            }
        }
    }

    pub fn records(&self) -> Arc<dyn RecordStore> {
        match self {
            Backend::Memory(store) => store.clone(),
            Backend::RealtimeDb(store) => store.clone(),
        }
    }

    pub fn producer(&self) -> Arc<dyn TaskProducer> {
        match self {
            Backend::Memory(store) => store.clone(),
            Backend::RealtimeDb(store) => store.clone(),
        }
    }
}
