//! tasuki-core
//!
//! Building blocks for a polling task queue on top of a shared JSON record
//! store. Producers write `waiting` records; workers discover one, claim it
//! with a conditional write, run it, and record `done` or `error`.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, record, errors）
//! - **ports**: 抽象化レイヤー（RecordStore, JobExecutor, TaskProducer, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（claim, execute, worker_loop, group, status）
//! - **impls**: 実装（InMemoryRecordStore, RealtimeDbStore, CommandExecutor）
//! - **config**: TOML 設定の読み込みと検証

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
