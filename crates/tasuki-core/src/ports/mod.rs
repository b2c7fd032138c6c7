//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（共有ストア、ジョブ本体、時刻）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 共有ストアが正本（source of truth）。ワーカー側に状態は持たない
//! - 認証情報などの初期化はプロセスグローバルにせず、実装のコンストラクタに渡す

pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod producer;
pub mod record_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::JobExecutor;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::producer::TaskProducer;
pub use self::record_store::{RecordStore, Transform};
