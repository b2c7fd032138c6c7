//! App - アプリケーション層
//!
//! ports を組み合わせてキューの消費ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **claim**: 楽観的トランザクションによる waiting → in-progress の奪取
//! - **execute**: JobExecutor の実行と終端状態（done / error）の書き込み
//! - **PollLoop**: 1 ワーカー分のループ（find → claim → execute → finalize → backoff）
//! - **WorkerGroup**: 複数の PollLoop の起動と協調停止
//! - **status**: ワーカー統計とキューの集計

pub mod backoff;
pub mod claim;
pub mod execute;
pub mod group;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::backoff::PollBackoff;
pub use self::claim::{ClaimOutcome, claim};
pub use self::execute::{FinalizeError, finalize, run_job};
pub use self::group::WorkerGroup;
pub use self::status::{QueueCounts, WorkerStats, stuck_in_progress};
pub use self::worker_loop::{PollLoop, PollOutcome};
