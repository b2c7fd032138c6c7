//! WorkerLoop - ポーリングループ
//!
//! # フロー（1 イテレーション）
//! 1. `find_one(status, "waiting")` で候補を 1 件取得
//! 2. 候補なし / ストア障害 → `empty_poll_delay`（+ jitter）だけ待つ
//!    （終端書き込みがストア障害で失敗した場合も同じ）
//! 3. 候補あり → claim。競合で負けたら待たずに次へ
//! 4. claim 成功 → JobExecutor 実行 → done / error を書き込んで次へ
//!    壊れたレコードは実行せずにそのまま error へ
//!
//! 1 つのループが同時に持つタスクは常に 1 件です。
//! キャンセルはイテレーションの先頭と待機中にだけ効き、実行中のジョブは中断しません。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::backoff::PollBackoff;
use crate::app::claim::{ClaimOutcome, claim};
use crate::app::execute::{FinalizeError, finalize, run_job};
use crate::app::status::WorkerStats;
use crate::config::QueueSettings;
use crate::domain::{ExecutionError, RecordField, TaskStatus};
use crate::ports::{Clock, JobExecutor, RecordStore, SystemClock};

/// Result of one poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No waiting record.
    Empty,

    /// The store could not be queried or written during discovery / claim.
    StoreFailed,

    /// The candidate was taken by someone else first.
    ClaimLost,

    /// Claimed, executed, and marked `done`.
    Done,

    /// Claimed, executed, and marked `error`.
    Failed,

    /// Claimed and executed, but the terminal write failed.
    FinalizeFailed { store_unavailable: bool },
}

impl PollOutcome {
    /// Should the loop sleep before the next query?
    pub fn backs_off(self) -> bool {
        matches!(
            self,
            PollOutcome::Empty
                | PollOutcome::StoreFailed
                | PollOutcome::FinalizeFailed {
                    store_unavailable: true
                }
        )
    }
}

/// PollLoop は 1 ワーカー分のポーリングループ
pub struct PollLoop {
    name: String,
    store: Arc<dyn RecordStore>,
    executor: Arc<dyn JobExecutor>,
    clock: Arc<dyn Clock>,
    backoff: PollBackoff,
    execution_timeout: Option<Duration>,
    stats: WorkerStats,
}

impl PollLoop {
    pub fn new(
        store: Arc<dyn RecordStore>,
        executor: Arc<dyn JobExecutor>,
        settings: &QueueSettings,
    ) -> Self {
        Self {
            name: "worker-0".to_string(),
            store,
            executor,
            clock: Arc::new(SystemClock),
            backoff: PollBackoff::from_settings(settings),
            execution_timeout: settings.execution_timeout(),
            stats: WorkerStats::default(),
        }
    }

    /// Name used in log fields.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// One discover → claim → execute → finalize pass.
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.stats.polls += 1;

        let found = self
            .store
            .find_one(RecordField::Status, TaskStatus::Waiting.as_str())
            .await;
        let (id, _) = match found {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                debug!(worker = %self.name, "no waiting tasks found");
                self.stats.empty_polls += 1;
                return PollOutcome::Empty;
            }
            Err(err) => {
                warn!(worker = %self.name, error = %err, "queue query failed, backing off");
                self.stats.store_errors += 1;
                return PollOutcome::StoreFailed;
            }
        };
        debug!(worker = %self.name, task_id = %id, "candidate found");

        let claimed = match claim(self.store.as_ref(), self.clock.as_ref(), &id).await {
            Ok(ClaimOutcome::Claimed(record)) => record,
            Ok(ClaimOutcome::Lost) => {
                info!(worker = %self.name, task_id = %id, "task was already claimed by another worker");
                self.stats.claims_lost += 1;
                return PollOutcome::ClaimLost;
            }
            Err(err) => {
                warn!(worker = %self.name, task_id = %id, error = %err, "claim failed, backing off");
                self.stats.store_errors += 1;
                return PollOutcome::StoreFailed;
            }
        };
        self.stats.claimed += 1;
        info!(
            worker = %self.name,
            task_id = %id,
            payload_ref = %claimed.payload_ref,
            "claimed task"
        );

        let result = match &claimed.malformed {
            Some(problem) => Err(ExecutionError::failed(format!("malformed record: {problem}"))),
            None => {
                run_job(
                    Arc::clone(&self.executor),
                    claimed.payload_ref.clone(),
                    self.execution_timeout,
                )
                .await
            }
        };

        let written = finalize(
            self.store.as_ref(),
            self.clock.as_ref(),
            &id,
            &claimed,
            result.as_ref().map(|_| ()),
        )
        .await;

        match (written, result) {
            (Ok(_), Ok(())) => {
                info!(worker = %self.name, task_id = %id, "task marked as done");
                self.stats.done += 1;
                PollOutcome::Done
            }
            (Ok(_), Err(err)) => {
                warn!(worker = %self.name, task_id = %id, error = %err, "task failed");
                self.stats.failed += 1;
                PollOutcome::Failed
            }
            (Err(err), _) => {
                let store_unavailable =
                    matches!(&err, FinalizeError::Store(store_err) if store_err.is_unavailable());
                error!(
                    worker = %self.name,
                    task_id = %id,
                    error = %err,
                    "failed to record terminal state, task stays in-progress"
                );
                self.stats.finalize_errors += 1;
                PollOutcome::FinalizeFailed { store_unavailable }
            }
        }
    }

    /// Poll until `cancel` fires. Returns the loop's counters.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerStats {
        info!(worker = %self.name, "poll loop started");

        while !cancel.is_cancelled() {
            if !self.poll_once().await.backs_off() {
                continue;
            }
            let delay = self.backoff.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(worker = %self.name, stats = ?self.stats, "poll loop stopped");
        self.stats
    }
}
