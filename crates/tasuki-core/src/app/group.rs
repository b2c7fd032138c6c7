use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::app::status::WorkerStats;
use crate::app::worker_loop::PollLoop;
use crate::config::QueueSettings;
use crate::ports::{Clock, JobExecutor, RecordStore};

/// Worker group handle.
/// - 各ワーカーは独立した PollLoop（claim → execute → finalize を 1 件ずつ）
/// - `request_shutdown()` で全ワーカーに協調キャンセルを通知
/// - `join()` で全ワーカーの終了を待ち、統計を回収
pub struct WorkerGroup {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerGroup {
    /// Spawn `n` poll loops sharing one store and one executor.
    pub fn spawn(
        n: usize,
        store: Arc<dyn RecordStore>,
        executor: Arc<dyn JobExecutor>,
        clock: Arc<dyn Clock>,
        settings: &QueueSettings,
    ) -> Self {
        let cancel = CancellationToken::new();

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let poll = PollLoop::new(Arc::clone(&store), Arc::clone(&executor), settings)
                .with_name(format!("worker-{worker_id}"))
                .with_clock(Arc::clone(&clock));
            joins.push(tokio::spawn(poll.run(cancel.child_token())));
        }

        Self { cancel, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// In-flight jobs are not interrupted; each loop stops before its next query.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every worker to stop.
    pub async fn join(self) -> Vec<WorkerStats> {
        let mut stats = Vec::with_capacity(self.joins.len());
        for join in self.joins {
            match join.await {
                Ok(worker_stats) => stats.push(worker_stats),
                Err(err) => error!(error = %err, "worker task ended abnormally"),
            }
        }
        stats
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) -> Vec<WorkerStats> {
        self.request_shutdown();
        self.join().await
    }
}
