//! Status - ワーカーとキューの観測用ビュー
//!
//! - `WorkerStats`: 1 つのポーリングループが何をしたか
//! - `QueueCounts`: ストア上のレコードを状態別に数えたもの
//! - `stuck_in_progress`: 長時間 in-progress のままのレコード（報告のみ、回収はしない）

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskRecord, TaskStatus};

/// Counters for one poll loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub polls: u64,
    pub empty_polls: u64,
    pub claimed: u64,
    pub claims_lost: u64,
    pub done: u64,
    pub failed: u64,
    pub store_errors: u64,
    pub finalize_errors: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub in_progress: usize,
    pub done: usize,
    pub error: usize,
}

impl QueueCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut counts = QueueCounts::default();
        for record in records {
            match record.status {
                TaskStatus::Waiting => counts.waiting += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Error => counts.error += 1,
            }
        }
        counts
    }
}

/// `in-progress` records whose `last_updated` is older than `older_than`,
/// oldest first. Records without a timestamp count as stuck.
///
/// A negative `older_than` is treated as zero. One that reaches past the
/// earliest representable time matches only unstamped records.
pub fn stuck_in_progress<'a>(
    records: impl IntoIterator<Item = (&'a TaskId, &'a TaskRecord)>,
    now: DateTime<Utc>,
    older_than: Duration,
) -> Vec<(TaskId, Option<DateTime<Utc>>)> {
    let cutoff = now.checked_sub_signed(older_than.max(Duration::zero()));
    let mut stuck: Vec<_> = records
        .into_iter()
        .filter(|(_, record)| record.status == TaskStatus::InProgress)
        .filter(|(_, record)| match (record.last_updated, cutoff) {
            (None, _) => true,
            (Some(ts), Some(cutoff)) => ts < cutoff,
            (Some(_), None) => false,
        })
        .map(|(id, record)| (id.clone(), record.last_updated))
        .collect();
    stuck.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    stuck
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PayloadRef;
    use chrono::TimeZone;

    fn record(status: TaskStatus, last_updated: Option<DateTime<Utc>>) -> TaskRecord {
        let mut record = TaskRecord::waiting(PayloadRef::new("p"));
        record.status = status;
        record.last_updated = last_updated;
        record
    }

    #[test]
    fn tally_counts_by_status() {
        let records = [
            record(TaskStatus::Waiting, None),
            record(TaskStatus::Waiting, None),
            record(TaskStatus::InProgress, None),
            record(TaskStatus::Error, None),
        ];
        let counts = QueueCounts::tally(records.iter());
        assert_eq!(
            counts,
            QueueCounts {
                waiting: 2,
                in_progress: 1,
                done: 0,
                error: 1,
            }
        );
    }

    #[test]
    fn stuck_reports_only_old_in_progress_records() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let records = vec![
            (TaskId::new("fresh"), record(TaskStatus::InProgress, Some(now - Duration::minutes(1)))),
            (TaskId::new("old"), record(TaskStatus::InProgress, Some(now - Duration::hours(2)))),
            (TaskId::new("unstamped"), record(TaskStatus::InProgress, None)),
            (TaskId::new("done"), record(TaskStatus::Done, Some(now - Duration::hours(5)))),
        ];

        let stuck = stuck_in_progress(
            records.iter().map(|(id, r)| (id, r)),
            now,
            Duration::hours(1),
        );

        let ids: Vec<_> = stuck.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["unstamped", "old"]);
    }

    #[test]
    fn huge_threshold_does_not_overflow() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let records = vec![
            (TaskId::new("ancient"), record(TaskStatus::InProgress, Some(now - Duration::days(365 * 200)))),
            (TaskId::new("unstamped"), record(TaskStatus::InProgress, None)),
        ];

        let stuck = stuck_in_progress(
            records.iter().map(|(id, r)| (id, r)),
            now,
            Duration::days(365 * 1_000_000),
        );

        let ids: Vec<_> = stuck.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["unstamped"]);
    }

    #[test]
    fn negative_threshold_counts_as_zero() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let records = vec![
            (TaskId::new("past"), record(TaskStatus::InProgress, Some(now - Duration::seconds(1)))),
            (TaskId::new("now"), record(TaskStatus::InProgress, Some(now))),
        ];

        let stuck = stuck_in_progress(
            records.iter().map(|(id, r)| (id, r)),
            now,
            Duration::hours(-5),
        );

        let ids: Vec<_> = stuck.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["past"]);
    }
}
