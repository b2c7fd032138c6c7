//! IdGenerator port - タスク ID の採番
//!
//! タスク ID は本来 producer が採番しますが、`tasuki enqueue` で投入する場合はここで生成します。
//! RealtimeDbStore はキー順で候補を返すので、ID の順序 = 投入順 であることが重要です。
//!
//! # 実装
//! - **UlidGenerator**: 単調増加 ULID（同一ミリ秒内でも順序が崩れない）

use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use ulid::{Generator, Ulid};

use crate::domain::TaskId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// 時刻部分は Clock から取るので、FixedClock を使うと timestamp が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
    monotonic: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            monotonic: Mutex::new(Generator::new()),
        }
    }

    fn clock_time(&self) -> SystemTime {
        let millis = self.clock.now().timestamp_millis().max(0) as u64;
        SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let at = self.clock_time();
        let ulid = self
            .monotonic
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate_from_datetime(at).ok())
            // random part overflowed within one millisecond (or poisoned lock)
            .unwrap_or_else(|| Ulid::from_datetime(at));
        TaskId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ids_are_unique() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();

        assert_ne!(id1, id2);
    }

    #[test]
    fn ids_within_one_millisecond_keep_generation_order() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let ids: Vec<TaskId> = (0..50).map(|_| id_gen.generate_task_id()).collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let ulid = Ulid::from_string(ids[0].as_str()).unwrap();
        assert_eq!(ulid.timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
