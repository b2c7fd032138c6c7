//! Task record: status + payload reference as stored in the queue namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ExecutionError, TransitionError};
use super::ids::PayloadRef;
use super::state::TaskStatus;

/// One record under `<namespace>/<id>`.
///
/// Design:
/// - JSON keys follow what producers write (`path`, `lastUpdated`, `error`).
/// - Keys this crate does not know about are kept in `extra` and written back
///   untouched by conditional updates.
/// - Producers leave `lastUpdated` out, so it is optional.
/// - A stored value with undecodable optional fields still becomes a record
///   (see [`TaskRecord::from_value_lossy`]); `malformed` says what was wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,

    #[serde(rename = "path", default)]
    pub payload_ref: PayloadRef,

    #[serde(
        rename = "lastUpdated",
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp"
    )]
    pub last_updated: Option<DateTime<Utc>>,

    /// Present only when `status == Error`.
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    /// Decode problems found by `from_value_lossy`. Never written back.
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl TaskRecord {
    /// A freshly produced record, as a producer would write it.
    pub fn waiting(payload_ref: PayloadRef) -> Self {
        Self {
            status: TaskStatus::Waiting,
            payload_ref,
            last_updated: None,
            error_detail: None,
            extra: serde_json::Map::new(),
            malformed: None,
        }
    }

    /// Decode a stored value, tolerating bad optional fields.
    ///
    /// Only `status` must decode. A `path`, `lastUpdated` or `error` that does
    /// not is dropped and described in `malformed`, so the record can still be
    /// claimed and sent to `error` instead of failing every query that sees it.
    pub fn from_value_lossy(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let strict_err = match serde_json::from_value::<TaskRecord>(value.clone()) {
            Ok(record) => return Ok(record),
            Err(err) => err,
        };
        let serde_json::Value::Object(mut fields) = value else {
            return Err(strict_err);
        };
        let Some(status) = fields.remove("status") else {
            return Err(strict_err);
        };

        let mut record = TaskRecord::waiting(PayloadRef::default());
        record.status = serde_json::from_value(status)?;
        let mut problems = Vec::new();

        if let Some(raw) = fields.remove("path") {
            match serde_json::from_value::<Option<PayloadRef>>(raw) {
                Ok(payload_ref) => record.payload_ref = payload_ref.unwrap_or_default(),
                Err(err) => problems.push(format!("path: {err}")),
            }
        }
        if let Some(raw) = fields.remove("lastUpdated") {
            match timestamp::deserialize(raw) {
                Ok(ts) => record.last_updated = ts,
                Err(err) => problems.push(format!("lastUpdated: {err}")),
            }
        }
        if let Some(raw) = fields.remove("error") {
            match serde_json::from_value::<Option<String>>(raw) {
                Ok(detail) => record.error_detail = detail,
                Err(err) => problems.push(format!("error: {err}")),
            }
        }

        record.extra = fields;
        record.malformed = Some(if problems.is_empty() {
            strict_err.to_string()
        } else {
            problems.join("; ")
        });
        Ok(record)
    }

    /// Timestamp for the next transition. Never earlier than the current one.
    fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_updated {
            Some(prev) if prev > now => prev,
            _ => now,
        }
    }

    /// `waiting -> in-progress`, or `None` when the record is not claimable.
    ///
    /// This is the claim transform; it is pure so a store may run it
    /// more than once while retrying.
    pub fn claimed(&self, now: DateTime<Utc>) -> Option<TaskRecord> {
        if !self.status.is_claimable() {
            return None;
        }
        let mut next = self.clone();
        next.status = TaskStatus::InProgress;
        next.last_updated = Some(self.stamp(now));
        Some(next)
    }

    /// Terminal patch for an executor result: `done` clears the error,
    /// `error` records its description.
    pub fn finish(
        &self,
        now: DateTime<Utc>,
        result: Result<(), &ExecutionError>,
    ) -> Result<RecordPatch, TransitionError> {
        let (to, error_detail) = match result {
            Ok(()) => (TaskStatus::Done, None),
            Err(err) => (TaskStatus::Error, Some(err.to_string())),
        };
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }
        Ok(RecordPatch {
            status: to,
            last_updated: self.stamp(now),
            error_detail,
        })
    }

    /// Merge a patch into this record (what an unconditional update does).
    pub fn apply(&mut self, patch: &RecordPatch) {
        self.status = patch.status;
        self.last_updated = Some(patch.last_updated);
        self.error_detail = patch.error_detail.clone();
    }
}

/// Fields written by an unconditional terminal update.
///
/// `error_detail: None` serializes as `null`, which removes the field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordPatch {
    pub status: TaskStatus,

    #[serde(rename = "lastUpdated", serialize_with = "timestamp::serialize_required")]
    pub last_updated: DateTime<Utc>,

    #[serde(rename = "error")]
    pub error_detail: Option<String>,
}

/// Field a `find_one` query filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Status,
    PayloadRef,
}

impl RecordField {
    /// JSON key of the field.
    pub fn key(self) -> &'static str {
        match self {
            RecordField::Status => "status",
            RecordField::PayloadRef => "path",
        }
    }

    pub fn value_of(self, record: &TaskRecord) -> &str {
        match self {
            RecordField::Status => record.status.as_str(),
            RecordField::PayloadRef => record.payload_ref.as_str(),
        }
    }
}

/// RFC 3339, UTC, millisecond precision, `Z` suffix.
///
/// Also reads epoch milliseconds, which is what `ServerValue.TIMESTAMP` writes.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serialize_required(ts, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn serialize_required<S: Serializer>(
        ts: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Millis(i64),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Text(raw)) => DateTime::parse_from_rfc3339(&raw)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            Some(Raw::Millis(ms)) => DateTime::from_timestamp_millis(ms)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }
}
