//! Domain identifiers.
//!
//! # ID の扱い
//! タスク ID は producer 側が採番する不透明な文字列で、コアは中身を解釈しません。
//! `tasuki enqueue` から投入する場合だけ ULID を使います（`ports::UlidGenerator`）。
//! ULID は時刻でソート可能なので、キー順 = 投入順 になります。
//!
//! `PayloadRef` も同様に不透明な参照（ストレージ上のパスなど）で、
//! JobExecutor にそのまま渡されます。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a task record within one queue namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid.to_string())
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque reference to the data a job works on.
///
/// Records written without a `path` decode to the empty reference; the
/// executor is expected to reject it so the record lands in `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadRef(String);

impl PayloadRef {
    pub fn new(payload_ref: impl Into<String>) -> Self {
        Self(payload_ref.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PayloadRef {
    fn from(payload_ref: &str) -> Self {
        Self::new(payload_ref)
    }
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
