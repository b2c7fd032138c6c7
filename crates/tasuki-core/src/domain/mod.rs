//! Domain model (IDs, task status, records, errors).

pub mod errors;
pub mod ids;
pub mod record;
pub mod state;

pub use self::errors::{ExecutionError, StoreError, TransitionError};
pub use self::ids::{PayloadRef, TaskId};
pub use self::record::{RecordField, RecordPatch, TaskRecord};
pub use self::state::TaskStatus;
