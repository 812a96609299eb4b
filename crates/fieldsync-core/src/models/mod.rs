//! Data models for fieldsync

mod conflict;
mod cursor;
mod operation;
mod record;

pub use conflict::{Conflict, Decision};
pub use cursor::SyncCursor;
pub use operation::{Operation, OperationId, OperationKind, OperationStatus};
pub use record::{Mutation, Record, RecordId, RecordKey};

pub(crate) use record::{validate_collection, validate_payload};
