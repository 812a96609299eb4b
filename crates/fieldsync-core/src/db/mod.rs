//! Database layer for fieldsync

mod conflict_repository;
mod connection;
mod migrations;
mod queue_repository;
mod record_repository;

pub use conflict_repository::{LibSqlConflictRepository, LibSqlCursorRepository};
pub use connection::Database;
pub use queue_repository::{LibSqlOperationQueue, OperationQueue};
pub use record_repository::{LibSqlRecordRepository, RecordRepository};

use libsql::Value;

fn opt_text(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

fn opt_integer(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}
