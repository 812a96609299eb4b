//! fieldsync-core - Offline-first record synchronization
//!
//! This crate contains the local store, the durable operation queue, the
//! conflict detector and the sync engine shared by the fieldsync CLI and
//! any embedding application.

pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod models;
pub mod resolution;
pub mod state;
pub mod store;
pub mod sync;
mod util;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use models::{
    Conflict, Decision, Mutation, Operation, OperationId, OperationKind, OperationStatus, Record,
    RecordId, RecordKey, SyncCursor,
};
pub use resolution::{NeedsAttention, ResolutionBatch, ResolutionOutcome, ResolutionReport};
pub use state::LoopState;
pub use store::{LocalStore, MergeReport, StoreEvent, StoreStatus};
pub use sync::{
    ChannelTrigger, ConnectivityTrigger, HttpRemote, InMemoryRemote, ProbeTrigger, RemoteError,
    RemoteStore, StoredRecord, SyncEngine, SyncHandle, SyncReport, Trigger, TriggerSender,
};
