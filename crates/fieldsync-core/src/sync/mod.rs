//! Sync engine: remote port, reconciliation and the background trigger loop.

mod backoff;
mod http;
mod memory;
mod orchestrator;
mod remote;
mod scheduler;
mod trigger;


pub use backoff::retry_delay;
pub use http::HttpRemote;
pub use memory::InMemoryRemote;
pub use orchestrator::{PullReport, PushReport, SyncEngine, SyncReport};
pub use remote::{
    ChangesPage, ChangesQuery, DeleteBody, DeleteRequest, ErrorBody, RemoteError, RemoteStore,
    StoredRecord, UpsertBody, UpsertRequest,
};
pub use scheduler::{SyncHandle, Trigger};
pub use trigger::{ChannelTrigger, ConnectivityTrigger, ProbeTrigger, TriggerSender};
