//! Shared sync loop state.

use serde::Serialize;

/// State of the retry/trigger loop.
///
/// `Idle -> Syncing -> Idle` on success, `Idle -> Syncing -> Backoff -> Idle`
/// after a retryable failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Idle,
    Syncing,
    /// Waiting until `retry_at` (Unix ms) or the next trigger
    Backoff { retry_at: i64 },
    /// The loop has shut down
    Stopped,
}

impl LoopState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Backoff { .. } => "backoff",
            Self::Stopped => "stopped",
        }
    }
}
