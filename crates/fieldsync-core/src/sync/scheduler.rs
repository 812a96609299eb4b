//! Retry/trigger loop driving the sync engine in the background.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::backoff::retry_delay;
use super::orchestrator::{SyncEngine, SyncReport};
use super::trigger::ConnectivityTrigger;
use crate::state::LoopState;
use crate::util::now_millis;

const COMMAND_CAPACITY: usize = 32;

/// Why a sync pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    ConnectivityRegained,
    /// The application regained focus or visibility
    Foreground,
    Manual,
    Periodic,
    /// A backoff delay elapsed
    RetryDue,
    /// Recovery pass that ignores cursors and backoff
    ForceFull,
}

impl Trigger {
    /// Combine two pending triggers into the one pass that serves both.
    #[must_use]
    pub const fn coalesce(self, other: Self) -> Self {
        match (self, other) {
            (Self::ForceFull, _) | (_, Self::ForceFull) => Self::ForceFull,
            (first, _) => first,
        }
    }
}

#[derive(Debug)]
enum Command {
    Trigger(Trigger),
    Shutdown,
}

/// Handle to a running trigger loop.
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<LoopState>,
    reports: watch::Receiver<Option<SyncReport>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Start the loop on the current tokio runtime.
    ///
    /// With a sync interval configured, the first pass runs immediately.
    pub fn spawn(engine: SyncEngine) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state) = watch::channel(LoopState::Idle);
        let (reports_tx, reports) = watch::channel(None);

        let task = tokio::spawn(run_loop(engine, receiver, state_tx, reports_tx));

        Self {
            commands,
            state,
            reports,
            task,
        }
    }

    /// Request a pass. Returns `false` once the loop has stopped.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        send_trigger(&self.commands, trigger)
    }

    pub fn force_full_sync(&self) -> bool {
        self.trigger(Trigger::ForceFull)
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.reports.borrow().clone()
    }

    pub fn watch_reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.clone()
    }

    /// Forward signals from a connectivity source until it is exhausted.
    pub fn attach(&self, mut source: impl ConnectivityTrigger + 'static) -> JoinHandle<()> {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            while let Some(trigger) = source.next_trigger().await {
                if !send_trigger(&commands, trigger) {
                    break;
                }
            }
        })
    }

    /// Stop the loop after any in-flight pass completes.
    pub async fn shutdown(self) {
        if self.commands.send(Command::Shutdown).await.is_ok() {
            if let Err(error) = self.task.await {
                tracing::error!("Sync loop terminated abnormally: {error}");
            }
        }
    }
}

fn send_trigger(commands: &mpsc::Sender<Command>, trigger: Trigger) -> bool {
    match commands.try_send(Command::Trigger(trigger)) {
        // A full queue already guarantees a follow-up pass
        Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn run_loop(
    engine: SyncEngine,
    mut commands: mpsc::Receiver<Command>,
    state: watch::Sender<LoopState>,
    reports: watch::Sender<Option<SyncReport>>,
) {
    let mut ticker = engine.config().sync_interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut pending: Option<Trigger> = None;
    let mut retry_at: Option<i64> = None;
    let mut failures: u32 = 0;

    loop {
        let trigger = match pending.take() {
            Some(trigger) => trigger,
            None => {
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(Command::Trigger(trigger)) => trigger,
                        Some(Command::Shutdown) | None => break,
                    },
                    () = tick(ticker.as_mut()) => Trigger::Periodic,
                    () = sleep_until(retry_at) => Trigger::RetryDue,
                }
            }
        };

        state.send_replace(LoopState::Syncing);
        tracing::debug!(?trigger, "Starting sync pass");
        let result = if trigger == Trigger::ForceFull {
            engine.force_full_sync().await
        } else {
            engine.run_pass().await
        };

        // Triggers that arrived during the pass collapse into one follow-up
        let mut shutdown = false;
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Trigger(next) => {
                    pending = Some(pending.map_or(next, |current| current.coalesce(next)));
                }
                Command::Shutdown => shutdown = true,
            }
        }

        let needs_retry = match result {
            Ok(report) => {
                let needs_retry = report.needs_retry();
                reports.send_replace(Some(report));
                needs_retry
            }
            Err(error) => {
                tracing::error!("Sync pass failed: {error}");
                true
            }
        };

        failures = if needs_retry { failures.saturating_add(1) } else { 0 };
        retry_at = next_wakeup(&engine, needs_retry.then_some(failures)).await;
        match retry_at {
            Some(at) => {
                tracing::info!(retry_at = at, "Sync loop backing off");
                state.send_replace(LoopState::Backoff { retry_at: at });
            }
            None => {
                state.send_replace(LoopState::Idle);
            }
        }

        if shutdown {
            break;
        }
    }

    state.send_replace(LoopState::Stopped);
    tracing::debug!("Sync loop stopped");
}

/// When the loop should wake on its own: the earliest backed-off operation,
/// or a pass-level retry after `failures` consecutive failed passes.
async fn next_wakeup(engine: &SyncEngine, failures: Option<u32>) -> Option<i64> {
    let operation_due = match engine.next_retry_at().await {
        Ok(at) => at,
        Err(error) => {
            tracing::warn!("Could not read retry schedule: {error}");
            None
        }
    };
    let pass_retry = failures.map(|failures| {
        let config = engine.config();
        let delay = retry_delay(
            config.backoff_base,
            config.backoff_max,
            failures.saturating_sub(1),
        );
        now_millis().saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
    });

    match (operation_due, pass_retry) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(retry_at: Option<i64>) {
    match retry_at {
        Some(at) => {
            let wait = u64::try_from(at.saturating_sub(now_millis())).unwrap_or(0);
            tokio::time::sleep_until(Instant::now() + Duration::from_millis(wait)).await;
        }
        None => std::future::pending().await,
    }
}
