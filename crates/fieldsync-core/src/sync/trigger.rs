//! Connectivity and visibility signal sources for the trigger loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::remote::RemoteStore;
use super::scheduler::Trigger;

/// A source of sync triggers, e.g. OS connectivity or app visibility events.
#[async_trait]
pub trait ConnectivityTrigger: Send {
    /// Wait for the next signal. `None` ends the source.
    async fn next_trigger(&mut self) -> Option<Trigger>;
}

/// Trigger source fed by the host application.
pub struct ChannelTrigger {
    receiver: mpsc::Receiver<Trigger>,
}

/// Sending half of a [`ChannelTrigger`].
#[derive(Clone)]
pub struct TriggerSender {
    sender: mpsc::Sender<Trigger>,
}

impl ChannelTrigger {
    pub fn new(capacity: usize) -> (TriggerSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (TriggerSender { sender }, Self { receiver })
    }
}

impl TriggerSender {
    pub fn connectivity_regained(&self) {
        self.send(Trigger::ConnectivityRegained);
    }

    pub fn foreground(&self) {
        self.send(Trigger::Foreground);
    }

    pub fn send(&self, trigger: Trigger) {
        // Dropped when full; a pass is already on its way
        self.sender.try_send(trigger).ok();
    }
}

#[async_trait]
impl ConnectivityTrigger for ChannelTrigger {
    async fn next_trigger(&mut self) -> Option<Trigger> {
        self.receiver.recv().await
    }
}

/// Polls the remote health check and fires on every offline to online transition.
pub struct ProbeTrigger {
    remote: Arc<dyn RemoteStore>,
    interval: Duration,
    timeout: Duration,
    online: Option<bool>,
}

impl ProbeTrigger {
    pub fn new(remote: Arc<dyn RemoteStore>, interval: Duration, timeout: Duration) -> Self {
        Self {
            remote,
            interval,
            timeout,
            online: None,
        }
    }

    async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, self.remote.health()).await,
            Ok(Ok(()))
        )
    }
}

#[async_trait]
impl ConnectivityTrigger for ProbeTrigger {
    async fn next_trigger(&mut self) -> Option<Trigger> {
        loop {
            let online = self.probe().await;
            let previous = self.online.replace(online);
            match (previous, online) {
                (Some(false), true) => {
                    tracing::info!("Remote reachable again");
                    return Some(Trigger::ConnectivityRegained);
                }
                (Some(true) | None, false) => tracing::debug!("Remote unreachable"),
                _ => {}
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
