//! Reconnection supervisor
//!
//! Runs one session (dispatcher + poller) at a time. A hard transport fault
//! ends the session; the supervisor then closes the transport, fails
//! everything queued and retries `open` a bounded number of times before
//! starting a fresh session or settling in `Disconnected`. A dispatcher or
//! poller that stops on its own drops the connection outright.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::connection::{ConnectionConfig, Link};
use super::dispatcher::Dispatcher;
use super::poller::Poller;
use super::{ConnectionState, TransportError};
use crate::events::RegulatorEvent;

/// Why a session stopped
enum SessionEnd {
    Cancelled,
    Fault(TransportError),
    /// A session task returned while the session was still live
    Stopped(&'static str),
}

pub(crate) struct Supervisor {
    link: Arc<Link>,
    config: ConnectionConfig,
}

impl Supervisor {
    pub fn new(link: Arc<Link>, config: ConnectionConfig) -> Self {
        Self { link, config }
    }

    /// Keep sessions running until cancelled or reconnection gives up
    pub async fn supervise(self, cancel: CancellationToken) {
        loop {
            let session = cancel.child_token();
            let (fault_tx, mut fault_rx) = mpsc::channel(1);

            let dispatcher = tokio::spawn(
                Dispatcher::new(self.link.clone(), self.config.retry.clone())
                    .run(session.clone(), fault_tx),
            );
            let mut poller = tokio::spawn(
                Poller::new(
                    self.link.queue.clone(),
                    self.config.port.polling_interval(),
                    self.config.protection_poll_interval(),
                )
                .run(session.clone()),
            );

            let mut poller_joined = false;
            let end = tokio::select! {
                biased;
                _ = cancel.cancelled() => SessionEnd::Cancelled,
                fault = fault_rx.recv() => match fault {
                    Some(fault) => SessionEnd::Fault(fault),
                    None => SessionEnd::Stopped("dispatcher"),
                },
                joined = &mut poller => {
                    poller_joined = true;
                    if let Err(e) = joined {
                        error!("poller task failed: {}", e);
                    }
                    SessionEnd::Stopped("poller")
                }
            };

            session.cancel();
            if let Err(e) = dispatcher.await {
                error!("dispatcher task failed: {}", e);
            }
            if !poller_joined {
                if let Err(e) = poller.await {
                    error!("poller task failed: {}", e);
                }
            }

            match end {
                SessionEnd::Fault(fault) => {
                    if !self.reconnect(&cancel, &fault).await {
                        break;
                    }
                }
                SessionEnd::Cancelled => break,
                SessionEnd::Stopped(_) if cancel.is_cancelled() => break,
                SessionEnd::Stopped(task) => {
                    self.drop_connection(task).await;
                    break;
                }
            }
        }
    }

    /// A session task ended on its own; nothing left to keep the link alive
    async fn drop_connection(&self, task: &str) {
        error!("{} stopped unexpectedly, dropping connection", task);
        let failed = self.link.queue.close();
        if failed > 0 {
            info!("{} queued commands failed", failed);
        }
        self.link.transport.lock().await.close().await;
        self.link.state.transition(ConnectionState::Disconnected);
        self.link.events.publish(RegulatorEvent::ErrorOccurred(format!(
            "Connection dropped: {} stopped",
            task
        )));
    }

    /// Bounded reconnect after `fault`. Returns `true` once connected again.
    pub async fn reconnect(&self, cancel: &CancellationToken, fault: &TransportError) -> bool {
        let policy = &self.config.reconnect;
        warn!("connection lost ({}), reconnecting", fault);
        self.link.state.transition(ConnectionState::Connecting);
        self.link
            .events
            .publish(RegulatorEvent::ErrorOccurred(format!("Connection lost: {}", fault)));

        let failed = self.link.queue.close();
        if failed > 0 {
            info!("{} queued commands failed by connection loss", failed);
        }
        self.link.transport.lock().await.close().await;

        let settings = self.link.port_settings();
        for attempt in 1..=policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(policy.delay()) => {}
            }

            info!("reconnect attempt {}/{}", attempt, policy.max_attempts);
            let opened = self.link.transport.lock().await.open(&settings).await;
            match opened {
                Ok(()) => {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    self.link.queue.reopen();
                    self.link.state.transition(ConnectionState::Connected);
                    info!("reconnected on attempt {}", attempt);
                    return true;
                }
                Err(e) => warn!("reconnect attempt {} failed: {}", attempt, e),
            }
        }

        error!("giving up after {} reconnect attempts", policy.max_attempts);
        self.link.state.transition(ConnectionState::Disconnected);
        self.link.events.publish(RegulatorEvent::ErrorOccurred(format!(
            "Reconnect failed after {} attempts",
            policy.max_attempts
        )));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::SimulatedRegulator;
    use crate::events::EventBus;
    use crate::protocol::Transport;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_dead_poller_drops_connection() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        // validate() would refuse this; the supervisor must still not hang on it
        let mut config = ConnectionConfig::for_port("sim");
        config.protection_poll_interval_ms = 0;
        let link = Arc::new(Link::new(config.clone(), SimulatedRegulator::new(), events));
        link.transport.lock().await.open(&config.port).await.unwrap();
        link.queue.reopen();
        link.state.transition(ConnectionState::Connected);

        let supervisor = Supervisor::new(link.clone(), config);
        tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.supervise(CancellationToken::new()),
        )
        .await
        .expect("supervisor kept a dead session alive");

        assert_eq!(link.state.get(), ConnectionState::Disconnected);
        assert!(link.queue.is_closed());
        assert!(!link.transport.lock().await.is_open());

        let mut reported = false;
        while let Ok(event) = rx.try_recv() {
            if let RegulatorEvent::ErrorOccurred(message) = event {
                reported |= message.contains("poller");
            }
        }
        assert!(reported);
    }
}
