//! Telemetry polling
//!
//! While connected, keeps `GetParameters` flowing at the polling interval
//! and asks for protection status on a slower cadence. Polls go through the
//! ordinary queue; a poll is skipped while an identical one is still waiting.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Command, CommandQueue};

pub(crate) struct Poller {
    queue: CommandQueue,
    telemetry_interval: Duration,
    protection_interval: Duration,
}

impl Poller {
    pub fn new(queue: CommandQueue, telemetry_interval: Duration, protection_interval: Duration) -> Self {
        Self {
            queue,
            telemetry_interval,
            protection_interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        debug!(
            "polling every {}ms, protection every {}ms",
            self.telemetry_interval.as_millis(),
            self.protection_interval.as_millis()
        );
        let mut telemetry = interval(self.telemetry_interval);
        telemetry.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut protection = interval(self.protection_interval);
        protection.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = telemetry.tick() => self.poll(Command::GetParameters),
                _ = protection.tick() => self.poll(Command::GetProtectionStatus),
            }
        }
        debug!("polling stopped");
    }

    fn poll(&self, command: Command) {
        if self.queue.contains(command.kind()) {
            trace!("{:?} still queued, skipping poll", command.kind());
            return;
        }
        self.queue.post(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_polls_coalesce_while_queued() {
        let queue = CommandQueue::new();
        let cancel = CancellationToken::new();
        let poller = Poller::new(
            queue.clone(),
            Duration::from_millis(500),
            Duration::from_secs(5),
        );
        let task = tokio::spawn(poller.run(cancel.clone()));

        // nothing drains the queue, so each kind is queued at most once
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(crate::protocol::CommandKind::GetParameters));
        assert!(queue.contains(crate::protocol::CommandKind::GetProtectionStatus));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cadence() {
        let queue = CommandQueue::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Poller::new(queue.clone(), Duration::from_millis(500), Duration::from_secs(5))
                .run(cancel.clone()),
        );

        let mut parameters = 0;
        let mut protection = 0;
        // drain in 100ms steps for 5.1s
        for _ in 0..51 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            while let Some(pending) = queue.pop() {
                match pending.command {
                    Command::GetParameters => parameters += 1,
                    Command::GetProtectionStatus => protection += 1,
                    other => panic!("unexpected poll {:?}", other),
                }
                pending.resolve(true);
            }
        }
        cancel.cancel();
        task.await.unwrap();

        // ticks at 0, 500, ..., 5000ms
        assert_eq!(parameters, 11);
        // ticks at 0 and 5000ms
        assert_eq!(protection, 2);
    }
}
