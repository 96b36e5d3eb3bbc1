//! Command queue and dispatcher
//!
//! One loop owns the transport's read/write side and keeps at most one
//! command in flight. Commands complete in FIFO order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::completion::{CommandHandle, PendingCommand};
use super::connection::{Link, RetryPolicy};
use super::{
    decode, encode, parse_header, Command, CommandKind, Frame, ParsedResponse, ProtocolError,
    TransportError, RESPONSE_HEADER_LEN,
};
use crate::events::RegulatorEvent;

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<PendingCommand>,
    /// A closed queue rejects new commands (resolving them `false`)
    closed: bool,
}

#[derive(Debug, Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// FIFO of pending commands shared by submitters and the dispatcher
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    /// Open, empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that rejects commands until [`reopen`](Self::reopen)
    pub fn closed() -> Self {
        let queue = Self::default();
        queue.lock().closed = true;
        queue
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a command and get a handle to its outcome
    pub fn submit(&self, command: Command) -> CommandHandle {
        let (pending, handle) = PendingCommand::new(command);
        self.push(pending);
        handle
    }

    /// Fire-and-forget: same queue, outcome ignored
    pub fn post(&self, command: Command) {
        let (pending, _handle) = PendingCommand::new(command);
        self.push(pending);
    }

    /// Append, or resolve `false` at once if the queue is closed
    pub fn push(&self, pending: PendingCommand) {
        let mut state = self.lock();
        if state.closed {
            drop(state);
            debug!("queue closed, rejecting {:?}", pending.command);
            pending.resolve(false);
            return;
        }
        state.entries.push_back(pending);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Oldest waiting command
    pub fn pop(&self) -> Option<PendingCommand> {
        self.lock().entries.pop_front()
    }

    /// Number of waiting commands
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// No command waiting
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Whether new commands are rejected
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether a command of this kind is still waiting
    pub fn contains(&self, kind: CommandKind) -> bool {
        self.lock().entries.iter().any(|p| p.command.kind() == kind)
    }

    /// Stop accepting commands and fail everything waiting
    pub fn close(&self) -> usize {
        let drained: Vec<PendingCommand> = {
            let mut state = self.lock();
            state.closed = true;
            state.entries.drain(..).collect()
        };
        let count = drained.len();
        for pending in drained {
            pending.resolve(false);
        }
        if count > 0 {
            debug!("queue closed, {} pending commands failed", count);
        }
        count
    }

    /// Accept commands again
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    /// Sleep until something is queued or `idle` elapses
    pub async fn wait(&self, idle: Duration) {
        let _ = tokio::time::timeout(idle, self.inner.notify.notified()).await;
    }
}

enum Outcome {
    Done(ParsedResponse),
    Exhausted(ProtocolError),
    Fault(TransportError),
    Cancelled,
}

/// Serialized command-processing loop
pub(crate) struct Dispatcher {
    link: Arc<Link>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(link: Arc<Link>, policy: RetryPolicy) -> Self {
        Self { link, policy }
    }

    /// Run until cancelled or a transport fault, which is reported on `faults`
    pub async fn run(self, cancel: CancellationToken, faults: mpsc::Sender<TransportError>) {
        debug!("dispatcher started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let Some(pending) = self.link.queue.pop() else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.link.queue.wait(self.policy.idle_wait()) => {}
                }
                continue;
            };

            let command = pending.command;
            match self.execute(&command, &cancel).await {
                Outcome::Done(response) => {
                    let projection = self.link.project(&command, response);
                    pending.resolve(projection.success);
                    if !projection.success {
                        if let RegulatorEvent::CommandAcknowledged { code, .. } = projection.event {
                            self.link.events.publish(RegulatorEvent::ErrorOccurred(format!(
                                "{:?} rejected by regulator (code {:#04x})",
                                command.kind(),
                                code
                            )));
                        }
                    }
                    self.link.events.publish(projection.event);
                }
                Outcome::Exhausted(last) => {
                    pending.resolve(false);
                    warn!(
                        "{:?} failed after {} attempts: {}",
                        command.kind(),
                        self.policy.max_attempts,
                        last
                    );
                    self.link.events.publish(RegulatorEvent::ErrorOccurred(format!(
                        "{:?} failed after {} attempts: {}",
                        command.kind(),
                        self.policy.max_attempts,
                        last
                    )));
                }
                Outcome::Fault(fault) => {
                    pending.resolve(false);
                    error!("transport fault during {:?}: {}", command.kind(), fault);
                    let _ = faults.send(fault).await;
                    break;
                }
                Outcome::Cancelled => {
                    pending.resolve(false);
                    break;
                }
            }
        }
        debug!("dispatcher stopped");
    }

    /// Up to `max_attempts` exchanges with `retry_delay` between them
    async fn execute(&self, command: &Command, cancel: &CancellationToken) -> Outcome {
        let frame = encode(command);
        let kind = command.kind();
        let attempts = self.policy.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Outcome::Cancelled,
                    _ = tokio::time::sleep(self.policy.retry_delay()) => {}
                }
            }

            match self.exchange(kind, &frame).await {
                Ok(response) => return Outcome::Done(response),
                Err(ProtocolError::Transport(e)) if e.is_fatal() => return Outcome::Fault(e),
                Err(e) => {
                    warn!("{:?} attempt {}/{} failed: {}", kind, attempt, attempts, e);
                    last = Some(e);
                }
            }

            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
        }

        Outcome::Exhausted(last.unwrap_or(ProtocolError::Transport(TransportError::Timeout {
            expected: RESPONSE_HEADER_LEN,
        })))
    }

    /// One write/read round trip
    async fn exchange(&self, kind: CommandKind, frame: &Frame) -> Result<ParsedResponse, ProtocolError> {
        let settings = self.link.port_settings();
        let read_timeout = settings.read_timeout();
        let mut transport = self.link.transport.lock().await;

        transport.write(frame.as_bytes()).await?;
        transport.discard_buffers().await?;
        tokio::time::sleep(settings.response_delay()).await;

        let header = transport
            .read_exact(RESPONSE_HEADER_LEN, read_timeout)
            .await
            .inspect_err(log_short_read)?;
        let length = parse_header(&header).inspect_err(|e| {
            warn!("rejecting response header {:02x?}: {}", header, e);
        })?;

        let rest = transport
            .read_exact(length + 1, read_timeout)
            .await
            .inspect_err(log_short_read)?;

        let mut bytes = header;
        bytes.extend_from_slice(&rest);
        decode(&bytes, kind)
            .inspect_err(|e| warn!("rejecting response {:02x?}: {}", bytes, e))
            .map_err(ProtocolError::from)
    }
}

fn log_short_read(e: &TransportError) {
    if let TransportError::ShortRead { expected, received } = e {
        warn!(
            "short read: {} of {} bytes before timeout: {:02x?}",
            received.len(),
            expected,
            received
        );
    }
}
