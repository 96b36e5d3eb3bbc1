//! Command completion signaling
//!
//! Every queued command carries a [`Completion`] that resolves exactly once.
//! Resolving consumes the completion, and dropping an unresolved one
//! resolves it `false`, so a command can never vanish without an answer.

use tokio::sync::oneshot;

use super::Command;

/// Resolver side, owned by whoever holds the queued command
#[derive(Debug)]
pub struct Completion {
    tx: Option<oneshot::Sender<bool>>,
}

impl Completion {
    /// Resolve with the command's outcome
    pub fn resolve(mut self, success: bool) {
        if let Some(tx) = self.tx.take() {
            // The submitter may have stopped waiting; that's fine.
            let _ = tx.send(success);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(false);
        }
    }
}

/// Awaitable side returned to the submitter
#[derive(Debug)]
pub struct CommandHandle {
    rx: oneshot::Receiver<bool>,
}

impl CommandHandle {
    /// Wait for the outcome: `true` on success, `false` on failure,
    /// retry exhaustion or disconnect
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

/// Create a linked completion/handle pair
pub fn completion_pair() -> (Completion, CommandHandle) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx: Some(tx) }, CommandHandle { rx })
}

/// A command waiting in (or taken from) the queue
#[derive(Debug)]
pub struct PendingCommand {
    /// What to send
    pub command: Command,
    /// Resolved once the command finishes
    pub completion: Completion,
}

impl PendingCommand {
    /// New pending command plus the handle its submitter awaits
    pub fn new(command: Command) -> (Self, CommandHandle) {
        let (completion, handle) = completion_pair();
        (
            Self {
                command,
                completion,
            },
            handle,
        )
    }

    /// Resolve the completion with `success`
    pub fn resolve(self, success: bool) {
        self.completion.resolve(success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_true() {
        let (pending, handle) = PendingCommand::new(Command::GetParameters);
        pending.resolve(true);
        assert!(handle.wait().await);
    }

    #[tokio::test]
    async fn test_drop_resolves_false() {
        let (pending, handle) = PendingCommand::new(Command::ResetProtection);
        drop(pending);
        assert!(!handle.wait().await);
    }

    #[test]
    fn test_abandoned_handle_does_not_panic() {
        let (pending, handle) = PendingCommand::new(Command::GetParameters);
        drop(handle);
        pending.resolve(true);
    }
}
