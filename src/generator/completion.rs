use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use crate::foundation::core::{InstanceId, TaskId};
use crate::host::state::OpKind;

/// Cooperative cancellation flag shared between the host and one task.
///
/// Cancellation is a request: the host sets it, generator code observes it at its next
/// continuation boundary and stops on its own.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Fresh, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Which outstanding operation a completion belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Ticket {
    pub(crate) instance: InstanceId,
    pub(crate) op: OpKind,
    pub(crate) task: Option<TaskId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Failed(String),
    Abandoned,
}

#[derive(Debug)]
pub(crate) struct Signal {
    pub(crate) ticket: Ticket,
    pub(crate) outcome: Outcome,
}

/// Single-shot completion signal of one lifecycle operation.
///
/// Firing consumes the value, so a second signal cannot be sent. Dropping it without firing
/// reports the operation as abandoned. The signal may be moved to another thread and fired
/// from there.
pub struct Completion {
    ticket: Ticket,
    tx: Sender<Signal>,
    fired: bool,
}

impl Completion {
    pub(crate) fn new(ticket: Ticket, tx: Sender<Signal>) -> Self {
        Self {
            ticket,
            tx,
            fired: false,
        }
    }

    /// Signal successful completion.
    pub fn complete(mut self) {
        self.send(Outcome::Completed);
    }

    /// Signal failure. The host treats this as a fault of the instance.
    pub fn fail(mut self, message: impl Into<String>) {
        self.send(Outcome::Failed(message.into()));
    }

    /// Operation this signal completes.
    pub fn op(&self) -> OpKind {
        self.ticket.op
    }

    /// Generation task this signal completes, for `generate`.
    pub fn task(&self) -> Option<TaskId> {
        self.ticket.task
    }

    fn send(&mut self, outcome: Outcome) {
        self.fired = true;
        // a closed channel means the host is gone
        let _ = self.tx.send(Signal {
            ticket: self.ticket,
            outcome,
        });
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.fired {
            self.send(Outcome::Abandoned);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("instance", &self.ticket.instance)
            .field("op", &self.ticket.op)
            .field("task", &self.ticket.task)
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/generator/completion.rs"]
mod tests;
