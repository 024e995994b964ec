use std::fmt;

use crate::foundation::core::{InstanceId, TaskId};
use crate::foundation::error::{EaselError, GeneratorFault, LifecycleViolation};

/// Why an instance was torn down against its will.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    /// Generator code failed, panicked, abandoned a completion or timed out.
    Fault(GeneratorFault),
    /// The instance broke the lifecycle contract.
    Violation(LifecycleViolation),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fault(e) => e.fmt(f),
            Self::Violation(e) => e.fmt(f),
        }
    }
}

impl From<FailureCause> for EaselError {
    fn from(cause: FailureCause) -> Self {
        match cause {
            FailureCause::Fault(e) => e.into(),
            FailureCause::Violation(e) => e.into(),
        }
    }
}

/// Notifications surfaced to whatever loaded the generators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// `initialize` was invoked.
    Loaded {
        /// Instance.
        instance: InstanceId,
    },
    /// `initialize` completed; the surface is available.
    Ready {
        /// Instance.
        instance: InstanceId,
    },
    /// `generate` was invoked for a new task.
    GenerationStarted {
        /// Instance.
        instance: InstanceId,
        /// New task.
        task: TaskId,
    },
    /// An in-flight task was superseded or its instance is being unloaded.
    GenerationCancelled {
        /// Instance.
        instance: InstanceId,
        /// Cancelled task.
        task: TaskId,
    },
    /// The current task completed; the instance is idle.
    GenerationCompleted {
        /// Instance.
        instance: InstanceId,
        /// Completed task.
        task: TaskId,
    },
    /// A superseded task signalled completion; nothing changed.
    StaleCompletionIgnored {
        /// Instance.
        instance: InstanceId,
        /// Stale task.
        task: TaskId,
    },
    /// The instance failed and is being torn down. Emitted at most once per instance.
    Failed {
        /// Instance.
        instance: InstanceId,
        /// What went wrong.
        cause: FailureCause,
    },
    /// `destroy` completed (or the instance was abandoned during it).
    Unloaded {
        /// Instance.
        instance: InstanceId,
    },
}

impl HostEvent {
    /// Instance the event is about.
    pub fn instance(&self) -> InstanceId {
        match self {
            Self::Loaded { instance }
            | Self::Ready { instance }
            | Self::GenerationStarted { instance, .. }
            | Self::GenerationCancelled { instance, .. }
            | Self::GenerationCompleted { instance, .. }
            | Self::StaleCompletionIgnored { instance, .. }
            | Self::Failed { instance, .. }
            | Self::Unloaded { instance } => *instance,
        }
    }
}

/// Per-instance counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstanceStats {
    /// `generate` calls issued.
    pub generations_started: u64,
    /// Tasks that completed while current.
    pub generations_completed: u64,
    /// Tasks cancelled before completing.
    pub generations_cancelled: u64,
    /// Completions ignored because their task was superseded.
    pub stale_completions: u64,
    /// Continuations delivered.
    pub timers_fired: u64,
    /// Timers dropped by the host at teardown.
    pub timers_purged: u64,
}
