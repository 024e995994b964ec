use std::fmt;

use crate::foundation::core::InstanceId;
use crate::host::state::{LifecycleState, OpKind};

/// Convenience result type used across easel.
pub type EaselResult<T> = Result<T, EaselError>;

/// Top-level error taxonomy used by host and schema APIs.
#[derive(thiserror::Error, Debug)]
pub enum EaselError {
    /// Invalid configuration or descriptor construction.
    #[error("validation error: {0}")]
    Validation(String),

    /// A candidate setting value was rejected by its schema.
    #[error(transparent)]
    Setting(#[from] SettingError),

    /// An operation was requested out of lifecycle order.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleViolation),

    /// A generator failed, panicked, abandoned its completion or timed out.
    #[error(transparent)]
    Fault(#[from] GeneratorFault),

    /// Host scheduler failures (e.g. the step budget of one run was exhausted).
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Errors when serializing or deserializing settings and options.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EaselError {
    /// Build a [`EaselError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`EaselError::Runtime`] value.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Build a [`EaselError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

/// A candidate value that does not fit the declared setting.
///
/// These never reach the generator: the controller reports them to whoever attempted the write
/// and keeps the previous value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingError {
    /// Key of the setting the candidate was written to.
    pub key: String,
    /// Human readable reason.
    pub message: String,
}

impl SettingError {
    pub(crate) fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid setting $.{}: {}", self.key, self.message)
    }
}

impl std::error::Error for SettingError {}

/// An operation invoked in a lifecycle state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleViolation {
    /// Instance the operation targeted.
    pub instance: InstanceId,
    /// State the instance was in.
    pub state: LifecycleState,
    /// What was attempted.
    pub operation: String,
}

impl LifecycleViolation {
    pub(crate) fn new(
        instance: InstanceId,
        state: LifecycleState,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            instance,
            state,
            operation: operation.into(),
        }
    }
}

impl fmt::Display for LifecycleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lifecycle violation on instance {}: cannot {} while {}",
            self.instance, self.operation, self.state
        )
    }
}

impl std::error::Error for LifecycleViolation {}

/// Why a generator was declared faulty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultReason {
    /// The operation returned an error or signalled failure through its completion.
    Error(String),
    /// Generator code panicked.
    Panicked(String),
    /// The completion signal was dropped without firing.
    Abandoned,
    /// The operation did not complete within the timeout policy.
    TimedOut {
        /// Budget that was exceeded, in milliseconds.
        limit_ms: u64,
    },
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(msg) => write!(f, "failed: {msg}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
            Self::Abandoned => f.write_str("dropped its completion without signalling"),
            Self::TimedOut { limit_ms } => write!(f, "did not complete within {limit_ms} ms"),
        }
    }
}

/// A failure isolated to one generator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorFault {
    /// Faulty instance.
    pub instance: InstanceId,
    /// Lifecycle operation (or continuation of one) that failed.
    pub op: OpKind,
    /// What went wrong.
    pub reason: FaultReason,
}

impl fmt::Display for GeneratorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "generator fault on instance {} during {}: {}",
            self.instance, self.op, self.reason
        )
    }
}

impl std::error::Error for GeneratorFault {}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
