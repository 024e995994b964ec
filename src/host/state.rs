use std::fmt;

/// Lifecycle state of one generator instance.
///
/// `Unloaded -> Initializing -> Idle <-> Generating -> Destroying -> Unloaded`. `Initializing` and
/// `Destroying` are entered at most once per instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Not loaded, or torn down.
    Unloaded,
    /// `initialize` is outstanding.
    Initializing,
    /// Ready; no generation in flight.
    Idle,
    /// The current generation task has not completed.
    Generating,
    /// `destroy` is outstanding.
    Destroying,
}

impl LifecycleState {
    /// Whether the controller may move from `self` to `to`.
    ///
    /// `Generating -> Generating` is the restart path: the in-flight task is cancelled and a
    /// fresh one starts. `Initializing -> Destroying` is taken when `initialize` faults or an
    /// unload was deferred until it completed.
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Unloaded, Initializing)
                | (Initializing, Idle)
                | (Initializing, Destroying)
                | (Idle, Generating)
                | (Generating, Idle)
                | (Generating, Generating)
                | (Idle, Destroying)
                | (Generating, Destroying)
                | (Destroying, Unloaded)
        )
    }

    /// Whether settings changes in this state start a new generation.
    pub fn regenerates_on_change(self) -> bool {
        matches!(self, Self::Idle | Self::Generating)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Destroying => "destroying",
        };
        f.write_str(s)
    }
}

/// The three lifecycle operations a generator implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// One-time setup.
    Initialize,
    /// (Re)produce output.
    Generate,
    /// Release resources.
    Destroy,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialize => "initialize",
            Self::Generate => "generate",
            Self::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/host/state.rs"]
mod tests;
