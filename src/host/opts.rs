use crate::foundation::core::{RenderMode, SurfaceSize};
use crate::foundation::error::{EaselError, EaselResult};

/// How long outstanding lifecycle operations may take before they are faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Host-clock budget for `initialize`.
    pub initialize_ms: u64,
    /// Host-clock budget for the current `generate` task.
    pub generate_ms: u64,
    /// Host-clock budget for `destroy`.
    pub destroy_ms: u64,
    /// Longest single real-time wait for an off-thread completion when nothing else can run.
    /// Waits repeat until the operation's budget is used up.
    pub stall_wait_ms: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            initialize_ms: 10_000,
            generate_ms: 30_000,
            destroy_ms: 5_000,
            stall_wait_ms: 2_000,
        }
    }
}

/// Host configuration.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HostOpts {
    /// Surface size handed to generators.
    pub size: SurfaceSize,
    /// Interactive display or export capture.
    pub render_mode: RenderMode,
    /// Seed fed to every instance's [`crate::Random`].
    pub seed: u64,
    /// Reseed at the start of every `generate`, so regenerations with equal settings are
    /// bit-identical.
    pub reseed_each_generate: bool,
    /// Operation budgets.
    pub timeouts: TimeoutPolicy,
    /// Upper bound on timer dispatches inside one `run_until_idle`.
    pub max_steps_per_run: usize,
}

impl Default for HostOpts {
    fn default() -> Self {
        Self {
            size: SurfaceSize::default(),
            render_mode: RenderMode::Interactive,
            seed: 0,
            reseed_each_generate: true,
            timeouts: TimeoutPolicy::default(),
            max_steps_per_run: 100_000,
        }
    }
}

impl HostOpts {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> EaselResult<Self> {
        let opts: Self = serde_json::from_str(s).map_err(|e| EaselError::serde(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> EaselResult<()> {
        SurfaceSize::new(self.size.width, self.size.height)?;
        if self.max_steps_per_run == 0 {
            return Err(EaselError::validation("max_steps_per_run must be > 0"));
        }
        let t = &self.timeouts;
        if t.initialize_ms == 0 || t.generate_ms == 0 || t.destroy_ms == 0 {
            return Err(EaselError::validation("operation timeouts must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/host/opts.rs"]
mod tests;
