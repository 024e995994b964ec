use crate::foundation::core::{InstanceId, RenderMode, SurfaceSize, TaskId};
use crate::foundation::error::EaselResult;
use crate::generator::completion::CancellationToken;
use crate::host::scheduler::{Scheduler, TimerEntry, TimerId};
use crate::host::state::OpKind;
use crate::random::Random;
use crate::settings::schema::SettingsSchema;
use crate::surface::canvas::Canvas2d;

/// Host environment visible to a generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Environment {
    /// Pixel size surfaces should be built at.
    pub size: SurfaceSize,
    /// Interactive display or export capture.
    pub render_mode: RenderMode,
    /// Seed the host feeds to [`Random`].
    pub seed: u64,
}

impl Environment {
    /// Host-provided default 2D surface at the environment size.
    pub fn canvas(&self) -> EaselResult<Canvas2d> {
        Canvas2d::new(self.size)
    }
}

/// Everything a running lifecycle operation or continuation may use.
///
/// Lives only for the duration of one call into the generator. Randomness must come from
/// [`Context::random`], and scheduled work from [`Context::set_timeout`] /
/// [`Context::set_interval`], so runs stay reproducible.
pub struct Context<'a> {
    pub(crate) instance: InstanceId,
    pub(crate) phase: OpKind,
    pub(crate) task: Option<TaskId>,
    pub(crate) token: CancellationToken,
    pub(crate) env: &'a Environment,
    pub(crate) settings: &'a SettingsSchema,
    pub(crate) random: &'a mut Random,
    pub(crate) scheduler: &'a mut Scheduler,
    pub(crate) now_ms: u64,
}

impl Context<'_> {
    /// Instance being driven.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Operation this call belongs to (continuations inherit the phase that scheduled them).
    pub fn phase(&self) -> OpKind {
        self.phase
    }

    /// Host environment.
    pub fn environment(&self) -> &Environment {
        self.env
    }

    /// Shorthand for `environment().render_mode`.
    pub fn render_mode(&self) -> RenderMode {
        self.env.render_mode
    }

    /// Live, validated settings.
    pub fn settings(&self) -> &SettingsSchema {
        self.settings
    }

    /// The only permitted randomness source.
    pub fn random(&mut self) -> &mut Random {
        self.random
    }

    /// Generation task this call works for. `None` during `initialize` and `destroy`.
    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    /// Cancellation flag of this call's task.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether this call's task has been superseded or its instance is being torn down.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Host clock in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Run [`crate::Generator::resume`] once, `delay_ms` from now.
    pub fn set_timeout(&mut self, delay_ms: u64) -> TimerId {
        self.schedule(delay_ms, None)
    }

    /// Run [`crate::Generator::resume`] every `period_ms` until cleared.
    pub fn set_interval(&mut self, period_ms: u64) -> TimerId {
        self.schedule(period_ms, Some(period_ms))
    }

    /// Cancel a timer created by this instance. Returns `false` if it was not live.
    pub fn clear_timer(&mut self, id: TimerId) -> bool {
        self.scheduler.clear(self.instance, id)
    }

    fn schedule(&mut self, delay_ms: u64, period_ms: Option<u64>) -> TimerId {
        let id = self.scheduler.schedule(TimerEntry {
            instance: self.instance,
            phase: self.phase,
            task: self.task,
            token: self.token.clone(),
            due_ms: self.now_ms.saturating_add(delay_ms),
            period_ms,
        });
        tracing::trace!(instance = %self.instance, timer = %id, delay_ms, ?period_ms, "scheduled");
        id
    }
}
