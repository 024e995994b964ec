//! The contract every generator implements.

pub(crate) mod completion;
pub(crate) mod context;

use crate::foundation::error::EaselResult;
use crate::generator::completion::Completion;
use crate::generator::context::Context;
use crate::host::scheduler::TimerId;
use crate::settings::schema::SettingsSchema;
use crate::surface::RenderSurface;

/// A pluggable producer of drawn output.
///
/// Each lifecycle operation receives a [`Completion`] it must fire exactly once, either before
/// returning or later from a continuation or another thread. Returning `Err` or panicking is a
/// synchronous fault: the host tears the instance down.
///
/// Asynchronous work is expressed as scheduled continuations ([`Context::set_timeout`],
/// [`Context::set_interval`]) delivered to [`Generator::resume`]. Each continuation must check
/// [`Context::is_cancelled`] first and, when set, release its own timers and return without drawing.
pub trait Generator {
    /// Declare the settings schema with default values. Called once, at load.
    fn settings(&self) -> EaselResult<SettingsSchema>;

    /// The surface this instance draws on. May be `None` until `initialize` completes.
    fn surface(&self) -> Option<&dyn RenderSurface>;

    /// Mutable access for host-driven resizes.
    fn surface_mut(&mut self) -> Option<&mut dyn RenderSurface>;

    /// One-time setup: asset loading, backend construction.
    fn initialize(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()>;

    /// (Re)produce output from the current settings. The surface must be fully drawn when `done`
    /// fires.
    fn generate(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()>;

    /// A scheduled continuation is due.
    fn resume(&mut self, cx: &mut Context<'_>, timer: TimerId) -> anyhow::Result<()> {
        let _ = (cx, timer);
        Ok(())
    }

    /// Release generator-owned resources. No further calls follow once `done` fires.
    fn destroy(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()>;
}
