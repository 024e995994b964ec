use crate::foundation::core::RenderMode;
use crate::foundation::error::{EaselError, EaselResult};
use crate::generator::Generator;
use crate::host::controller::Host;
use crate::host::opts::HostOpts;
use crate::settings::persist::SettingsSnapshot;
use crate::surface::frame::FrameRGBA;

/// Produce one export frame: load in export mode, restore `snapshot`, generate, capture, unload.
///
/// Any generator failure is returned as the corresponding error.
pub fn render_once(
    opts: HostOpts,
    generator: Box<dyn Generator>,
    snapshot: Option<&SettingsSnapshot>,
) -> EaselResult<FrameRGBA> {
    let opts = HostOpts {
        render_mode: RenderMode::Export,
        ..opts
    };
    let mut host = Host::new(opts)?;
    let id = match snapshot {
        Some(s) => {
            let (id, report) = host.load_restored(generator, s)?;
            if !report.rejected.is_empty() || !report.unknown.is_empty() {
                tracing::warn!(
                    rejected = report.rejected.len(),
                    unknown = report.unknown.len(),
                    "some persisted settings were not applied"
                );
            }
            id
        }
        None => host.load(generator)?,
    };
    host.run_until_idle()?;
    if let Some(cause) = host.failure(id) {
        return Err(EaselError::from(cause.clone()));
    }

    let frame = host.capture(id)?;
    host.unload(id)?;
    host.run_until_idle()?;
    tracing::debug!(
        width = frame.width,
        height = frame.height,
        "export frame captured"
    );
    Ok(frame)
}
