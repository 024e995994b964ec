//! Easel hosts pluggable generative-art generators.
//!
//! A [`Generator`] declares a typed [`SettingsSchema`], owns one [`RenderSurface`] and implements
//! three lifecycle operations, each finished through a single-shot [`Completion`]. The [`Host`]
//! enforces the contract:
//!
//! - Load a generator and drive `initialize -> generate* -> destroy`
//! - Validate every settings write (panel, batch or persisted) before the generator sees it
//! - Restart generation on settings changes, cancelling in-flight work cooperatively
//! - Reseed the deterministic [`Random`] so equal settings reproduce equal frames
//! - Isolate faults, panics and timeouts to the failing instance
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod assets;
mod foundation;

pub(crate) mod generator;
pub(crate) mod host;
pub(crate) mod random;
pub(crate) mod settings;
pub(crate) mod surface;

pub use kurbo::{Affine, BezPath, Point, Rect};

pub use crate::assets::audio::{AudioBands, sample_bands};
pub use crate::assets::decode::{ImageHandle, decode_image, load_image};
pub use crate::foundation::core::{InstanceId, RenderMode, SurfaceSize, TaskId};
pub use crate::foundation::error::{
    EaselError, EaselResult, FaultReason, GeneratorFault, LifecycleViolation, SettingError,
};
pub use crate::generator::Generator;
pub use crate::generator::completion::{CancellationToken, Completion};
pub use crate::generator::context::{Context, Environment};
pub use crate::host::controller::Host;
pub use crate::host::events::{FailureCause, HostEvent, InstanceStats};
pub use crate::host::export::render_once;
pub use crate::host::opts::{HostOpts, TimeoutPolicy};
pub use crate::host::scheduler::TimerId;
pub use crate::host::state::{LifecycleState, OpKind};
pub use crate::random::Random;
pub use crate::settings::color::Color;
pub use crate::settings::descriptor::{
    AudioConstraints, NumericConstraints, SettingDescriptor, SettingKind, SettingSpec, SettingValue,
};
pub use crate::settings::persist::{RestoreReport, SettingsSnapshot};
pub use crate::settings::schema::{SettingUpdate, SettingsSchema};
pub use crate::surface::RenderSurface;
pub use crate::surface::canvas::Canvas2d;
pub use crate::surface::frame::{FrameFingerprint, FrameRGBA};
