#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use easel::{
    Affine, BezPath, Canvas2d, Color, Completion, Context, EaselError, EaselResult, Environment,
    FrameRGBA, Generator, HostOpts, ImageHandle, NumericConstraints, Point, Rect, RenderMode,
    RenderSurface, SettingDescriptor, SettingsSchema, SurfaceSize, TaskId, TimeoutPolicy, TimerId,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn opts(render_mode: RenderMode) -> HostOpts {
    HostOpts {
        size: SurfaceSize::new(64, 48).unwrap(),
        render_mode,
        seed: 0x5eed,
        timeouts: TimeoutPolicy {
            stall_wait_ms: 20,
            ..TimeoutPolicy::default()
        },
        ..HostOpts::default()
    }
}

pub fn logo_png() -> Vec<u8> {
    let img = image::RgbaImage::from_fn(8, 4, |x, _| {
        if x < 4 {
            image::Rgba([220, 40, 40, 255])
        } else {
            image::Rgba([40, 40, 220, 255])
        }
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// What a fixture generator observed, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    Initialized,
    GenerateCalled(TaskId),
    Tick(TaskId, u32),
    Discarded(Option<TaskId>),
    Completed(TaskId),
    Destroyed,
}

#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<Entry>>>);

impl Journal {
    pub fn push(&self, e: Entry) {
        self.0.lock().unwrap().push(e);
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, f: impl Fn(&Entry) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|e| f(e)).count()
    }

    pub fn ticks_of(&self, task: TaskId) -> usize {
        self.count(|e| matches!(e, Entry::Tick(t, _) if *t == task))
    }

    pub fn destroyed(&self) -> usize {
        self.count(|e| *e == Entry::Destroyed)
    }
}

/// Fills the host canvas with one color, synchronously.
pub struct SolidBackground {
    canvas: Canvas2d,
    pub journal: Journal,
}

impl SolidBackground {
    pub fn new(env: &Environment) -> EaselResult<Self> {
        Ok(Self {
            canvas: env.canvas()?,
            journal: Journal::default(),
        })
    }

    pub fn with_journal(env: &Environment, journal: Journal) -> EaselResult<Self> {
        Ok(Self {
            canvas: env.canvas()?,
            journal,
        })
    }
}

impl Generator for SolidBackground {
    fn settings(&self) -> EaselResult<SettingsSchema> {
        SettingsSchema::new().with(
            "backgroundColor",
            SettingDescriptor::color("Background Color", "#d9ebee")?,
        )
    }

    fn surface(&self) -> Option<&dyn RenderSurface> {
        Some(&self.canvas)
    }

    fn surface_mut(&mut self) -> Option<&mut dyn RenderSurface> {
        Some(&mut self.canvas)
    }

    fn initialize(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.journal.push(Entry::Initialized);
        done.complete();
        Ok(())
    }

    fn generate(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        let task = cx.task().unwrap();
        self.journal.push(Entry::GenerateCalled(task));
        let color = cx
            .settings()
            .color("backgroundColor")
            .ok_or_else(|| anyhow::anyhow!("backgroundColor missing"))?;
        self.canvas.clear(color);
        self.canvas.present();
        self.journal.push(Entry::Completed(task));
        done.complete();
        Ok(())
    }

    fn destroy(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.journal.push(Entry::Destroyed);
        done.complete();
        Ok(())
    }
}

struct Pending {
    task: TaskId,
    timer: TimerId,
    drawn: u32,
    target: u32,
    done: Completion,
}

/// Draws one random circle per 10 ms tick until `numCircles` are drawn.
pub struct AsyncCircles {
    canvas: Canvas2d,
    pending: Option<Pending>,
    pub journal: Journal,
}

impl AsyncCircles {
    pub const TICK_MS: u64 = 10;

    pub fn new(env: &Environment) -> EaselResult<Self> {
        Self::with_journal(env, Journal::default())
    }

    pub fn with_journal(env: &Environment, journal: Journal) -> EaselResult<Self> {
        Ok(Self {
            canvas: env.canvas()?,
            pending: None,
            journal,
        })
    }

    fn add_circle(&mut self, cx: &mut Context<'_>) {
        let w = self.canvas.width();
        let h = self.canvas.height();
        let side = w.min(h);
        let alpha = cx.settings().color("tint").map_or(204, |c| c.a);
        let rng = cx.random();
        let radius = side * rng.float_range(0.01, 0.1);
        let offset = side * rng.float(0.5) - radius;
        let angle = rng.float_range(0.0, std::f64::consts::TAU);
        let hue = rng.float(360.0).round();
        let sat = rng.float_range(30.0, 100.0).round() / 100.0;
        let lum = rng.float_range(30.0, 90.0).round() / 100.0;

        let center = Point::new(w / 2.0 + angle.cos() * offset, h / 2.0 + angle.sin() * offset);
        let mut color = Color::from_hsla(hue, sat, lum, 1.0);
        color.a = alpha;
        self.canvas.fill_circle(center, radius, color);
    }
}

impl Generator for AsyncCircles {
    fn settings(&self) -> EaselResult<SettingsSchema> {
        SettingsSchema::new()
            .with(
                "numCircles",
                SettingDescriptor::number(
                    "Circle count",
                    NumericConstraints::new(1.0, 250.0, 1.0)?,
                    10.0,
                )?,
            )?
            .with("tint", SettingDescriptor::color("Tint", "#ffffffcc")?)?
            .with("background", SettingDescriptor::color("Background", "#dddddd")?)
    }

    fn surface(&self) -> Option<&dyn RenderSurface> {
        Some(&self.canvas)
    }

    fn surface_mut(&mut self) -> Option<&mut dyn RenderSurface> {
        Some(&mut self.canvas)
    }

    fn initialize(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.journal.push(Entry::Initialized);
        done.complete();
        Ok(())
    }

    fn generate(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        let task = cx.task().unwrap();
        self.journal.push(Entry::GenerateCalled(task));
        // the superseded task's continuation sees its cancellation and cleans up
        self.pending = None;

        let background = cx.settings().color("background").unwrap_or(Color::rgb(0, 0, 0));
        self.canvas.clear(background);
        self.canvas.present();

        let target = cx.settings().number("numCircles").unwrap_or(1.0) as u32;
        let timer = cx.set_interval(Self::TICK_MS);
        self.pending = Some(Pending {
            task,
            timer,
            drawn: 0,
            target,
            done,
        });
        Ok(())
    }

    fn resume(&mut self, cx: &mut Context<'_>, timer: TimerId) -> anyhow::Result<()> {
        if cx.is_cancelled() {
            cx.clear_timer(timer);
            self.journal.push(Entry::Discarded(cx.task()));
            return Ok(());
        }
        let Some(task) = self.pending.as_ref().filter(|p| p.timer == timer).map(|p| p.task) else {
            cx.clear_timer(timer);
            return Ok(());
        };

        self.add_circle(cx);
        self.canvas.present();

        let Some(p) = self.pending.as_mut() else {
            return Ok(());
        };
        p.drawn += 1;
        self.journal.push(Entry::Tick(task, p.drawn));
        if p.drawn >= p.target {
            cx.clear_timer(timer);
            if let Some(p) = self.pending.take() {
                self.journal.push(Entry::Completed(task));
                p.done.complete();
            }
        }
        Ok(())
    }

    fn destroy(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.pending = None;
        self.journal.push(Entry::Destroyed);
        done.complete();
        Ok(())
    }
}

/// Every setting kind; decodes its logo on a worker thread during `initialize`.
pub struct KitchenSink {
    canvas: Canvas2d,
    logo: Arc<Mutex<Option<ImageHandle>>>,
    pub journal: Journal,
}

pub const KITCHEN_SINK_DECLARATION: &str = r##"{
    "exampleColor": { "type": "color", "label": "Color", "description": "Example color input", "value": "#4DECB4" },
    "exampleImage": { "type": "image", "label": "Image", "description": "Example image input", "value": null },
    "exampleNumber": { "type": "number", "label": "Number", "range": [0.1, 1.0], "value": 0.5, "step": 0.01 },
    "exampleRange": { "type": "number", "label": "Range", "range": [0.0, 1.0], "value": [0.1, 0.9], "step": 0.01 },
    "exampleBoolean": { "type": "boolean", "label": "Boolean", "value": true },
    "exampleAudio": { "type": "audio", "label": "Audio", "interval": 0.05, "duration": [1, 3], "bands": 8, "value": null }
}"##;

impl KitchenSink {
    pub fn new(env: &Environment) -> EaselResult<Self> {
        Ok(Self {
            canvas: env.canvas()?,
            logo: Arc::new(Mutex::new(None)),
            journal: Journal::default(),
        })
    }
}

impl Generator for KitchenSink {
    fn settings(&self) -> EaselResult<SettingsSchema> {
        SettingsSchema::from_declaration_str(KITCHEN_SINK_DECLARATION)
    }

    fn surface(&self) -> Option<&dyn RenderSurface> {
        Some(&self.canvas)
    }

    fn surface_mut(&mut self) -> Option<&mut dyn RenderSurface> {
        Some(&mut self.canvas)
    }

    fn initialize(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        let slot = Arc::clone(&self.logo);
        let journal = self.journal.clone();
        std::thread::spawn(move || match easel::decode_image(&logo_png()) {
            Ok(img) => {
                *slot.lock().unwrap() = Some(img);
                journal.push(Entry::Initialized);
                done.complete();
            }
            Err(e) => done.fail(e.to_string()),
        });
        Ok(())
    }

    fn generate(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        let task = cx.task().unwrap();
        self.journal.push(Entry::GenerateCalled(task));
        let s = cx.settings();
        let (w, h) = (self.canvas.width(), self.canvas.height());

        self.canvas.clear(s.color("exampleColor").unwrap_or(Color::rgb(0, 0, 0)));

        if let Some(audio) = s.audio("exampleAudio").filter(|a| !a.is_empty()) {
            let [lo, hi] = s.range("exampleRange").unwrap_or([0.0, 1.0]);
            let (x_min, x_max) = (w * lo, w * hi);
            let y_step = h / (audio.len() as f64 + 1.0);
            let mut path = BezPath::new();
            for (i, slice) in audio.slices().iter().enumerate() {
                let x_step = (x_max - x_min) / slice.len().max(1) as f64;
                let base = y_step * (i as f64 + 1.0);
                for (band, v) in slice.iter().enumerate() {
                    let p = Point::new(
                        x_min + band as f64 * x_step,
                        base - f64::from(*v) / 255.0 * y_step * 2.0,
                    );
                    if band == 0 {
                        path.move_to(p);
                    } else {
                        path.line_to(p);
                    }
                }
            }
            self.canvas.stroke_path(&path, 1.0, Color::rgb(0x11, 0x11, 0x11));
        }

        if s.boolean("exampleBoolean").unwrap_or(false) {
            let fallback = self.logo.lock().unwrap().clone();
            let texture = s.image("exampleImage").cloned().or(fallback);
            if let Some(tex) = texture {
                let (tw, th) = (f64::from(tex.width()), f64::from(tex.height()));
                let scale = s.number("exampleNumber").unwrap_or(1.0) * (w.min(h) / tw.max(th));
                let placement = Affine::translate((w / 2.0, h / 2.0))
                    * Affine::scale(scale)
                    * Affine::translate((-tw / 2.0, -th / 2.0));
                self.canvas.draw_image(&tex, placement)?;
            }
        }

        self.canvas.present();
        self.journal.push(Entry::Completed(task));
        done.complete();
        Ok(())
    }

    fn destroy(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.logo.lock().unwrap().take();
        self.journal.push(Entry::Destroyed);
        done.complete();
        Ok(())
    }
}

/// A generator-constructed surface, standing in for a third-party backend.
///
/// Only keeps presented contents readable when built with `preserve`.
pub struct PreservingBackend {
    canvas: Canvas2d,
    preserve: bool,
}

impl RenderSurface for PreservingBackend {
    fn size(&self) -> SurfaceSize {
        self.canvas.size()
    }

    fn resize(&mut self, size: SurfaceSize) -> EaselResult<()> {
        self.canvas.resize(size)
    }

    fn retains_contents(&self) -> bool {
        self.preserve
    }

    fn capture(&self) -> EaselResult<FrameRGBA> {
        if !self.preserve {
            return Err(EaselError::runtime("drawing buffer was not preserved"));
        }
        self.canvas.capture()
    }
}

/// Builds its own backend after a simulated library load (a 30 ms timer) in `initialize`.
pub struct RotatingSquare {
    backend: Option<PreservingBackend>,
    init_done: Option<Completion>,
    honor_render_mode: bool,
    pub journal: Journal,
}

impl RotatingSquare {
    pub const LOAD_MS: u64 = 30;

    pub fn new() -> Self {
        Self {
            backend: None,
            init_done: None,
            honor_render_mode: true,
            journal: Journal::default(),
        }
    }

    /// A backend that never preserves its buffer, whatever the render mode.
    pub fn ignoring_render_mode() -> Self {
        Self {
            honor_render_mode: false,
            ..Self::new()
        }
    }
}

impl Generator for RotatingSquare {
    fn settings(&self) -> EaselResult<SettingsSchema> {
        let angle = || NumericConstraints::new(0.0, std::f64::consts::TAU, std::f64::consts::PI / 180.0);
        SettingsSchema::new()
            .with(
                "rotationZ",
                SettingDescriptor::number("Z Rotation", angle()?, 0.0)?
                    .with_description("Rotation of the square around its center"),
            )?
            .with(
                "scale",
                SettingDescriptor::number("Scale", NumericConstraints::new(0.1, 1.0, 0.05)?, 0.5)?,
            )
    }

    fn surface(&self) -> Option<&dyn RenderSurface> {
        self.backend.as_ref().map(|b| b as &dyn RenderSurface)
    }

    fn surface_mut(&mut self) -> Option<&mut dyn RenderSurface> {
        self.backend.as_mut().map(|b| b as &mut dyn RenderSurface)
    }

    fn initialize(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.init_done = Some(done);
        cx.set_timeout(Self::LOAD_MS);
        Ok(())
    }

    fn resume(&mut self, cx: &mut Context<'_>, _timer: TimerId) -> anyhow::Result<()> {
        if cx.is_cancelled() {
            return Ok(());
        }
        let Some(done) = self.init_done.take() else {
            return Ok(());
        };
        let preserve = self.honor_render_mode && cx.render_mode() == RenderMode::Export;
        self.backend = Some(PreservingBackend {
            canvas: cx.environment().canvas()?,
            preserve,
        });
        self.journal.push(Entry::Initialized);
        done.complete();
        Ok(())
    }

    fn generate(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        let task = cx.task().unwrap();
        self.journal.push(Entry::GenerateCalled(task));
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("generate before the backend exists"))?;
        let canvas = &mut backend.canvas;
        let (w, h) = (canvas.width(), canvas.height());
        let angle = cx.settings().number("rotationZ").unwrap_or(0.0);
        let half = w.min(h) * cx.settings().number("scale").unwrap_or(0.5) / 2.0;

        canvas.clear(Color::rgb(0, 0, 0));
        canvas.set_transform(Affine::translate((w / 2.0, h / 2.0)) * Affine::rotate(angle));
        canvas.fill_rect(Rect::new(-half, -half, half, half), Color::rgb(90, 200, 250));
        canvas.present();

        self.journal.push(Entry::Completed(task));
        done.complete();
        Ok(())
    }

    fn destroy(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.backend = None;
        self.journal.push(Entry::Destroyed);
        done.complete();
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultMode {
    InitError,
    InitPanic,
    InitNeverCompletes,
    GenerateError,
    GeneratePanic,
    GenerateFailsViaCompletion,
    GenerateAbandons,
    GenerateNeverCompletes,
    DestroyError,
    NoSurface,
}

/// Misbehaves in exactly one way.
pub struct Faulty {
    mode: FaultMode,
    canvas: Canvas2d,
    parked: Option<Completion>,
    pub journal: Journal,
}

impl Faulty {
    pub fn new(env: &Environment, mode: FaultMode) -> EaselResult<Self> {
        Ok(Self {
            mode,
            canvas: env.canvas()?,
            parked: None,
            journal: Journal::default(),
        })
    }
}

impl Generator for Faulty {
    fn settings(&self) -> EaselResult<SettingsSchema> {
        SettingsSchema::new().with("flag", SettingDescriptor::boolean("Flag", false)?)
    }

    fn surface(&self) -> Option<&dyn RenderSurface> {
        match self.mode {
            FaultMode::NoSurface => None,
            _ => Some(&self.canvas),
        }
    }

    fn surface_mut(&mut self) -> Option<&mut dyn RenderSurface> {
        match self.mode {
            FaultMode::NoSurface => None,
            _ => Some(&mut self.canvas),
        }
    }

    fn initialize(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.journal.push(Entry::Initialized);
        match self.mode {
            FaultMode::InitError => anyhow::bail!("asset missing"),
            FaultMode::InitPanic => panic!("initialize exploded"),
            FaultMode::InitNeverCompletes => {
                self.parked = Some(done);
                Ok(())
            }
            _ => {
                done.complete();
                Ok(())
            }
        }
    }

    fn generate(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.journal.push(Entry::GenerateCalled(cx.task().unwrap()));
        match self.mode {
            FaultMode::GenerateError => anyhow::bail!("draw failed"),
            FaultMode::GeneratePanic => panic!("generate exploded"),
            FaultMode::GenerateFailsViaCompletion => {
                done.fail("backend lost");
                Ok(())
            }
            FaultMode::GenerateAbandons => {
                drop(done);
                Ok(())
            }
            FaultMode::GenerateNeverCompletes => {
                self.parked = Some(done);
                Ok(())
            }
            _ => {
                self.canvas.clear(Color::rgb(1, 2, 3));
                self.canvas.present();
                done.complete();
                Ok(())
            }
        }
    }

    fn destroy(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.journal.push(Entry::Destroyed);
        self.parked = None;
        if self.mode == FaultMode::DestroyError {
            anyhow::bail!("could not release backend");
        }
        done.complete();
        Ok(())
    }
}
