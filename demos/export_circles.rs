//! Render the circles generator once in export mode and write it to a PNG.
//!
//! `cargo run --example export_circles -- out.png [settings.json]`

use anyhow::Context as _;
use easel::{
    Canvas2d, Color, Completion, Context, EaselResult, Environment, Generator, HostOpts,
    NumericConstraints, Point, RenderSurface, SettingDescriptor, SettingsSchema, SettingsSnapshot,
    SurfaceSize, TimerId,
};

struct Circles {
    canvas: Canvas2d,
    pending: Option<(TimerId, u32, Completion)>,
}

impl Generator for Circles {
    fn settings(&self) -> EaselResult<SettingsSchema> {
        SettingsSchema::new()
            .with(
                "numCircles",
                SettingDescriptor::number(
                    "Circle count",
                    NumericConstraints::new(20.0, 250.0, 1.0)?,
                    100.0,
                )?,
            )?
            .with("background", SettingDescriptor::color("Background", "#dddddd")?)
    }

    fn surface(&self) -> Option<&dyn RenderSurface> {
        Some(&self.canvas)
    }

    fn surface_mut(&mut self) -> Option<&mut dyn RenderSurface> {
        Some(&mut self.canvas)
    }

    fn initialize(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        done.complete();
        Ok(())
    }

    fn generate(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        let background = cx.settings().color("background").unwrap_or(Color::rgb(221, 221, 221));
        self.canvas.clear(background);
        let timer = cx.set_interval(10);
        self.pending = Some((timer, 0, done));
        Ok(())
    }

    fn resume(&mut self, cx: &mut Context<'_>, timer: TimerId) -> anyhow::Result<()> {
        if cx.is_cancelled() {
            cx.clear_timer(timer);
            return Ok(());
        }
        let target = cx.settings().number("numCircles").unwrap_or(100.0) as u32;
        let side = self.canvas.width().min(self.canvas.height());
        let (mid_x, mid_y) = (self.canvas.width() / 2.0, self.canvas.height() / 2.0);

        let rng = cx.random();
        let radius = side * rng.float_range(0.01, 0.1);
        let offset = side * rng.float(0.5) - radius;
        let angle = rng.float_range(0.0, std::f64::consts::TAU);
        let color = Color::from_hsla(
            rng.float(360.0).round(),
            rng.float_range(0.3, 1.0),
            rng.float_range(0.3, 0.9),
            0.8,
        );
        self.canvas.fill_circle(
            Point::new(mid_x + angle.cos() * offset, mid_y + angle.sin() * offset),
            radius,
            color,
        );

        let Some((id, drawn, _)) = self.pending.as_mut() else {
            return Ok(());
        };
        if *id != timer {
            return Ok(());
        }
        *drawn += 1;
        if *drawn >= target {
            cx.clear_timer(timer);
            self.canvas.present();
            if let Some((_, _, done)) = self.pending.take() {
                done.complete();
            }
        }
        Ok(())
    }

    fn destroy(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.pending = None;
        done.complete();
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let out = args.next().unwrap_or_else(|| "circles.png".to_owned());
    let snapshot = args
        .next()
        .map(SettingsSnapshot::load)
        .transpose()
        .context("load settings snapshot")?;

    let opts = HostOpts {
        size: SurfaceSize::new(800, 800)?,
        seed: 0x00c1_5c1e,
        ..HostOpts::default()
    };
    let env = Environment {
        size: opts.size,
        render_mode: easel::RenderMode::Export,
        seed: opts.seed,
    };
    let generator = Circles {
        canvas: env.canvas()?,
        pending: None,
    };

    let frame = easel::render_once(opts, Box::new(generator), snapshot.as_ref())?;
    frame.save_png(&out)?;
    tracing::info!(path = %out, fingerprint = ?frame.fingerprint(), "wrote frame");
    Ok(())
}
