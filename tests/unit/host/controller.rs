use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

use super::*;
use crate::settings::descriptor::{NumericConstraints, SettingDescriptor};
use crate::surface::RenderSurface;
use crate::surface::canvas::Canvas2d;

type Calls = Rc<RefCell<Vec<&'static str>>>;

/// Which piece of generator code misbehaves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Trip {
    #[default]
    Nothing,
    Settings,
    Surface,
    Generate,
}

struct Probe {
    canvas: Canvas2d,
    hold_generate: bool,
    interval_ms: Option<u64>,
    timer_in_destroy: bool,
    init_delay_ms: Option<u64>,
    trip: Rc<Cell<Trip>>,
    parked: Rc<RefCell<Vec<Completion>>>,
    calls: Calls,
}

impl Probe {
    fn new() -> Self {
        Self {
            canvas: Canvas2d::new(SurfaceSize::new(4, 4).unwrap()).unwrap(),
            hold_generate: false,
            interval_ms: None,
            timer_in_destroy: false,
            init_delay_ms: None,
            trip: Rc::default(),
            parked: Rc::default(),
            calls: Rc::default(),
        }
    }

    fn holding() -> Self {
        Self {
            hold_generate: true,
            ..Self::new()
        }
    }
}

impl Generator for Probe {
    fn settings(&self) -> EaselResult<SettingsSchema> {
        if self.trip.get() == Trip::Settings {
            panic!("settings exploded");
        }
        SettingsSchema::new()
            .with(
                "count",
                SettingDescriptor::number("Count", NumericConstraints::new(1.0, 10.0, 1.0)?, 3.0)?,
            )?
            .with("on", SettingDescriptor::boolean("On", true)?)
    }

    fn surface(&self) -> Option<&dyn RenderSurface> {
        if self.trip.get() == Trip::Surface {
            panic!("surface accessor exploded");
        }
        Some(&self.canvas)
    }

    fn surface_mut(&mut self) -> Option<&mut dyn RenderSurface> {
        if self.trip.get() == Trip::Surface {
            panic!("surface accessor exploded");
        }
        Some(&mut self.canvas)
    }

    fn initialize(&mut self, _cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.calls.borrow_mut().push("initialize");
        match self.init_delay_ms {
            Some(ms) => {
                std::thread::spawn(move || {
                    std::thread::sleep(std::time::Duration::from_millis(ms));
                    done.complete();
                });
            }
            None => done.complete(),
        }
        Ok(())
    }

    fn generate(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.calls.borrow_mut().push("generate");
        if self.trip.get() == Trip::Generate {
            anyhow::bail!("generate refused");
        }
        if let Some(ms) = self.interval_ms {
            cx.set_interval(ms);
        }
        if self.hold_generate {
            self.parked.borrow_mut().push(done);
        } else {
            self.canvas.present();
            done.complete();
        }
        Ok(())
    }

    fn resume(&mut self, _cx: &mut Context<'_>, _timer: TimerId) -> anyhow::Result<()> {
        self.calls.borrow_mut().push("resume");
        Ok(())
    }

    fn destroy(&mut self, cx: &mut Context<'_>, done: Completion) -> anyhow::Result<()> {
        self.calls.borrow_mut().push("destroy");
        if self.timer_in_destroy {
            cx.set_timeout(1_000);
        }
        done.complete();
        Ok(())
    }
}

fn host() -> Host {
    let mut opts = HostOpts {
        size: SurfaceSize::new(4, 4).unwrap(),
        ..HostOpts::default()
    };
    opts.timeouts.stall_wait_ms = 1;
    Host::new(opts).unwrap()
}

fn count(calls: &Calls, name: &str) -> usize {
    calls.borrow().iter().filter(|c| **c == name).count()
}

#[test]
fn load_initializes_then_generates_once() {
    let mut h = host();
    let probe = Probe::new();
    let calls = Rc::clone(&probe.calls);
    let id = h.load(Box::new(probe)).unwrap();

    assert_eq!(h.state(id), Some(LifecycleState::Idle));
    assert_eq!(*calls.borrow(), vec!["initialize", "generate"]);
    assert_eq!(
        h.take_events(),
        vec![
            HostEvent::Loaded { instance: id },
            HostEvent::Ready { instance: id },
            HostEvent::GenerationStarted {
                instance: id,
                task: TaskId(1)
            },
            HostEvent::GenerationCompleted {
                instance: id,
                task: TaskId(1)
            },
        ]
    );
    assert!(h.capture(id).is_ok());
}

#[test]
fn stale_completion_is_ignored() {
    let mut h = host();
    let probe = Probe::holding();
    let parked = Rc::clone(&probe.parked);
    let id = h.load(Box::new(probe)).unwrap();
    assert_eq!(h.active_task(id), Some(TaskId(1)));

    h.set_setting(id, "count", 5.0).unwrap();
    assert_eq!(h.active_task(id), Some(TaskId(2)));
    assert!(h.take_events().contains(&HostEvent::GenerationCancelled {
        instance: id,
        task: TaskId(1)
    }));

    let first = parked.borrow_mut().remove(0);
    assert_eq!(first.task(), Some(TaskId(1)));
    first.complete();
    h.step().unwrap();
    assert_eq!(h.state(id), Some(LifecycleState::Generating));
    assert_eq!(
        h.take_events(),
        vec![HostEvent::StaleCompletionIgnored {
            instance: id,
            task: TaskId(1)
        }]
    );

    let second = parked.borrow_mut().remove(0);
    second.complete();
    h.step().unwrap();
    assert_eq!(h.state(id), Some(LifecycleState::Idle));
    let stats = h.stats(id).unwrap();
    assert_eq!(stats.generations_started, 2);
    assert_eq!(stats.generations_completed, 1);
    assert_eq!(stats.generations_cancelled, 1);
    assert_eq!(stats.stale_completions, 1);
}

#[test]
fn capture_is_refused_until_the_task_completes() {
    let mut h = host();
    let probe = Probe::holding();
    let parked = Rc::clone(&probe.parked);
    let id = h.load(Box::new(probe)).unwrap();

    let err = h.capture(id).unwrap_err();
    assert!(matches!(err, EaselError::Lifecycle(ref v) if v.state == LifecycleState::Generating));

    parked.borrow_mut().remove(0).complete();
    h.step().unwrap();
    assert!(h.capture(id).is_ok());
}

#[test]
fn unchanged_value_does_not_regenerate() {
    let mut h = host();
    let probe = Probe::new();
    let calls = Rc::clone(&probe.calls);
    let id = h.load(Box::new(probe)).unwrap();

    let update = h.set_setting(id, "count", 3.2).unwrap();
    assert!(!update.changed);
    assert_eq!(count(&calls, "generate"), 1);

    let update = h.set_setting(id, "count", 4.0).unwrap();
    assert!(update.changed);
    assert_eq!(count(&calls, "generate"), 2);
}

#[test]
fn batch_write_is_all_or_nothing() {
    let mut h = host();
    let probe = Probe::new();
    let calls = Rc::clone(&probe.calls);
    let id = h.load(Box::new(probe)).unwrap();

    let err = h
        .set_settings(
            id,
            [
                ("count", SettingValue::Number(7.0)),
                ("on", SettingValue::Number(1.0)),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, EaselError::Setting(ref e) if e.key == "on"));
    assert_eq!(h.settings(id).unwrap().number("count"), Some(3.0));
    assert_eq!(count(&calls, "generate"), 1);

    let updates = h
        .set_settings(
            id,
            [
                ("count", SettingValue::Number(7.0)),
                ("on", SettingValue::Boolean(false)),
            ],
        )
        .unwrap();
    assert_eq!(updates.len(), 2);
    assert_eq!(count(&calls, "generate"), 2);
}

#[test]
fn unload_runs_destroy_once() {
    let mut h = host();
    let probe = Probe::new();
    let calls = Rc::clone(&probe.calls);
    let id = h.load(Box::new(probe)).unwrap();

    h.unload(id).unwrap();
    h.unload(id).unwrap();
    assert_eq!(h.state(id), Some(LifecycleState::Unloaded));
    assert_eq!(count(&calls, "destroy"), 1);

    let err = h.set_setting(id, "count", 4.0).unwrap_err();
    assert!(matches!(err, EaselError::Lifecycle(ref v) if v.state == LifecycleState::Unloaded));
    assert!(matches!(h.regenerate(id), Err(EaselError::Lifecycle(_))));
    assert!(matches!(h.capture(id), Err(EaselError::Lifecycle(_))));
}

#[test]
fn unknown_ids_are_validation_errors() {
    let mut h = host();
    assert_eq!(h.state(InstanceId(42)), None);
    assert!(matches!(
        h.set_setting(InstanceId(42), "count", 1.0),
        Err(EaselError::Validation(_))
    ));
    assert!(matches!(h.capture(InstanceId(42)), Err(EaselError::Validation(_))));
}

#[test]
fn overdue_generation_times_out() {
    let mut h = host();
    let probe = Probe::holding();
    let calls = Rc::clone(&probe.calls);
    let id = h.load(Box::new(probe)).unwrap();
    h.take_events();

    h.advance_by(h.opts().timeouts.generate_ms).unwrap();

    assert_eq!(h.state(id), Some(LifecycleState::Unloaded));
    assert_eq!(count(&calls, "destroy"), 1);
    let failure = h.failure(id).cloned().unwrap();
    assert_eq!(
        failure,
        FailureCause::Fault(GeneratorFault {
            instance: id,
            op: OpKind::Generate,
            reason: FaultReason::TimedOut { limit_ms: 30_000 },
        })
    );
    let failed = h
        .take_events()
        .into_iter()
        .filter(|e| matches!(e, HostEvent::Failed { .. }))
        .count();
    assert_eq!(failed, 1);
}

#[test]
fn timers_left_by_destroy_are_purged() {
    let mut h = host();
    let mut probe = Probe::new();
    probe.timer_in_destroy = true;
    let id = h.load(Box::new(probe)).unwrap();

    h.unload(id).unwrap();
    assert_eq!(h.state(id), Some(LifecycleState::Unloaded));
    assert_eq!(h.timer_count(id), 0);
    assert_eq!(h.stats(id).unwrap().timers_purged, 1);
    assert_eq!(h.scheduler.len(), 0);
}

#[test]
fn idle_intervals_are_flushed_before_destroy() {
    let mut h = host();
    let mut probe = Probe::new();
    probe.interval_ms = Some(100);
    let calls = Rc::clone(&probe.calls);
    let id = h.load(Box::new(probe)).unwrap();
    assert_eq!(h.timer_count(id), 1);

    h.advance_by(250).unwrap();
    assert_eq!(count(&calls, "resume"), 2);

    h.unload(id).unwrap();
    let tail: Vec<_> = calls.borrow().iter().rev().take(2).copied().collect();
    assert_eq!(tail, vec!["destroy", "resume"]);
    assert_eq!(h.stats(id).unwrap().timers_purged, 0);
}

#[test]
fn step_reports_when_there_is_nothing_to_do() {
    let mut h = host();
    assert!(!h.step().unwrap());
    h.load(Box::new(Probe::new())).unwrap();
    assert!(!h.step().unwrap());
}

#[test]
fn runaway_timers_exhaust_the_step_budget() {
    let mut opts = HostOpts {
        size: SurfaceSize::new(4, 4).unwrap(),
        max_steps_per_run: 50,
        ..HostOpts::default()
    };
    opts.timeouts.stall_wait_ms = 1;
    let mut h = Host::new(opts).unwrap();
    let mut probe = Probe::holding();
    probe.interval_ms = Some(1);
    h.load(Box::new(probe)).unwrap();

    let err = h.run_until_idle().unwrap_err();
    assert!(matches!(err, EaselError::Runtime(ref m) if m.contains("step budget")));
}

#[test]
fn regenerate_requires_a_ready_instance() {
    let mut h = host();
    let probe = Probe::new();
    let calls = Rc::clone(&probe.calls);
    let id = h.load(Box::new(probe)).unwrap();

    assert_eq!(h.regenerate(id).unwrap(), TaskId(2));
    assert_eq!(count(&calls, "generate"), 2);
}

#[test]
fn resize_rebuilds_the_surface_and_regenerates() {
    let mut h = host();
    let id = h.load(Box::new(Probe::new())).unwrap();

    h.resize(id, SurfaceSize::new(8, 2).unwrap()).unwrap();
    let frame = h.capture(id).unwrap();
    assert_eq!((frame.width, frame.height), (8, 2));
    assert_eq!(h.stats(id).unwrap().generations_completed, 2);
}

#[test]
fn panic_payloads_become_messages() {
    let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("boom"));
    assert_eq!(panic_message(payload.as_ref()), "boom");
    let payload: Box<dyn std::any::Any + Send> = Box::new("static boom");
    assert_eq!(panic_message(payload.as_ref()), "static boom");
    let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
    assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
}

#[test]
fn idle_timers_fire_on_step() {
    let mut h = host();
    let mut probe = Probe::new();
    probe.interval_ms = Some(100);
    let calls = Rc::clone(&probe.calls);
    h.load(Box::new(probe)).unwrap();

    assert!(h.step().unwrap());
    assert_eq!(h.now_ms(), 100);
    assert!(h.step().unwrap());
    assert_eq!(h.now_ms(), 200);
    assert_eq!(count(&calls, "resume"), 2);
}

#[test]
fn off_thread_initialize_outlives_the_stall_slice() {
    let mut h = host();
    let mut probe = Probe::new();
    probe.init_delay_ms = Some(50);
    let id = h.load(Box::new(probe)).unwrap();

    // nothing is runnable yet; stepping must not time the operation out
    assert!(!h.step().unwrap());
    assert_eq!(h.state(id), Some(LifecycleState::Initializing));
    assert_eq!(h.now_ms(), 0);

    h.run_until_idle().unwrap();
    assert_eq!(h.state(id), Some(LifecycleState::Idle));
    assert!(h.failure(id).is_none());
    assert!(h.now_ms() < h.opts().timeouts.initialize_ms);
    assert!(h.capture(id).is_ok());
}

#[test]
fn stalled_operation_waits_out_its_budget() {
    let mut opts = HostOpts {
        size: SurfaceSize::new(4, 4).unwrap(),
        ..HostOpts::default()
    };
    opts.timeouts.generate_ms = 60;
    opts.timeouts.stall_wait_ms = 5;
    let mut h = Host::new(opts).unwrap();
    let id = h.load(Box::new(Probe::holding())).unwrap();

    let started = Instant::now();
    h.run_until_idle().unwrap();
    assert!(started.elapsed().as_millis() >= 60);
    assert_eq!(h.now_ms(), 60);
    assert!(matches!(
        h.failure(id),
        Some(FailureCause::Fault(GeneratorFault {
            reason: FaultReason::TimedOut { limit_ms: 60 },
            ..
        }))
    ));
}

#[test]
fn panicking_settings_declaration_fails_the_load() {
    let mut h = host();
    let probe = Probe::new();
    probe.trip.set(Trip::Settings);
    let err = h.load(Box::new(probe)).unwrap_err();
    assert!(matches!(err, EaselError::Runtime(ref m) if m.contains("settings exploded")));

    assert!(h.load(Box::new(Probe::new())).is_ok());
}

#[test]
fn panicking_surface_accessor_is_a_fault() {
    let mut h = host();
    let probe = Probe::new();
    probe.trip.set(Trip::Surface);
    let calls = Rc::clone(&probe.calls);
    let id = h.load(Box::new(probe)).unwrap();

    assert_eq!(h.state(id), Some(LifecycleState::Unloaded));
    assert_eq!(count(&calls, "destroy"), 1);
    assert_eq!(
        h.failure(id).cloned(),
        Some(FailureCause::Fault(GeneratorFault {
            instance: id,
            op: OpKind::Initialize,
            reason: FaultReason::Panicked("surface accessor exploded".to_owned()),
        }))
    );
    let failed = h
        .take_events()
        .into_iter()
        .filter(|e| matches!(e, HostEvent::Failed { .. }))
        .count();
    assert_eq!(failed, 1);
}

#[test]
fn surface_panics_during_capture_and_resize_are_faults() {
    let mut h = host();
    let probe = Probe::new();
    let trip = Rc::clone(&probe.trip);
    let id = h.load(Box::new(probe)).unwrap();
    trip.set(Trip::Surface);
    let err = h.capture(id).unwrap_err();
    assert!(matches!(err, EaselError::Fault(ref f) if f.reason == FaultReason::Panicked("surface accessor exploded".to_owned())));
    assert_eq!(h.state(id), Some(LifecycleState::Unloaded));

    let probe = Probe::new();
    let trip = Rc::clone(&probe.trip);
    let id = h.load(Box::new(probe)).unwrap();
    trip.set(Trip::Surface);
    let err = h.resize(id, SurfaceSize::new(8, 8).unwrap()).unwrap_err();
    assert!(matches!(err, EaselError::Fault(_)));
    assert_eq!(h.state(id), Some(LifecycleState::Unloaded));
}

#[test]
fn resize_rejects_an_empty_surface() {
    let mut h = host();
    let id = h.load(Box::new(Probe::new())).unwrap();

    let err = h
        .resize(id, SurfaceSize { width: 0, height: 10 })
        .unwrap_err();
    assert!(matches!(err, EaselError::Validation(_)));
    assert_eq!(h.state(id), Some(LifecycleState::Idle));
    assert_eq!(h.stats(id).unwrap().generations_started, 1);
}

#[test]
fn regenerate_reports_a_synchronous_generate_failure() {
    let mut h = host();
    let probe = Probe::new();
    let trip = Rc::clone(&probe.trip);
    let id = h.load(Box::new(probe)).unwrap();

    trip.set(Trip::Generate);
    let err = h.regenerate(id).unwrap_err();
    assert!(matches!(
        err,
        EaselError::Fault(ref f) if f.op == OpKind::Generate
            && f.reason == FaultReason::Error("generate refused".to_owned())
    ));
    assert_eq!(h.state(id), Some(LifecycleState::Unloaded));
}
