use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::foundation::core::{InstanceId, SurfaceSize, TaskId};
use crate::foundation::error::{
    EaselError, EaselResult, FaultReason, GeneratorFault, LifecycleViolation,
};
use crate::generator::Generator;
use crate::generator::completion::{CancellationToken, Completion, Outcome, Signal, Ticket};
use crate::generator::context::{Context, Environment};
use crate::host::events::{FailureCause, HostEvent, InstanceStats};
use crate::host::opts::HostOpts;
use crate::host::scheduler::{Scheduler, TimerEntry, TimerId};
use crate::host::state::{LifecycleState, OpKind};
use crate::random::Random;
use crate::settings::descriptor::SettingValue;
use crate::settings::persist::{RestoreReport, SettingsSnapshot};
use crate::settings::schema::{SettingUpdate, SettingsSchema};
use crate::surface::frame::FrameRGBA;

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    op: OpKind,
    task: Option<TaskId>,
    deadline_ms: u64,
}

#[derive(Debug)]
struct ActiveTask {
    id: TaskId,
    token: CancellationToken,
    completed: bool,
}

struct Instance {
    generator: Box<dyn Generator>,
    env: Environment,
    settings: SettingsSchema,
    random: Random,
    state: LifecycleState,
    // cancelled when teardown starts; shared by initialize-phase continuations
    lifetime: CancellationToken,
    next_task: u64,
    current: Option<ActiveTask>,
    outstanding: Option<Outstanding>,
    unload_requested: bool,
    failure: Option<FailureCause>,
    stats: InstanceStats,
}

struct Retired {
    stats: InstanceStats,
    failure: Option<FailureCause>,
}

enum Call {
    Initialize(Completion),
    Generate(Completion),
    Destroy(Completion),
    Resume(TimerId),
}

/// Lifecycle controller for generator instances.
///
/// Single-threaded and cooperative: generator code only runs inside host calls, one operation at
/// a time per instance. Scheduled continuations run on a virtual clock advanced by
/// [`Host::step`], [`Host::advance_by`] and [`Host::run_until_idle`]; completion signals fired
/// from other threads are picked up by the same calls.
pub struct Host {
    opts: HostOpts,
    env: Environment,
    now_ms: u64,
    next_instance: u64,
    instances: BTreeMap<InstanceId, Instance>,
    retired: BTreeMap<InstanceId, Retired>,
    scheduler: Scheduler,
    tx: Sender<Signal>,
    rx: Receiver<Signal>,
    events: Vec<HostEvent>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("env", &self.env)
            .field("now_ms", &self.now_ms)
            .field("live", &self.instances.len())
            .field("retired", &self.retired.len())
            .field("timers", &self.scheduler.len())
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Host with validated options.
    pub fn new(opts: HostOpts) -> EaselResult<Self> {
        opts.validate()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            env: Environment {
                size: opts.size,
                render_mode: opts.render_mode,
                seed: opts.seed,
            },
            opts,
            now_ms: 0,
            next_instance: 0,
            instances: BTreeMap::new(),
            retired: BTreeMap::new(),
            scheduler: Scheduler::new(),
            tx,
            rx,
            events: Vec::new(),
        })
    }

    /// Options the host was built with.
    pub fn opts(&self) -> &HostOpts {
        &self.opts
    }

    /// Environment new instances start with.
    pub fn environment(&self) -> Environment {
        self.env
    }

    /// Host clock in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Load a generator and invoke its `initialize`.
    ///
    /// A generator that faults synchronously is still assigned an id; the failure shows up as a
    /// [`HostEvent::Failed`].
    #[tracing::instrument(skip(self, generator))]
    pub fn load(&mut self, generator: Box<dyn Generator>) -> EaselResult<InstanceId> {
        Ok(self.admit(generator, None)?.0)
    }

    /// Build a generator from the host environment, then load it.
    pub fn load_with<G, F>(&mut self, build: F) -> EaselResult<InstanceId>
    where
        G: Generator + 'static,
        F: FnOnce(&Environment) -> EaselResult<G>,
    {
        let generator = build(&self.env)?;
        self.load(Box::new(generator))
    }

    /// Load a generator with persisted settings applied before `initialize`.
    #[tracing::instrument(skip(self, generator, snapshot))]
    pub fn load_restored(
        &mut self,
        generator: Box<dyn Generator>,
        snapshot: &SettingsSnapshot,
    ) -> EaselResult<(InstanceId, RestoreReport)> {
        let (id, report) = self.admit(generator, Some(snapshot))?;
        Ok((id, report.unwrap_or_default()))
    }

    /// Lifecycle state, `None` for ids this host never issued.
    pub fn state(&self, id: InstanceId) -> Option<LifecycleState> {
        if let Some(inst) = self.instances.get(&id) {
            return Some(inst.state);
        }
        self.retired
            .contains_key(&id)
            .then_some(LifecycleState::Unloaded)
    }

    /// Live settings of a loaded instance.
    pub fn settings(&self, id: InstanceId) -> Option<&SettingsSchema> {
        self.instances.get(&id).map(|i| &i.settings)
    }

    /// Generation task still in flight, if any.
    pub fn active_task(&self, id: InstanceId) -> Option<TaskId> {
        let inst = self.instances.get(&id)?;
        inst.current
            .as_ref()
            .filter(|t| !t.completed && inst.state == LifecycleState::Generating)
            .map(|t| t.id)
    }

    /// Counters of a live or retired instance.
    pub fn stats(&self, id: InstanceId) -> Option<InstanceStats> {
        match self.instances.get(&id) {
            Some(inst) => Some(inst.stats),
            None => self.retired.get(&id).map(|r| r.stats),
        }
    }

    /// Why the instance failed, if it did.
    pub fn failure(&self, id: InstanceId) -> Option<&FailureCause> {
        match self.instances.get(&id) {
            Some(inst) => inst.failure.as_ref(),
            None => self.retired.get(&id)?.failure.as_ref(),
        }
    }

    /// Live timers owned by the instance.
    pub fn timer_count(&self, id: InstanceId) -> usize {
        self.scheduler.count_for(id)
    }

    /// Validate and store one setting; regenerates when the normalized value changed.
    ///
    /// Rejected values return [`EaselError::Setting`] and leave the stored value untouched.
    /// During `Initializing` the value is stored and the first `generate` sees it.
    #[tracing::instrument(skip(self, value))]
    pub fn set_setting(
        &mut self,
        id: InstanceId,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> EaselResult<SettingUpdate> {
        let inst = self.writable(id, "change settings")?;
        let update = inst.settings.set(key, value)?;
        let regenerate = update.changed && inst.state.regenerates_on_change();
        tracing::debug!(instance = %id, key, changed = update.changed, "setting written");
        if regenerate {
            self.start_generation(id);
            self.drain_signals();
        }
        Ok(update)
    }

    /// Validate every change first, then store them all and regenerate at most once.
    ///
    /// The first rejected value aborts the whole batch without storing anything.
    pub fn set_settings<K, I>(&mut self, id: InstanceId, changes: I) -> EaselResult<Vec<SettingUpdate>>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, SettingValue)>,
    {
        let inst = self.writable(id, "change settings")?;
        let mut staged = Vec::new();
        for (key, value) in changes {
            let normalized = inst.settings.validate(key.as_ref(), value)?;
            staged.push((key, normalized));
        }
        let mut updates = Vec::with_capacity(staged.len());
        for (key, value) in staged {
            updates.push(inst.settings.set(key.as_ref(), value)?);
        }
        if updates.iter().any(|u| u.changed) && inst.state.regenerates_on_change() {
            self.start_generation(id);
            self.drain_signals();
        }
        Ok(updates)
    }

    /// Apply persisted values through validation; regenerates when anything changed.
    pub fn restore_settings(
        &mut self,
        id: InstanceId,
        snapshot: &SettingsSnapshot,
    ) -> EaselResult<RestoreReport> {
        let inst = self.writable(id, "restore settings")?;
        let report = inst.settings.restore(snapshot);
        if report.changed && inst.state.regenerates_on_change() {
            self.start_generation(id);
            self.drain_signals();
        }
        Ok(report)
    }

    /// Start a fresh generation with unchanged settings, cancelling any in-flight task.
    pub fn regenerate(&mut self, id: InstanceId) -> EaselResult<TaskId> {
        let inst = self.live(id, "regenerate")?;
        if !inst.state.regenerates_on_change() {
            return Err(LifecycleViolation::new(id, inst.state, "regenerate").into());
        }
        let task = self.start_generation(id);
        self.drain_signals();
        if let Some(cause) = self.failure(id) {
            return Err(cause.clone().into());
        }
        task.ok_or_else(|| EaselError::runtime(format!("instance {id} failed to start generating")))
    }

    /// Resize the instance's surface and regenerate.
    ///
    /// A panicking surface faults the instance and the fault is returned.
    pub fn resize(&mut self, id: InstanceId, size: SurfaceSize) -> EaselResult<()> {
        let size = SurfaceSize::new(size.width, size.height)?;
        let inst = self.live(id, "resize the surface")?;
        if !inst.state.regenerates_on_change() {
            return Err(LifecycleViolation::new(id, inst.state, "resize the surface").into());
        }
        let state = inst.state;
        let resized = guarded(|| inst.generator.surface_mut().map(|s| s.resize(size)));
        match resized {
            Ok(Some(Ok(()))) => inst.env.size = size,
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => {
                let v = LifecycleViolation::new(id, state, "drop its surface before destroy");
                self.violate(id, v.clone());
                self.drain_signals();
                return Err(v.into());
            }
            Err(reason) => {
                self.fault(id, OpKind::Generate, reason);
                self.drain_signals();
                return Err(self.failed(id));
            }
        }
        self.start_generation(id);
        self.drain_signals();
        Ok(())
    }

    /// Tear the instance down.
    ///
    /// An in-flight task is cancelled and its pending continuations are delivered once, cancelled,
    /// before `destroy` runs. During `Initializing` the unload is deferred until `initialize`
    /// completes. Unloading an already unloaded instance is a no-op.
    #[tracing::instrument(skip(self))]
    pub fn unload(&mut self, id: InstanceId) -> EaselResult<()> {
        if self.retired.contains_key(&id) {
            return Ok(());
        }
        let inst = self.live(id, "unload")?;
        match inst.state {
            LifecycleState::Initializing => {
                inst.unload_requested = true;
                tracing::debug!(instance = %id, "unload deferred until initialize completes");
            }
            LifecycleState::Idle | LifecycleState::Generating => {
                self.begin_destroy(id);
                self.drain_signals();
            }
            LifecycleState::Destroying | LifecycleState::Unloaded => {}
        }
        Ok(())
    }

    /// Unload `id` and load `generator` in its place, carrying over settings whose keys match.
    pub fn replace(
        &mut self,
        id: InstanceId,
        generator: Box<dyn Generator>,
    ) -> EaselResult<(InstanceId, RestoreReport)> {
        let snapshot = self.live(id, "replace")?.settings.snapshot();
        self.unload(id)?;
        self.load_restored(generator, &snapshot)
    }

    /// Read back the surface after the current task completed.
    ///
    /// Only allowed in `Idle`, so nothing attributable to a stale or unfinished task is ever read.
    /// A surface that refuses to be read is an error for the caller; one that panics faults the
    /// instance.
    pub fn capture(&mut self, id: InstanceId) -> EaselResult<FrameRGBA> {
        let Some(inst) = self.instances.get(&id) else {
            return Err(self.missing(id, "capture the surface"));
        };
        let settled = inst.state == LifecycleState::Idle
            && inst.current.as_ref().is_some_and(|t| t.completed);
        if !settled {
            return Err(LifecycleViolation::new(id, inst.state, "capture the surface").into());
        }
        let state = inst.state;
        let read = guarded(|| inst.generator.surface().map(|s| s.capture()));
        match read {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                Err(LifecycleViolation::new(id, state, "capture a missing surface").into())
            }
            Err(reason) => {
                self.fault(id, OpKind::Generate, reason);
                self.drain_signals();
                Err(self.failed(id))
            }
        }
    }

    /// Process pending completions; if there were none, fire the earliest timer due before every
    /// outstanding deadline, or expire a deadline the clock has already reached.
    ///
    /// Never waits in real time and never skips the clock past an outstanding deadline, so an
    /// operation completing on another thread is not timed out early. Returns `false` when there
    /// was nothing to do.
    pub fn step(&mut self) -> EaselResult<bool> {
        if self.drain_signals() > 0 {
            return Ok(true);
        }
        let progressed = match self.earliest_deadline() {
            Some(d) if d <= self.now_ms => {
                self.expire_deadlines();
                true
            }
            Some(d) => self.fire_next_timer(d),
            None => self.fire_next_timer(u64::MAX),
        };
        self.drain_signals();
        Ok(progressed)
    }

    /// Move the clock forward by `ms`, firing timers and expiring deadlines on the way.
    pub fn advance_by(&mut self, ms: u64) -> EaselResult<()> {
        let target = self.now_ms.saturating_add(ms);
        let mut steps = 0usize;
        loop {
            self.drain_signals();
            if !self.progress_until(target) {
                break;
            }
            self.spend(&mut steps)?;
        }
        self.now_ms = self.now_ms.max(target);
        self.drain_signals();
        Ok(())
    }

    /// Drive until no instance has an outstanding lifecycle operation.
    ///
    /// Timers due before the earliest deadline fire in order. When nothing can run, the host
    /// blocks in real time, in slices of at most `stall_wait_ms`, for an off-thread completion;
    /// the waited time is credited to the clock until the deadline is reached. Timers left over
    /// after this returns (e.g. idle animations) stay scheduled.
    #[tracing::instrument(skip(self))]
    pub fn run_until_idle(&mut self) -> EaselResult<()> {
        let mut steps = 0usize;
        loop {
            self.drain_signals();
            let Some(deadline) = self.earliest_deadline() else {
                return Ok(());
            };
            if self.scheduler.next_due().is_some_and(|t| t <= deadline) {
                self.spend(&mut steps)?;
                self.progress_until(deadline);
            } else if self.now_ms >= deadline {
                self.spend(&mut steps)?;
                self.expire_deadlines();
            } else {
                self.wait_for_signal(deadline);
            }
        }
    }

    /// Drain queued notifications.
    pub fn take_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }

    fn spend(&self, steps: &mut usize) -> EaselResult<()> {
        *steps += 1;
        if *steps > self.opts.max_steps_per_run {
            return Err(EaselError::runtime(format!(
                "step budget of {} exhausted at t={} ms",
                self.opts.max_steps_per_run, self.now_ms
            )));
        }
        Ok(())
    }

    // One unit of work not past `limit`: the earliest timer, or the earliest deadline if it comes
    // first. Timers due exactly at a deadline fire before it expires.
    fn progress_until(&mut self, limit: u64) -> bool {
        let next_timer = self.scheduler.next_due().filter(|t| *t <= limit);
        let next_deadline = self.earliest_deadline().filter(|d| *d <= limit);
        match (next_timer, next_deadline) {
            (Some(t), d) if d.is_none_or(|d| t <= d) => self.fire_next_timer(t),
            (_, Some(d)) => {
                self.now_ms = self.now_ms.max(d);
                self.expire_deadlines();
                self.drain_signals();
                true
            }
            _ => false,
        }
    }

    fn fire_next_timer(&mut self, limit: u64) -> bool {
        let Some(due) = self.scheduler.next_due().filter(|t| *t <= limit) else {
            return false;
        };
        self.now_ms = self.now_ms.max(due);
        if let Some((timer, entry)) = self.scheduler.pop_due(due) {
            self.dispatch_timer(timer, entry);
        }
        self.drain_signals();
        true
    }

    // Nothing can run before `deadline`: block for one slice of real time and credit the time
    // spent to the clock. Stops at the deadline so it expires on the next pass.
    fn wait_for_signal(&mut self, deadline: u64) {
        let slice = self
            .opts
            .timeouts
            .stall_wait_ms
            .clamp(1, deadline.saturating_sub(self.now_ms).max(1));
        let started = Instant::now();
        let received = self.rx.recv_timeout(Duration::from_millis(slice));
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let credited = match received {
            Ok(_) => elapsed,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => elapsed.max(slice),
        };
        self.now_ms = self.now_ms.saturating_add(credited).min(deadline);
        if let Ok(signal) = received {
            tracing::trace!(waited_ms = elapsed, "off-thread completion arrived");
            self.on_signal(signal);
        }
    }

    fn admit(
        &mut self,
        generator: Box<dyn Generator>,
        snapshot: Option<&SettingsSnapshot>,
    ) -> EaselResult<(InstanceId, Option<RestoreReport>)> {
        let mut settings = guarded(|| generator.settings()).map_err(|reason| {
            EaselError::runtime(format!("generator settings could not be declared: {reason}"))
        })??;
        let report = snapshot.map(|s| settings.restore(s));

        self.next_instance += 1;
        let id = InstanceId(self.next_instance);
        let lifetime = CancellationToken::new();
        self.instances.insert(
            id,
            Instance {
                generator,
                env: self.env,
                settings,
                random: Random::new(self.env.seed),
                state: LifecycleState::Unloaded,
                lifetime: lifetime.clone(),
                next_task: 0,
                current: None,
                outstanding: None,
                unload_requested: false,
                failure: None,
                stats: InstanceStats::default(),
            },
        );

        if !self.transition(id, LifecycleState::Initializing) {
            return Ok((id, report));
        }
        self.events.push(HostEvent::Loaded { instance: id });
        self.set_outstanding(id, OpKind::Initialize, None);
        let done = self.completion(id, OpKind::Initialize, None);
        if let Err(reason) =
            self.invoke(id, OpKind::Initialize, None, lifetime, Call::Initialize(done))
        {
            self.fault(id, OpKind::Initialize, reason);
        }
        self.drain_signals();
        Ok((id, report))
    }

    fn live(&mut self, id: InstanceId, operation: &str) -> EaselResult<&mut Instance> {
        if !self.instances.contains_key(&id) {
            return Err(self.missing(id, operation));
        }
        self.instances
            .get_mut(&id)
            .ok_or_else(|| EaselError::validation(format!("unknown instance {id}")))
    }

    fn writable(&mut self, id: InstanceId, operation: &str) -> EaselResult<&mut Instance> {
        let inst = self.live(id, operation)?;
        match inst.state {
            LifecycleState::Initializing | LifecycleState::Idle | LifecycleState::Generating => {
                Ok(inst)
            }
            state => Err(LifecycleViolation::new(id, state, operation).into()),
        }
    }

    fn missing(&self, id: InstanceId, operation: &str) -> EaselError {
        if self.retired.contains_key(&id) {
            LifecycleViolation::new(id, LifecycleState::Unloaded, operation).into()
        } else {
            EaselError::validation(format!("unknown instance {id}"))
        }
    }

    // Error for an instance that just faulted.
    fn failed(&self, id: InstanceId) -> EaselError {
        match self.failure(id) {
            Some(cause) => cause.clone().into(),
            None => EaselError::runtime(format!("instance {id} failed")),
        }
    }

    fn completion(&self, instance: InstanceId, op: OpKind, task: Option<TaskId>) -> Completion {
        Completion::new(Ticket { instance, op, task }, self.tx.clone())
    }

    fn set_outstanding(&mut self, id: InstanceId, op: OpKind, task: Option<TaskId>) {
        let t = &self.opts.timeouts;
        let budget = match op {
            OpKind::Initialize => t.initialize_ms,
            OpKind::Generate => t.generate_ms,
            OpKind::Destroy => t.destroy_ms,
        };
        let deadline_ms = self.now_ms.saturating_add(budget);
        if let Some(inst) = self.instances.get_mut(&id) {
            inst.outstanding = Some(Outstanding {
                op,
                task,
                deadline_ms,
            });
        }
    }

    fn transition(&mut self, id: InstanceId, to: LifecycleState) -> bool {
        let Some(inst) = self.instances.get_mut(&id) else {
            return false;
        };
        let from = inst.state;
        if !from.can_transition_to(to) {
            self.violate(id, LifecycleViolation::new(id, from, format!("enter {to}")));
            return false;
        }
        inst.state = to;
        tracing::debug!(instance = %id, %from, %to, "lifecycle transition");
        true
    }

    fn invoke(
        &mut self,
        id: InstanceId,
        phase: OpKind,
        task: Option<TaskId>,
        token: CancellationToken,
        call: Call,
    ) -> Result<(), FaultReason> {
        let Some(inst) = self.instances.get_mut(&id) else {
            return Ok(());
        };
        let mut cx = Context {
            instance: id,
            phase,
            task,
            token,
            env: &inst.env,
            settings: &inst.settings,
            random: &mut inst.random,
            scheduler: &mut self.scheduler,
            now_ms: self.now_ms,
        };
        let generator = &mut inst.generator;
        let result = guarded(|| match call {
            Call::Initialize(done) => generator.initialize(&mut cx, done),
            Call::Generate(done) => generator.generate(&mut cx, done),
            Call::Destroy(done) => generator.destroy(&mut cx, done),
            Call::Resume(timer) => generator.resume(&mut cx, timer),
        })?;
        result.map_err(|e| FaultReason::Error(format!("{e:#}")))
    }

    fn start_generation(&mut self, id: InstanceId) -> Option<TaskId> {
        let inst = self.instances.get_mut(&id)?;
        if let Some(prev) = inst.current.take() {
            prev.token.cancel();
            if !prev.completed {
                inst.stats.generations_cancelled += 1;
                self.events.push(HostEvent::GenerationCancelled {
                    instance: id,
                    task: prev.id,
                });
            }
        }
        inst.next_task += 1;
        let task = TaskId(inst.next_task);
        let token = CancellationToken::new();
        inst.current = Some(ActiveTask {
            id: task,
            token: token.clone(),
            completed: false,
        });
        if self.opts.reseed_each_generate {
            inst.random.seed(inst.env.seed);
        }
        inst.stats.generations_started += 1;

        if !self.transition(id, LifecycleState::Generating) {
            return None;
        }
        self.events.push(HostEvent::GenerationStarted { instance: id, task });
        self.set_outstanding(id, OpKind::Generate, Some(task));
        let done = self.completion(id, OpKind::Generate, Some(task));
        if let Err(reason) = self.invoke(id, OpKind::Generate, Some(task), token, Call::Generate(done))
        {
            self.fault(id, OpKind::Generate, reason);
        }
        Some(task)
    }

    fn drain_signals(&mut self) -> usize {
        let mut n = 0;
        while let Ok(signal) = self.rx.try_recv() {
            self.on_signal(signal);
            n += 1;
        }
        n
    }

    fn on_signal(&mut self, signal: Signal) {
        let Ticket { instance, op, task } = signal.ticket;
        let Some(inst) = self.instances.get_mut(&instance) else {
            tracing::trace!(%instance, %op, "completion for unloaded instance ignored");
            return;
        };
        let current = inst
            .outstanding
            .is_some_and(|o| o.op == op && o.task == task);
        if !current {
            match (op, task, &signal.outcome) {
                (OpKind::Generate, Some(task), Outcome::Completed | Outcome::Failed(_)) => {
                    inst.stats.stale_completions += 1;
                    tracing::debug!(%instance, %task, "stale completion ignored");
                    self.events
                        .push(HostEvent::StaleCompletionIgnored { instance, task });
                }
                _ => tracing::trace!(%instance, %op, outcome = ?signal.outcome, "late signal ignored"),
            }
            return;
        }

        match signal.outcome {
            Outcome::Completed => match op {
                OpKind::Initialize => self.finish_initialize(instance),
                OpKind::Generate => self.finish_generation(instance),
                OpKind::Destroy => self.finish_destroy(instance),
            },
            Outcome::Failed(msg) => self.fault(instance, op, FaultReason::Error(msg)),
            Outcome::Abandoned => self.fault(instance, op, FaultReason::Abandoned),
        }
    }

    fn finish_initialize(&mut self, id: InstanceId) {
        let Some(inst) = self.instances.get_mut(&id) else {
            return;
        };
        inst.outstanding = None;
        let export = inst.env.render_mode.requires_retained_contents();
        let state = inst.state;
        let unload = inst.unload_requested;
        let broken = guarded(|| match inst.generator.surface() {
            None => Some("provide a surface after initialize"),
            Some(s) if export && !s.retains_contents() => {
                Some("provide a non-retaining surface in export mode")
            }
            Some(_) => None,
        });
        match broken {
            Ok(None) => {}
            Ok(Some(operation)) => {
                self.violate(id, LifecycleViolation::new(id, state, operation));
                return;
            }
            Err(reason) => {
                self.fault(id, OpKind::Initialize, reason);
                return;
            }
        }

        if !self.transition(id, LifecycleState::Idle) {
            return;
        }
        self.events.push(HostEvent::Ready { instance: id });
        if unload {
            self.begin_destroy(id);
        } else {
            self.start_generation(id);
        }
    }

    fn finish_generation(&mut self, id: InstanceId) {
        let Some(inst) = self.instances.get_mut(&id) else {
            return;
        };
        inst.outstanding = None;
        let Some(task) = inst.current.as_mut() else {
            return;
        };
        task.completed = true;
        let task = task.id;
        inst.stats.generations_completed += 1;
        if self.transition(id, LifecycleState::Idle) {
            self.events
                .push(HostEvent::GenerationCompleted { instance: id, task });
        }
    }

    fn finish_destroy(&mut self, id: InstanceId) {
        if let Some(inst) = self.instances.get_mut(&id) {
            inst.outstanding = None;
        }
        if self.transition(id, LifecycleState::Unloaded) {
            self.retire(id);
        }
    }

    fn begin_destroy(&mut self, id: InstanceId) {
        let Some(inst) = self.instances.get_mut(&id) else {
            return;
        };
        inst.lifetime.cancel();
        if let Some(task) = inst.current.as_ref() {
            task.token.cancel();
            if !task.completed {
                inst.stats.generations_cancelled += 1;
                self.events.push(HostEvent::GenerationCancelled {
                    instance: id,
                    task: task.id,
                });
            }
        }
        inst.outstanding = None;
        if !self.transition(id, LifecycleState::Destroying) {
            return;
        }

        self.flush_cancelled(id);

        self.set_outstanding(id, OpKind::Destroy, None);
        let done = self.completion(id, OpKind::Destroy, None);
        let token = CancellationToken::new();
        if let Err(reason) = self.invoke(id, OpKind::Destroy, None, token, Call::Destroy(done)) {
            self.fault(id, OpKind::Destroy, reason);
        }
    }

    // Deliver every pending continuation once with its cancellation set, so the generator can
    // release per-task resources before `destroy` runs.
    fn flush_cancelled(&mut self, id: InstanceId) {
        for (timer, entry) in self.scheduler.pending_for(id) {
            self.scheduler.remove(timer);
            entry.token.cancel();
            if let Some(inst) = self.instances.get_mut(&id) {
                inst.stats.timers_fired += 1;
            }
            tracing::trace!(instance = %id, %timer, "delivering cancelled continuation");
            if let Err(reason) = self.invoke(id, entry.phase, entry.task, entry.token, Call::Resume(timer))
            {
                let fault = GeneratorFault {
                    instance: id,
                    op: entry.phase,
                    reason,
                };
                tracing::warn!(instance = %id, %fault, "fault while cancelling continuations");
                self.record_failure(id, FailureCause::Fault(fault));
            }
        }
    }

    fn dispatch_timer(&mut self, timer: TimerId, entry: TimerEntry) {
        let id = entry.instance;
        let Some(inst) = self.instances.get_mut(&id) else {
            return;
        };
        if inst.state == LifecycleState::Destroying && entry.phase != OpKind::Destroy {
            self.scheduler.remove(timer);
            return;
        }
        inst.stats.timers_fired += 1;
        let cancelled = entry.token.is_cancelled();
        let result = self.invoke(id, entry.phase, entry.task, entry.token, Call::Resume(timer));
        if cancelled && self.scheduler.remove(timer).is_some() {
            tracing::trace!(instance = %id, %timer, "dropped continuation of cancelled task");
        }
        if let Err(reason) = result {
            self.fault(id, entry.phase, reason);
        }
    }

    fn earliest_deadline(&self) -> Option<u64> {
        self.instances
            .values()
            .filter_map(|i| i.outstanding.map(|o| o.deadline_ms))
            .min()
    }

    fn expire_deadlines(&mut self) {
        let now = self.now_ms;
        let expired: Vec<_> = self
            .instances
            .iter()
            .filter_map(|(id, i)| {
                i.outstanding
                    .filter(|o| o.deadline_ms <= now)
                    .map(|o| (*id, o.op))
            })
            .collect();
        for (id, op) in expired {
            let t = &self.opts.timeouts;
            let limit_ms = match op {
                OpKind::Initialize => t.initialize_ms,
                OpKind::Generate => t.generate_ms,
                OpKind::Destroy => t.destroy_ms,
            };
            self.fault(id, op, FaultReason::TimedOut { limit_ms });
        }
    }

    fn fault(&mut self, id: InstanceId, op: OpKind, reason: FaultReason) {
        let fault = GeneratorFault {
            instance: id,
            op,
            reason,
        };
        tracing::warn!(instance = %id, %fault, "generator fault");
        self.record_failure(id, FailureCause::Fault(fault));
        self.tear_down(id);
    }

    fn violate(&mut self, id: InstanceId, violation: LifecycleViolation) {
        tracing::warn!(instance = %id, %violation, "lifecycle violation");
        self.record_failure(id, FailureCause::Violation(violation));
        self.tear_down(id);
    }

    fn record_failure(&mut self, id: InstanceId, cause: FailureCause) {
        let Some(inst) = self.instances.get_mut(&id) else {
            return;
        };
        if inst.failure.is_some() {
            return;
        }
        inst.failure = Some(cause.clone());
        self.events.push(HostEvent::Failed {
            instance: id,
            cause,
        });
    }

    fn tear_down(&mut self, id: InstanceId) {
        let Some(inst) = self.instances.get_mut(&id) else {
            return;
        };
        match inst.state {
            LifecycleState::Initializing | LifecycleState::Idle | LifecycleState::Generating => {
                self.begin_destroy(id);
            }
            // destroy already ran once; the instance is abandoned as it is
            LifecycleState::Destroying => {
                inst.outstanding = None;
                if self.transition(id, LifecycleState::Unloaded) {
                    self.retire(id);
                }
            }
            LifecycleState::Unloaded => {}
        }
    }

    fn retire(&mut self, id: InstanceId) {
        let Some(mut inst) = self.instances.remove(&id) else {
            return;
        };
        inst.lifetime.cancel();
        let purged = self.scheduler.purge_instance(id);
        inst.stats.timers_purged += purged as u64;
        if purged > 0 {
            tracing::debug!(instance = %id, purged, "purged leftover timers");
        }
        self.events.push(HostEvent::Unloaded { instance: id });
        self.retired.insert(
            id,
            Retired {
                stats: inst.stats,
                failure: inst.failure,
            },
        );
    }
}

// Run generator code, turning a panic into a fault reason.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, FaultReason> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| FaultReason::Panicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/host/controller.rs"]
mod tests;
