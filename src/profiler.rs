use super::*;

thread_local! {
  static IN_PROFILER: Cell<bool> = const { Cell::new(false) };
}

/// Outcome of one event handler. Handlers never fail across the boundary;
/// anything that went wrong has already been logged.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EventStatus {
  /// Profiling is switched off; nothing was counted.
  Disabled,
  /// The event was seen but did not change any statistic.
  Ignored,
  /// The profiler is not attached yet, or has already shut down.
  NotReady,
  /// The call stack was full; the frame goes untracked.
  Overflow,
  Recorded,
  /// Raised from inside the profiler's own work on this thread.
  Suppressed,
  /// The event named an identity that could not be resolved.
  Unknown,
}

impl EventStatus {
  #[must_use]
  pub fn is_recorded(self) -> bool {
    self == Self::Recorded
  }

  fn from_error(event: &'static str, error: &ProfilerError) -> Self {
    match error {
      ProfilerError::StackOverflow { .. } => Self::Overflow,
      ProfilerError::UnknownClass(_) | ProfilerError::UnknownMethod(_) => {
        debug!(event, %error, "unresolved identity");
        Self::Unknown
      }
      _ => {
        warn!(event, %error, "event handler failed");
        Self::Ignored
      }
    }
  }
}

/// Builder that customizes a [`ProfilerConfig`] and the host binding.
#[derive(Default)]
pub struct ProfilerBuilder {
  config: ProfilerConfig,
  host: Option<Arc<dyn HostRuntime>>,
}

impl ProfilerBuilder {
  #[must_use]
  pub fn finish(self) -> Profiler {
    Profiler::with_host(
      self.config,
      self.host.unwrap_or_else(|| Arc::new(DetachedHost)),
    )
  }

  #[must_use]
  pub fn host(mut self, host: Arc<dyn HostRuntime>) -> Self {
    self.host = Some(host);
    self
  }

  #[must_use]
  pub fn live_trace(mut self, live: bool) -> Self {
    self.config.live_trace = live;
    self
  }

  #[must_use]
  pub fn mode(mut self, mode: ProfilerMode) -> Self {
    self.config.mode = mode;
    self
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn scope<I, S>(mut self, patterns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.config = self.config.with_scope(patterns);
    self
  }

  #[must_use]
  pub fn stack_size(mut self, size: usize) -> Self {
    self.config = self.config.with_stack_size(size);
    self
  }

  #[must_use]
  pub fn start_enabled(mut self, enabled: bool) -> Self {
    self.config.start_enabled = enabled;
    self
  }

  #[must_use]
  pub fn with_config(mut self, config: ProfilerConfig) -> Self {
    self.config = config;
    self
  }
}

/// Epoch counter advanced by garbage-collection events.
#[derive(Debug, Default)]
struct GcClock {
  collecting: AtomicBool,
  number: AtomicU64,
  timestamp: AtomicU64,
}

impl GcClock {
  fn current(&self) -> GcEpoch {
    GcEpoch {
      number: self.number.load(Ordering::Acquire),
      timestamp: self.timestamp.load(Ordering::Acquire),
    }
  }

  fn finish(&self, timestamp: u64) -> GcEpoch {
    self.timestamp.store(timestamp, Ordering::Release);
    let number = self.number.fetch_add(1, Ordering::AcqRel) + 1;
    self.collecting.store(false, Ordering::Release);

    GcEpoch { number, timestamp }
  }

  fn start(&self) {
    self.collecting.store(true, Ordering::Release);
  }
}

struct ProfilerInner {
  config: RwLock<Arc<ProfilerConfig>>,
  enabled: AtomicBool,
  gc: GcClock,
  host: Arc<dyn HostRuntime>,
  initialized: AtomicBool,
  live_trace: AtomicBool,
  mode: AtomicU8,
  registry: Registry,
  threads: ThreadRegistry,
  timers: AtomicU8,
  trace: TraceBuffer,
  trace_flush_pending: AtomicBool,
}

impl fmt::Debug for ProfilerInner {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProfilerInner")
      .field("enabled", &self.enabled)
      .field("initialized", &self.initialized)
      .field(
        "mode",
        &ProfilerMode::from_index(self.mode.load(Ordering::Relaxed)),
      )
      .field("registry", &self.registry)
      .field("threads", &self.threads.count())
      .finish_non_exhaustive()
  }
}

/// The agent's context object: registries, thread tracker and settings,
/// created once at attach time and handed to every event.
#[derive(Clone, Debug)]
pub struct Profiler {
  inner: Arc<ProfilerInner>,
}

impl Profiler {
  /// Replace one configuration key and re-apply the result to every record.
  ///
  /// # Errors
  ///
  /// Returns the configuration error for unknown keys or bad values; the
  /// active configuration is left untouched in that case.
  pub fn apply_property(&self, key: &str, values: &[&str]) -> Result<()> {
    let mut config = ProfilerConfig::clone(&self.config());
    config.apply(key, values)?;
    self.install_config(config);

    info!(key, ?values, "property applied");
    Ok(())
  }

  #[must_use]
  pub fn builder() -> ProfilerBuilder {
    ProfilerBuilder::new()
  }

  #[must_use]
  pub fn config(&self) -> Arc<ProfilerConfig> {
    Arc::clone(&read_lock(&self.inner.config))
  }

  pub fn disable(&self) {
    if self.inner.enabled.swap(false, Ordering::AcqRel) {
      info!("profiling disabled");
    }
  }

  /// Buffered live trace tags, oldest first, as a `trace` node. Tags past
  /// the trace output limit stay queued for the next drain.
  pub fn drain_trace(&self) -> Tag {
    let limit = self.config().output_limit(OutputKind::Trace);
    let (tags, dropped) = self.inner.trace.drain(limit);

    self
      .inner
      .trace_flush_pending
      .store(self.inner.trace.is_flush_pending(), Ordering::Release);

    let mut tag = Tag::node("trace")
      .uint("events", tags.len() as u64)
      .uint("pending", self.inner.trace.len() as u64)
      .uint("dropped", dropped);

    for event in tags {
      tag.push(event);
    }

    tag
  }

  pub fn dump_alerts(&self) -> Tag {
    self.inner.registry.dump_alerts()
  }

  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownClass`] when no class matches `name`.
  pub fn dump_fields(&self, name: &str) -> Result<Tag> {
    self.inner.registry.dump_fields(name)
  }

  pub fn dump_heap(&self, column: ClassColumn, limit: Option<usize>) -> Tag {
    let limit = limit
      .unwrap_or_else(|| self.config().output_limit(OutputKind::Classes));
    self.inner.registry.dump_heap(column, limit)
  }

  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownClass`] when no class matches `name`.
  pub fn dump_history(&self, name: &str) -> Result<Tag> {
    self.inner.registry.dump_history(name)
  }

  pub fn dump_methods(
    &self,
    column: MethodColumn,
    limit: Option<usize>,
  ) -> Tag {
    let limit = limit
      .unwrap_or_else(|| self.config().output_limit(OutputKind::Methods));
    self.inner.registry.dump_methods(column, limit)
  }

  pub fn dump_threads(&self) -> Tag {
    let limit = self.config().output_limit(OutputKind::Threads);
    self.inner.threads.dump(limit)
  }

  pub fn enable(&self) {
    if !self.inner.enabled.swap(true, Ordering::AcqRel) {
      info!(mode = self.mode().name(), "profiling enabled");
    }
  }

  #[must_use]
  pub fn gc_epoch(&self) -> GcEpoch {
    self.inner.gc.current()
  }

  #[must_use]
  pub fn is_enabled(&self) -> bool {
    self.inner.enabled.load(Ordering::Acquire)
  }

  #[must_use]
  pub fn is_initialized(&self) -> bool {
    self.inner.initialized.load(Ordering::Acquire)
  }

  #[must_use]
  pub fn mode(&self) -> ProfilerMode {
    ProfilerMode::from_index(self.inner.mode.load(Ordering::Acquire))
  }

  #[must_use]
  pub fn new() -> Self {
    Self::with_config(ProfilerConfig::default())
  }

  /// A new class has been loaded.
  pub fn on_class_load(&self, decl: &ClassDecl) -> EventStatus {
    self.dispatch("class_load", || {
      let config = self.config();
      self.inner.registry.register_class(decl, &*config)?;
      Ok(EventStatus::Recorded)
    })
  }

  /// A class has been unloaded; it is evicted once nothing keeps it.
  pub fn on_class_unload(&self, class: ClassId) -> EventStatus {
    self.dispatch("class_unload", || {
      if self.inner.registry.class(class).is_none() {
        return Err(ProfilerError::UnknownClass(class.to_string()));
      }

      self.inner.registry.unload_class(class);
      Ok(EventStatus::Recorded)
    })
  }

  pub fn on_field_access(
    &self,
    thread: ThreadId,
    class: ClassId,
    field: FieldId,
  ) -> EventStatus {
    self.dispatch("field_access", || {
      if !self.is_enabled() {
        return Ok(EventStatus::Disabled);
      }

      if self.thread(thread).is_process_jni() {
        return Ok(EventStatus::Suppressed);
      }

      let field = self
        .resolve_class(class)?
        .field(field)
        .ok_or_else(|| ProfilerError::UnknownClass(class.to_string()))?;
      field.touch();

      Ok(EventStatus::Recorded)
    })
  }

  pub fn on_gc_finish(&self, timestamp: u64) -> EventStatus {
    self.dispatch("gc_finish", || {
      let epoch = self.inner.gc.finish(timestamp);
      debug!(epoch = epoch.number, timestamp, "gc finished");
      Ok(EventStatus::Recorded)
    })
  }

  pub fn on_gc_start(&self) -> EventStatus {
    self.dispatch("gc_start", || {
      self.inner.gc.start();
      Ok(EventStatus::Recorded)
    })
  }

  /// Method entry on `thread`. `location` is the current source line, when
  /// the host knows it.
  pub fn on_method_enter(
    &self,
    thread: ThreadId,
    method: MethodId,
    now: Timestamp,
    location: Option<i64>,
  ) -> EventStatus {
    self.dispatch("method_enter", || {
      let thread = self.thread(thread);
      thread.observe(now);

      if !self.is_enabled() || !self.timer_enabled(TimerKind::Method) {
        thread.with_stacks(ThreadStacks::enter_virtual);
        return Ok(EventStatus::Disabled);
      }

      if thread.is_process_jni() {
        thread.with_stacks(ThreadStacks::enter_virtual);
        return Ok(EventStatus::Suppressed);
      }

      let Some(method) = self.resolve_method(method)? else {
        thread.with_stacks(ThreadStacks::enter_virtual);
        return Ok(EventStatus::Unknown);
      };

      self.enter_frame(&thread, method, now, location)
    })
  }

  /// Method exit on `thread`; pops the innermost frame and adds its deltas.
  pub fn on_method_exit(
    &self,
    thread: ThreadId,
    method: MethodId,
    now: Timestamp,
  ) -> EventStatus {
    self.dispatch("method_exit", || {
      let Some(thread) = self.inner.threads.get(thread) else {
        return Ok(EventStatus::Ignored);
      };
      thread.observe(now);

      let Some(exited) = thread.with_stacks(ThreadStacks::exit_frame) else {
        return Ok(EventStatus::Ignored);
      };

      if exited.frame.method.id() != method {
        debug!(
          thread = %thread.id(),
          expected = %exited.frame.method.id(),
          got = %method,
          "exit does not match innermost frame"
        );
      }

      Ok(self.exit_frame(&thread, &exited, now))
    })
  }

  /// Contended monitor acquisition started.
  pub fn on_monitor_contended_enter(
    &self,
    thread: ThreadId,
    now: Timestamp,
  ) -> EventStatus {
    self.dispatch("monitor_contended_enter", || {
      if !self.monitoring() {
        return Ok(EventStatus::Disabled);
      }

      let thread = self.thread(thread);
      thread.observe(now);
      thread.with_stacks(|stacks| {
        let method = stacks.peek().map(|frame| Arc::clone(&frame.method));
        stacks.monitor_begin(now.wall_us, method);
      });

      Ok(EventStatus::Recorded)
    })
  }

  /// Contended monitor acquired; the blocked time becomes collision time.
  pub fn on_monitor_contended_entered(
    &self,
    thread: ThreadId,
    now: Timestamp,
  ) -> EventStatus {
    self.dispatch("monitor_contended_entered", || {
      let Some(thread) = self.inner.threads.get(thread) else {
        return Ok(EventStatus::Ignored);
      };
      thread.observe(now);

      let Some((blocked, method)) =
        thread.with_stacks(|stacks| stacks.monitor_end(now.wall_us))
      else {
        return Ok(EventStatus::Ignored);
      };

      if !self.monitoring() {
        return Ok(EventStatus::Disabled);
      }

      thread.add_collision(blocked);

      if let Some(method) = method {
        method.record_contention(blocked);
      }

      Ok(EventStatus::Recorded)
    })
  }

  pub fn on_monitor_wait(
    &self,
    thread: ThreadId,
    now: Timestamp,
  ) -> EventStatus {
    self.dispatch("monitor_wait", || {
      if !self.monitoring() {
        return Ok(EventStatus::Disabled);
      }

      let thread = self.thread(thread);
      thread.observe(now);
      thread.with_stacks(|stacks| stacks.wait_begin(now.wall_us));

      Ok(EventStatus::Recorded)
    })
  }

  pub fn on_monitor_waited(
    &self,
    thread: ThreadId,
    now: Timestamp,
  ) -> EventStatus {
    self.dispatch("monitor_waited", || {
      let Some(thread) = self.inner.threads.get(thread) else {
        return Ok(EventStatus::Ignored);
      };
      thread.observe(now);

      let Some(waited) =
        thread.with_stacks(|stacks| stacks.wait_end(now.wall_us))
      else {
        return Ok(EventStatus::Ignored);
      };

      if !self.monitoring() {
        return Ok(EventStatus::Disabled);
      }

      thread.add_wait(waited);
      Ok(EventStatus::Recorded)
    })
  }

  /// A new object of `class` was allocated by `thread`.
  pub fn on_object_alloc(
    &self,
    thread: ThreadId,
    class: ClassId,
    size: u64,
  ) -> EventStatus {
    self.dispatch("object_alloc", || {
      if !self.heap_tracking() {
        return Ok(EventStatus::Disabled);
      }

      let thread = self.thread(thread);

      if thread.is_process_jni() {
        return Ok(EventStatus::Suppressed);
      }

      let class = self.resolve_class(class)?;

      if class.is_excluded() {
        return Ok(EventStatus::Ignored);
      }

      if class.allocate(size, self.inner.gc.current()) {
        warn!(
          class = class.name(),
          live = class.live_size(),
          "memory alert: steady growth across gc epochs"
        );
      }

      thread.add_allocated(size);

      let triggered = thread.with_stacks(|stacks| {
        let triggered = stacks.is_triggered();

        if triggered && !stacks.push_allocation(class.id(), size) {
          debug!(
            thread = %thread.id(),
            class = class.name(),
            "allocation site stack full, site dropped"
          );
        }

        triggered
      });

      if triggered && self.inner.live_trace.load(Ordering::Relaxed) {
        self.emit(
          Tag::leaf("alloc")
            .text("class", class.name())
            .uint("size", size)
            .hidden("thread", thread.id().to_string()),
        );
      }

      Ok(EventStatus::Recorded)
    })
  }

  /// An object of `class` was freed. Frees of an unloaded class's last
  /// bytes make it eligible for eviction.
  ///
  /// Gated like allocations, so live sizes only move while heap tracking
  /// is on.
  pub fn on_object_free(&self, class: ClassId, size: u64) -> EventStatus {
    self.dispatch("object_free", || {
      if !self.heap_tracking() {
        return Ok(EventStatus::Disabled);
      }

      let class = self
        .inner
        .registry
        .class(class)
        .ok_or_else(|| ProfilerError::UnknownClass(class.to_string()))?;

      class.deallocate(size, true);

      if class.is_delete_pending() {
        self.inner.registry.delete_class(&class);
      }

      Ok(EventStatus::Recorded)
    })
  }

  pub fn on_object_realloc(
    &self,
    thread: ThreadId,
    class: ClassId,
    old_size: u64,
    new_size: u64,
  ) -> EventStatus {
    self.dispatch("object_realloc", || {
      if !self.heap_tracking() {
        return Ok(EventStatus::Disabled);
      }

      let thread = self.thread(thread);

      if thread.is_process_jni() {
        return Ok(EventStatus::Suppressed);
      }

      let class = self.resolve_class(class)?;
      class.reallocate(old_size, new_size, self.inner.gc.current());
      thread.add_allocated(new_size.saturating_sub(old_size));

      Ok(EventStatus::Recorded)
    })
  }

  pub fn on_thread_end(&self, thread: ThreadId) -> EventStatus {
    self.dispatch("thread_end", || {
      Ok(match self.inner.threads.detach(thread) {
        Some(_) => EventStatus::Recorded,
        None => EventStatus::Ignored,
      })
    })
  }

  pub fn on_thread_start(&self, thread: ThreadId, name: &str) -> EventStatus {
    self.dispatch("thread_start", || {
      self.inner.threads.attach(thread, name);
      Ok(EventStatus::Recorded)
    })
  }

  /// The host is shutting down. Later events are answered with
  /// [`EventStatus::NotReady`].
  pub fn on_vm_death(&self) -> EventStatus {
    let status = self.dispatch("vm_death", || {
      self.disable();
      let (classes, methods) = self.inner.registry.counts();
      info!(
        classes,
        methods,
        threads = self.inner.threads.count(),
        "vm death"
      );
      Ok(EventStatus::Recorded)
    });

    self.inner.initialized.store(false, Ordering::Release);
    status
  }

  /// The host finished starting; events are accepted from now on.
  pub fn on_vm_init(&self) {
    if self.inner.initialized.swap(true, Ordering::AcqRel) {
      return;
    }

    let config = self.config();

    if config.start_enabled {
      self.inner.enabled.store(true, Ordering::Release);
    }

    info!(
      mode = self.mode().name(),
      enabled = self.is_enabled(),
      stack_size = config.stack_size_limit(),
      "profiler initialized"
    );
  }

  /// Store the result of a heap walk for `class`.
  ///
  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownClass`] for a class that cannot be
  /// resolved.
  pub fn record_heap_census(
    &self,
    class: ClassId,
    count: u64,
    bytes: u64,
  ) -> Result<()> {
    self.resolve_class(class)?.set_heap(count, bytes);
    Ok(())
  }

  #[must_use]
  pub fn registry(&self) -> &Registry {
    &self.inner.registry
  }

  /// Zero every statistic on every class, method and thread.
  pub fn reset(&self) {
    self.run_suppressed(|| {
      self.inner.registry.reset_statistics();
      self.inner.threads.reset_all();
    });

    info!("statistics reset");
  }

  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownClass`] when no class matches `name`.
  pub fn reset_alert(&self, name: &str) -> Result<()> {
    self
      .inner
      .registry
      .class_by_name(name)
      .ok_or_else(|| ProfilerError::UnknownClass(name.into()))?
      .reset_alert();

    Ok(())
  }

  /// Run `func` with every event raised on this thread suppressed.
  pub fn run_suppressed<R>(&self, func: impl FnOnce() -> R) -> R {
    IN_PROFILER.with(|flag| {
      let _restore = Restore {
        previous: flag.replace(true),
        flag,
      };

      func()
    })
  }

  pub fn set_mode(&self, mode: ProfilerMode) {
    let previous = ProfilerMode::from_index(
      self.inner.mode.swap(mode.index(), Ordering::AcqRel),
    );

    let mut config = ProfilerConfig::clone(&self.config());
    config.mode = mode;
    *write_lock(&self.inner.config) = Arc::new(config);

    if previous != mode {
      info!(from = previous.name(), to = mode.name(), "profiler mode changed");
    }
  }

  /// Mark `thread` as running the profiler's own native machinery, which
  /// must not be instrumented.
  pub fn set_process_jni(&self, thread: ThreadId, active: bool) {
    self.thread(thread).set_process_jni(active);
  }

  #[must_use]
  pub fn threads(&self) -> &ThreadRegistry {
    &self.inner.threads
  }

  /// Whether the live trace buffer has crossed its flush threshold since
  /// it was last drained.
  #[must_use]
  pub fn trace_flush_pending(&self) -> bool {
    self.inner.trace_flush_pending.load(Ordering::Acquire)
  }

  #[must_use]
  pub fn with_config(config: ProfilerConfig) -> Self {
    Self::with_host(config, Arc::new(DetachedHost))
  }

  #[must_use]
  pub fn with_host(config: ProfilerConfig, host: Arc<dyn HostRuntime>) -> Self {
    let inner = ProfilerInner {
      enabled: AtomicBool::new(false),
      gc: GcClock::default(),
      host,
      initialized: AtomicBool::new(false),
      live_trace: AtomicBool::new(config.live_trace),
      mode: AtomicU8::new(config.mode.index()),
      registry: Registry::new(),
      threads: ThreadRegistry::new(config.stack_size_limit()),
      timers: AtomicU8::new(config.timer_bits()),
      trace: TraceBuffer::new(config.trace_buffer_size),
      trace_flush_pending: AtomicBool::new(false),
      config: RwLock::new(Arc::new(config)),
    };

    Self {
      inner: Arc::new(inner),
    }
  }

  /// Run one handler body behind the readiness check and the reentrancy
  /// guard, folding any error into a status.
  fn dispatch<F>(&self, event: &'static str, handler: F) -> EventStatus
  where
    F: FnOnce() -> Result<EventStatus>,
  {
    if !self.is_initialized() {
      return EventStatus::NotReady;
    }

    match with_guard(handler) {
      None => EventStatus::Suppressed,
      Some(Ok(status)) => status,
      Some(Err(error)) => EventStatus::from_error(event, &error),
    }
  }

  fn emit(&self, tag: Tag) {
    if self.inner.trace.record(tag) == DrainAction::FlushPending {
      self.inner.trace_flush_pending.store(true, Ordering::Release);
    }
  }

  fn enter_frame(
    &self,
    thread: &ThreadRecord,
    method: Arc<MethodRecord>,
    now: Timestamp,
    location: Option<i64>,
  ) -> Result<EventStatus> {
    let mode = self.mode();
    let live = self.inner.live_trace.load(Ordering::Relaxed);

    let mut frame = Frame::new(Arc::clone(&method), now, location);
    frame.entry_calls = thread.add_call();
    frame.entry_memory = thread.allocated();

    thread.with_stacks(|stacks| {
      if let Err(error) = stacks.enter_frame(frame) {
        if thread.report_overflow() {
          warn!(
            thread = %thread.id(),
            %error,
            "call stack full, deeper frames go untracked"
          );
        }
        return Err(error);
      }

      let triggers = (method.is_debug()
        || (method.has_trace_context()
          && stacks
            .call_view()
            .is_some_and(|call| method.check_context(call, true))))
        && method.location_in_bounds(location);

      if triggers && stacks.push_trigger(Arc::clone(&method)) && live {
        let mut enter = Tag::leaf("enter")
          .text("method", method.full_name())
          .uint("depth", stacks.depth() as u64)
          .int("line", location.unwrap_or(-1))
          .uint("timestamp", now.wall_us)
          .hidden("thread", thread.id().to_string());

        if method
          .trace_context()
          .is_some_and(|context| context.has_attribute("locals"))
        {
          for local in method.locals() {
            enter.push(local.dump());
          }
        }

        self.emit(enter);
      }

      let admitted = match mode {
        ProfilerMode::Ats | ProfilerMode::Profile => true,
        ProfilerMode::Jarm => method.is_timer(),
        ProfilerMode::Trigger => stacks.is_triggered(),
      } && stacks
        .call_view()
        .is_some_and(|call| method.check_context(call, false));

      if !(admitted && method.enter()) {
        return Ok(EventStatus::Ignored);
      }

      if let Some(top) = stacks.callstack().peek_mut() {
        top.counted = true;
      }

      Ok(EventStatus::Recorded)
    })
  }

  fn exit_frame(
    &self,
    thread: &ThreadRecord,
    exited: &ExitedFrame,
    now: Timestamp,
  ) -> EventStatus {
    let frame = &exited.frame;
    let (cpu, elapsed) = now.since(frame.entry);

    if let Some(trigger) = &exited.trigger {
      if self.inner.live_trace.load(Ordering::Relaxed) {
        self.emit(
          Tag::leaf("exit")
            .text("method", trigger.method.full_name())
            .uint("depth", trigger.depth as u64)
            .micros("cpu", cpu)
            .micros("elapsed", elapsed)
            .uint(
              "allocated",
              thread.allocated().saturating_sub(frame.entry_memory),
            )
            .uint("sites", exited.allocations as u64)
            .uint("calls", thread.calls().saturating_sub(frame.entry_calls))
            .hidden("thread", thread.id().to_string()),
        );

        // A closed bracket is ready for the console.
        self.inner.trace_flush_pending.store(true, Ordering::Release);
      }
    }

    if !self.is_enabled() {
      return EventStatus::Disabled;
    }

    if !frame.counted {
      return EventStatus::Ignored;
    }

    if self.mode() != ProfilerMode::Ats {
      let cpu = if self.timer_enabled(TimerKind::Cpu) { cpu } else { 0 };
      frame.method.exit(cpu, elapsed);
    }

    if self.timer_enabled(TimerKind::Heap) {
      frame
        .method
        .add_allocated(thread.allocated().saturating_sub(frame.entry_memory));
    }

    EventStatus::Recorded
  }

  fn heap_tracking(&self) -> bool {
    self.is_enabled() && self.timer_enabled(TimerKind::Heap)
  }

  fn install_config(&self, config: ProfilerConfig) {
    self.inner.mode.store(config.mode.index(), Ordering::Release);
    self.inner.timers.store(config.timer_bits(), Ordering::Release);
    self
      .inner
      .live_trace
      .store(config.live_trace, Ordering::Release);
    self.inner.threads.set_stack_size(config.stack_size_limit());

    let config = Arc::new(config);
    *write_lock(&self.inner.config) = Arc::clone(&config);

    self.run_suppressed(|| self.inner.registry.apply_properties(&*config));
  }

  fn monitoring(&self) -> bool {
    self.is_enabled() && self.timer_enabled(TimerKind::Monitor)
  }

  /// Registered class, or one the host can describe, registered now.
  fn resolve_class(&self, class: ClassId) -> Result<Arc<ClassRecord>> {
    if let Some(record) = self.inner.registry.class(class) {
      return Ok(record);
    }

    let decl = self
      .inner
      .host
      .class_info(class)
      .ok_or_else(|| ProfilerError::UnknownClass(class.to_string()))?;

    let config = self.config();
    self.inner.registry.register_class(&decl, &*config)
  }

  /// Registered method, or one first seen at call time that the host can
  /// describe. `None` when nobody knows the method.
  fn resolve_method(
    &self,
    method: MethodId,
  ) -> Result<Option<Arc<MethodRecord>>> {
    if let Some(record) = self.inner.registry.method(method) {
      return Ok(Some(record));
    }

    let Some((class, decl)) = self.inner.host.method_info(method) else {
      return Ok(None);
    };

    let class = self.resolve_class(class)?;
    let config = self.config();

    self
      .inner
      .registry
      .register_method(&class, &decl, &*config)
      .map(Some)
  }

  fn thread(&self, thread: ThreadId) -> Arc<ThreadRecord> {
    self.inner.threads.get_or_attach(thread, || {
      self
        .inner
        .host
        .thread_name(thread)
        .unwrap_or_else(|| format!("thread-{}", thread.key()))
    })
  }

  fn timer_enabled(&self, kind: TimerKind) -> bool {
    self.inner.timers.load(Ordering::Relaxed) & kind.bit() != 0
  }
}

impl Default for Profiler {
  fn default() -> Self {
    Self::new()
  }
}

struct Restore<'a> {
  flag: &'a Cell<bool>,
  previous: bool,
}

impl Drop for Restore<'_> {
  fn drop(&mut self) {
    self.flag.set(self.previous);
  }
}

/// Run `func` unless this thread is already inside a handler.
fn with_guard<F, R>(func: F) -> Option<R>
where
  F: FnOnce() -> R,
{
  IN_PROFILER.with(|flag| {
    if flag.get() {
      None
    } else {
      let _restore = Restore {
        previous: flag.replace(true),
        flag,
      };

      Some(func())
    }
  })
}
