use super::*;

/// One tracked invocation on a thread's call stack.
#[derive(Debug, Clone)]
pub struct Frame {
  /// Whether the method's gate admitted the call at entry. Exit only adds
  /// time for admitted calls, even if the gate has changed since.
  pub counted: bool,
  pub entry: Timestamp,
  /// Thread call count when the frame was pushed.
  pub entry_calls: u64,
  /// Thread allocated bytes when the frame was pushed.
  pub entry_memory: u64,
  pub location: Option<i64>,
  pub method: Arc<MethodRecord>,
  outer_virtual: u32,
}

impl Frame {
  #[must_use]
  pub fn new(
    method: Arc<MethodRecord>,
    entry: Timestamp,
    location: Option<i64>,
  ) -> Self {
    Self {
      counted: false,
      entry,
      entry_calls: 0,
      entry_memory: 0,
      location,
      method,
      outer_virtual: 0,
    }
  }
}

/// A popped frame together with what unwound alongside it.
#[derive(Debug, Clone)]
pub struct ExitedFrame {
  /// Bytes of the allocation sites released with the frame.
  pub allocated_bytes: u64,
  pub allocations: usize,
  pub frame: Frame,
  /// Trigger opened by this frame, if it was one.
  pub trigger: Option<TriggerFrame>,
}

/// Active trace trigger on the debug stack.
#[derive(Debug, Clone)]
pub struct TriggerFrame {
  /// Call-stack depth of the triggering frame.
  pub depth: usize,
  pub method: Arc<MethodRecord>,
}

/// Allocation in progress at some call depth.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AllocationSite {
  pub class: ClassId,
  pub depth: usize,
  pub method: Option<MethodId>,
  pub size: u64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ThreadState {
  Unattached = 0,
  Attached = 1,
  Detached = 2,
}

impl ThreadState {
  fn from_u8(value: u8) -> Self {
    match value {
      1 => Self::Attached,
      2 => Self::Detached,
      _ => Self::Unattached,
    }
  }

  #[must_use]
  pub fn name(self) -> &'static str {
    match self {
      Self::Attached => "attached",
      Self::Detached => "detached",
      Self::Unattached => "unattached",
    }
  }
}

impl StackView for FrameStack<Frame> {
  fn depth(&self) -> usize {
    self.len()
  }

  fn frame(&self, from_top: usize) -> Option<(&str, &str)> {
    self
      .get_from_top(from_top)
      .map(|frame| (frame.method.class_name(), frame.method.name()))
  }
}

/// Thread-affine stacks of one [`ThreadRecord`].
///
/// Only the owning thread pushes and pops; the mutex around this exists so
/// reports can take a consistent look from elsewhere.
#[derive(Debug)]
pub struct ThreadStacks {
  alloc: Option<FrameStack<AllocationSite>>,
  call: Option<FrameStack<Frame>>,
  capacity: usize,
  debug: Option<FrameStack<TriggerFrame>>,
  monitor_started: Option<(u64, Option<Arc<MethodRecord>>)>,
  virtual_depth: u32,
  wait_started: Option<u64>,
}

impl ThreadStacks {
  fn new(capacity: usize) -> Self {
    Self {
      alloc: None,
      call: None,
      capacity,
      debug: None,
      monitor_started: None,
      virtual_depth: 0,
      wait_started: None,
    }
  }

  /// Pending allocation sites, sized on first use.
  pub fn alloc_stack(&mut self) -> &mut FrameStack<AllocationSite> {
    let capacity = self.capacity;
    self.alloc.get_or_insert_with(|| FrameStack::new(capacity))
  }

  /// The live call stack, sized on first use.
  pub fn callstack(&mut self) -> &mut FrameStack<Frame> {
    let capacity = self.capacity;
    self.call.get_or_insert_with(|| FrameStack::new(capacity))
  }

  /// Read-only call stack, if one has been allocated.
  #[must_use]
  pub fn call_view(&self) -> Option<&FrameStack<Frame>> {
    self.call.as_ref()
  }

  #[must_use]
  pub fn capacity(&self) -> usize {
    self.call.as_ref().map_or(self.capacity, FrameStack::capacity)
  }

  /// Active trace triggers, sized on first use.
  pub fn debug_stack(&mut self) -> &mut FrameStack<TriggerFrame> {
    let capacity = self.capacity;
    self.debug.get_or_insert_with(|| FrameStack::new(capacity))
  }

  /// Physical frames on the call stack.
  #[must_use]
  pub fn depth(&self) -> usize {
    self.call.as_ref().map_or(0, FrameStack::len)
  }

  /// Push `frame`, starting a fresh virtual count above it.
  ///
  /// # Errors
  ///
  /// On a full stack the frame is dropped, the call is counted as virtual
  /// depth so the matching exit stays balanced, and the capacity is
  /// returned.
  pub fn enter_frame(&mut self, mut frame: Frame) -> Result<FrameHandle> {
    frame.outer_virtual = self.virtual_depth;

    match self.callstack().push(frame) {
      Ok(handle) => {
        self.virtual_depth = 0;
        Ok(handle)
      }
      Err(_) => {
        self.virtual_depth += 1;
        Err(ProfilerError::StackOverflow {
          capacity: self.capacity(),
        })
      }
    }
  }

  /// Count a nesting level that has no frame of its own.
  pub fn enter_virtual(&mut self) {
    self.virtual_depth += 1;
  }

  /// Leave the innermost call.
  ///
  /// Virtual levels unwind first. Popping a physical frame restores the
  /// virtual count that was live beneath it and releases any trigger or
  /// allocation sites opened at its depth.
  pub fn exit_frame(&mut self) -> Option<ExitedFrame> {
    if self.virtual_depth > 0 {
      self.virtual_depth -= 1;
      return None;
    }

    let frame = self.call.as_mut()?.pop()?;
    self.virtual_depth = frame.outer_virtual;

    let depth = self.depth();
    let mut exited = ExitedFrame {
      allocated_bytes: 0,
      allocations: 0,
      frame,
      trigger: None,
    };

    if let Some(debug) = self.debug.as_mut() {
      while debug.peek().is_some_and(|trigger| trigger.depth > depth) {
        exited.trigger = debug.pop();
      }
    }

    if let Some(alloc) = self.alloc.as_mut() {
      while let Some(site) =
        alloc.peek().copied().filter(|site| site.depth > depth)
      {
        exited.allocated_bytes += site.size;
        exited.allocations += 1;
        alloc.pop();
      }
    }

    Some(exited)
  }

  #[must_use]
  pub fn is_triggered(&self) -> bool {
    self.debug.as_ref().is_some_and(|debug| !debug.is_empty())
  }

  /// Remember where a contended monitor wait began.
  pub fn monitor_begin(
    &mut self,
    wall_us: u64,
    method: Option<Arc<MethodRecord>>,
  ) {
    self.monitor_started = Some((wall_us, method));
  }

  /// Close the contended wait started by [`Self::monitor_begin`].
  pub fn monitor_end(
    &mut self,
    wall_us: u64,
  ) -> Option<(u64, Option<Arc<MethodRecord>>)> {
    let (started, method) = self.monitor_started.take()?;
    Some((wall_us.saturating_sub(started), method))
  }

  #[must_use]
  pub fn peek(&self) -> Option<&Frame> {
    self.call.as_ref().and_then(FrameStack::peek)
  }

  /// Record an allocation at the current depth inside an active trigger.
  ///
  /// Sites only feed trigger exits, so nothing is kept outside one. A full
  /// stack drops the site.
  pub fn push_allocation(&mut self, class: ClassId, size: u64) -> bool {
    if !self.is_triggered() {
      return false;
    }

    let depth = self.depth();
    let method = self.peek().map(|frame| frame.method.id());

    self
      .alloc_stack()
      .push(AllocationSite {
        class,
        depth,
        method,
        size,
      })
      .is_ok()
  }

  /// Activate a trigger for the frame currently on top.
  pub fn push_trigger(&mut self, method: Arc<MethodRecord>) -> bool {
    let depth = self.depth();

    self
      .debug_stack()
      .push(TriggerFrame { depth, method })
      .is_ok()
  }

  #[must_use]
  pub fn trigger_depth(&self) -> usize {
    self.debug.as_ref().map_or(0, FrameStack::len)
  }

  #[must_use]
  pub fn virtual_depth(&self) -> u32 {
    self.virtual_depth
  }

  pub fn wait_begin(&mut self, wall_us: u64) {
    self.wait_started = Some(wall_us);
  }

  pub fn wait_end(&mut self, wall_us: u64) -> Option<u64> {
    self
      .wait_started
      .take()
      .map(|started| wall_us.saturating_sub(started))
  }

  fn dump_into(&self, tag: &mut Tag) {
    if let Some(call) = &self.call {
      for frame in call.iter().rev() {
        tag.push(
          Tag::leaf("frame")
            .text("method", frame.method.full_name())
            .int("line", frame.location.unwrap_or(-1)),
        );
      }
    }

    if let Some(alloc) = &self.alloc {
      for site in alloc.iter().rev() {
        tag.push(
          Tag::leaf("allocating")
            .hidden("class", site.class.to_string())
            .uint("size", site.size)
            .uint("depth", site.depth as u64),
        );
      }
    }
  }
}

/// Per-thread bookkeeping, created on first sight of a runtime thread.
#[derive(Debug)]
pub struct ThreadRecord {
  allocated: AtomicU64,
  calls: AtomicU64,
  clock_started: AtomicBool,
  collision: AtomicU64,
  contention_count: AtomicU64,
  cpu_now: AtomicU64,
  cpu_start: AtomicU64,
  id: ThreadId,
  name: RwLock<String>,
  overflow_reported: AtomicBool,
  process_jni: AtomicBool,
  stacks: Mutex<ThreadStacks>,
  state: AtomicU8,
  wait: AtomicU64,
  wall_now: AtomicU64,
  wall_start: AtomicU64,
}

impl ThreadRecord {
  pub fn add_allocated(&self, bytes: u64) {
    self.allocated.fetch_add(bytes, Ordering::Relaxed);
  }

  pub fn add_call(&self) -> u64 {
    self.calls.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// Account a contended monitor acquisition that blocked for `micros`.
  pub fn add_collision(&self, micros: u64) {
    self.collision.fetch_add(micros, Ordering::Relaxed);
    self.contention_count.fetch_add(1, Ordering::Relaxed);
  }

  pub fn add_wait(&self, micros: u64) {
    self.wait.fetch_add(micros, Ordering::Relaxed);
  }

  #[must_use]
  pub fn allocated(&self) -> u64 {
    self.allocated.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn calls(&self) -> u64 {
    self.calls.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn collision(&self) -> u64 {
    self.collision.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn contention_count(&self) -> u64 {
    self.contention_count.load(Ordering::Relaxed)
  }

  /// CPU micros observed between the first and latest timestamps.
  #[must_use]
  pub fn cpu(&self) -> u64 {
    self
      .cpu_now
      .load(Ordering::Relaxed)
      .saturating_sub(self.cpu_start.load(Ordering::Relaxed))
  }

  pub fn dump(&self) -> Tag {
    let depth = self.with_stacks(|stacks| stacks.depth());

    let mut tag = Tag::leaf("thread")
      .text("name", self.name())
      .text("state", self.state().name())
      .uint("calls", self.calls())
      .micros("cpu", self.cpu())
      .micros("wait", self.wait())
      .micros("collision", self.collision())
      .micros("idle", self.idle())
      .uint("contentions", self.contention_count())
      .uint("allocated", self.allocated())
      .uint("depth", depth as u64)
      .hidden("id", self.id.to_string());

    self.with_stacks(|stacks| stacks.dump_into(&mut tag));

    tag
  }

  #[must_use]
  pub fn elapsed(&self) -> u64 {
    self
      .wall_now
      .load(Ordering::Relaxed)
      .saturating_sub(self.wall_start.load(Ordering::Relaxed))
  }

  #[must_use]
  pub fn id(&self) -> ThreadId {
    self.id
  }

  /// Wall time spent neither running, waiting nor blocked on a monitor.
  #[must_use]
  pub fn idle(&self) -> u64 {
    self.elapsed().saturating_sub(
      self
        .cpu()
        .saturating_add(self.wait())
        .saturating_add(self.collision()),
    )
  }

  #[must_use]
  pub fn is_process_jni(&self) -> bool {
    self.process_jni.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn name(&self) -> String {
    read_lock(&self.name).clone()
  }

  #[must_use]
  pub fn new(id: ThreadId, name: impl Into<String>, stack_size: usize) -> Self {
    Self {
      allocated: AtomicU64::new(0),
      calls: AtomicU64::new(0),
      clock_started: AtomicBool::new(false),
      collision: AtomicU64::new(0),
      contention_count: AtomicU64::new(0),
      cpu_now: AtomicU64::new(0),
      cpu_start: AtomicU64::new(0),
      id,
      name: RwLock::new(name.into()),
      overflow_reported: AtomicBool::new(false),
      process_jni: AtomicBool::new(false),
      stacks: Mutex::new(ThreadStacks::new(stack_size)),
      state: AtomicU8::new(ThreadState::Unattached as u8),
      wait: AtomicU64::new(0),
      wall_now: AtomicU64::new(0),
      wall_start: AtomicU64::new(0),
    }
  }

  /// Advance the thread's clock to `now`; the first call starts it.
  pub fn observe(&self, now: Timestamp) {
    if !self.clock_started.swap(true, Ordering::AcqRel) {
      self.cpu_start.store(now.cpu_us, Ordering::Relaxed);
      self.wall_start.store(now.wall_us, Ordering::Relaxed);
    }

    self.cpu_now.fetch_max(now.cpu_us, Ordering::Relaxed);
    self.wall_now.fetch_max(now.wall_us, Ordering::Relaxed);
  }

  /// Returns `true` the first time the thread overflows its call stack.
  pub fn report_overflow(&self) -> bool {
    !self.overflow_reported.swap(true, Ordering::Relaxed)
  }

  /// Zero counters and restart the clock at the next observed timestamp.
  pub fn reset_statistics(&self) {
    for counter in [
      &self.allocated,
      &self.calls,
      &self.collision,
      &self.contention_count,
      &self.cpu_now,
      &self.cpu_start,
      &self.wait,
      &self.wall_now,
      &self.wall_start,
    ] {
      counter.store(0, Ordering::Relaxed);
    }

    self.clock_started.store(false, Ordering::Release);
    self.overflow_reported.store(false, Ordering::Relaxed);
  }

  pub fn set_name(&self, name: impl Into<String>) {
    *write_lock(&self.name) = name.into();
  }

  /// Mark the thread as running the profiler's own native machinery.
  pub fn set_process_jni(&self, active: bool) {
    self.process_jni.store(active, Ordering::Relaxed);
  }

  pub fn set_state(&self, state: ThreadState) {
    self.state.store(state as u8, Ordering::Release);
  }

  #[must_use]
  pub fn state(&self) -> ThreadState {
    ThreadState::from_u8(self.state.load(Ordering::Acquire))
  }

  #[must_use]
  pub fn wait(&self) -> u64 {
    self.wait.load(Ordering::Relaxed)
  }

  /// Run `f` with the thread's stacks.
  pub fn with_stacks<R>(&self, f: impl FnOnce(&mut ThreadStacks) -> R) -> R {
    f(&mut lock(&self.stacks))
  }
}

/// All live [`ThreadRecord`]s, keyed by thread identity.
#[derive(Debug)]
pub struct ThreadRegistry {
  stack_size: AtomicUsize,
  threads: DashMap<u64, Arc<ThreadRecord>, BuildNoHashHasher<u64>>,
}

impl ThreadRegistry {
  /// Register `id` as attached, reusing a record that already exists.
  pub fn attach(&self, id: ThreadId, name: &str) -> Arc<ThreadRecord> {
    let record = self.get_or_insert(id, || name.to_string());

    if !name.is_empty() {
      record.set_name(name);
    }

    if record.state() != ThreadState::Attached {
      record.set_state(ThreadState::Attached);
      debug!(thread = %id, name, "thread attached");
    }

    record
  }

  pub fn clear(&self) {
    self.threads.clear();
  }

  #[must_use]
  pub fn count(&self) -> usize {
    self.threads.len()
  }

  /// Drop the record of an ending thread.
  pub fn detach(&self, id: ThreadId) -> Option<Arc<ThreadRecord>> {
    let (_, record) = self.threads.remove(&id.key())?;
    record.set_state(ThreadState::Detached);
    debug!(thread = %id, calls = record.calls(), "thread detached");
    Some(record)
  }

  /// Threads sorted by CPU time, busiest first, at most `limit` of them.
  pub fn dump(&self, limit: usize) -> Tag {
    let mut threads = self.snapshot();
    threads.sort_by(|a, b| b.cpu().cmp(&a.cpu()).then(a.id().cmp(&b.id())));

    let mut tag = Tag::node("threads").uint("count", threads.len() as u64);

    for thread in threads.into_iter().take(limit) {
      tag.push(thread.dump());
    }

    tag
  }

  #[must_use]
  pub fn get(&self, id: ThreadId) -> Option<Arc<ThreadRecord>> {
    self
      .threads
      .get(&id.key())
      .map(|entry| Arc::clone(entry.value()))
  }

  /// Record for `id`, attaching it under a resolved name on first sight.
  pub fn get_or_attach<F>(&self, id: ThreadId, name: F) -> Arc<ThreadRecord>
  where
    F: FnOnce() -> String,
  {
    if let Some(record) = self.get(id) {
      return record;
    }

    let record = self.get_or_insert(id, name);
    record.set_state(ThreadState::Attached);
    debug!(
      thread = %id,
      name = %record.name(),
      "thread attached on first event"
    );
    record
  }

  #[must_use]
  pub fn new(stack_size: usize) -> Self {
    Self {
      stack_size: AtomicUsize::new(stack_size),
      threads: DashMap::with_hasher(BuildNoHashHasher::default()),
    }
  }

  pub fn reset_all(&self) {
    for entry in &self.threads {
      entry.value().reset_statistics();
    }
  }

  /// Capacity for call stacks not yet allocated. Existing stacks keep theirs.
  pub fn set_stack_size(&self, stack_size: usize) {
    self.stack_size.store(stack_size, Ordering::Relaxed);
  }

  #[must_use]
  pub fn snapshot(&self) -> Vec<Arc<ThreadRecord>> {
    self
      .threads
      .iter()
      .map(|entry| Arc::clone(entry.value()))
      .collect()
  }

  #[must_use]
  pub fn stack_size(&self) -> usize {
    self.stack_size.load(Ordering::Relaxed)
  }

  fn get_or_insert<F>(&self, id: ThreadId, name: F) -> Arc<ThreadRecord>
  where
    F: FnOnce() -> String,
  {
    let stack_size = self.stack_size();

    Arc::clone(
      self
        .threads
        .entry(id.key())
        .or_insert_with(|| {
          Arc::new(ThreadRecord::new(id, name(), stack_size))
        })
        .value(),
    )
  }
}
