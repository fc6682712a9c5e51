use super::*;

/// Sortable statistic of a [`MethodRecord`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MethodColumn {
  CpuTime,
  Elapsed,
  ContentionTime,
  ContentionCount,
  Calls,
  Allocated,
}

impl MethodColumn {
  pub const ALL: [Self; 6] = [
    Self::CpuTime,
    Self::Elapsed,
    Self::ContentionTime,
    Self::ContentionCount,
    Self::Calls,
    Self::Allocated,
  ];

  /// First column, in [`MethodColumn::ALL`] order, whose name starts with
  /// `prefix` (case-insensitive).
  #[must_use]
  pub fn from_prefix(prefix: &str) -> Option<Self> {
    let prefix = prefix.trim().to_ascii_lowercase();

    if prefix.is_empty() {
      return None;
    }

    Self::ALL
      .into_iter()
      .find(|column| column.name().starts_with(&prefix))
  }

  #[must_use]
  pub fn name(self) -> &'static str {
    match self {
      Self::Allocated => "allocated",
      Self::Calls => "calls",
      Self::ContentionCount => "contentioncount",
      Self::ContentionTime => "contentiontime",
      Self::CpuTime => "cputime",
      Self::Elapsed => "elapsed",
    }
  }
}

impl FromStr for MethodColumn {
  type Err = ProfilerError;

  fn from_str(text: &str) -> Result<Self> {
    Self::from_prefix(text)
      .ok_or_else(|| ProfilerError::UnknownColumn(text.into()))
  }
}

/// Long-lived metadata and running statistics for one method.
///
/// Counters are per-record atomics, so threads working on different methods
/// never touch shared state. `enabled && !excluded` gates every update.
///
/// Exclusion has two sources: the owning class's package rules, refreshed on
/// every property change, and an explicit per-method setting that survives
/// those refreshes.
#[derive(Debug)]
pub struct MethodRecord {
  allocated: AtomicU64,
  calls: AtomicU64,
  class: ClassId,
  class_excluded: AtomicBool,
  class_name: Arc<str>,
  contention_count: AtomicU64,
  contention_max: AtomicU64,
  contention_time: AtomicU64,
  cpu_time: AtomicU64,
  debug: AtomicBool,
  elapsed: AtomicU64,
  enabled: AtomicBool,
  end_line: i32,
  excluded: AtomicBool,
  id: MethodId,
  locals: Box<[LocalVariable]>,
  name: Box<str>,
  profile_context: RwLock<Option<Arc<Context>>>,
  signature: Box<str>,
  start_line: i32,
  timer: AtomicBool,
  trace_context: RwLock<Option<Arc<Context>>>,
}

impl MethodRecord {
  pub fn add_allocated(&self, bytes: u64) {
    if bytes > 0 && self.is_active() {
      self.allocated.fetch_add(bytes, Ordering::Relaxed);
    }
  }

  #[must_use]
  pub fn allocated(&self) -> u64 {
    self.allocated.load(Ordering::Relaxed)
  }

  /// Match the trace context (`debug`) or the profile context against
  /// `stack`. A method without that context always matches.
  #[must_use]
  pub fn check_context<S: StackView + ?Sized>(
    &self,
    stack: &S,
    debug: bool,
  ) -> bool {
    let slot = if debug {
      &self.trace_context
    } else {
      &self.profile_context
    };

    read_lock(slot)
      .as_ref()
      .is_none_or(|context| context.matches(stack))
  }

  #[must_use]
  pub fn class(&self) -> ClassId {
    self.class
  }

  #[must_use]
  pub fn class_name(&self) -> &str {
    &self.class_name
  }

  #[must_use]
  pub fn column_value(&self, column: MethodColumn) -> u64 {
    match column {
      MethodColumn::Allocated => self.allocated(),
      MethodColumn::Calls => self.calls(),
      MethodColumn::ContentionCount => self.contention_count(),
      MethodColumn::ContentionTime => self.contention_time(),
      MethodColumn::CpuTime => self.cpu_time(),
      MethodColumn::Elapsed => self.elapsed(),
    }
  }

  #[must_use]
  pub fn calls(&self) -> u64 {
    self.calls.load(Ordering::Relaxed)
  }

  /// Order of this record's `column` relative to `value`.
  #[must_use]
  pub fn compare(&self, column: MethodColumn, value: u64) -> cmp::Ordering {
    self.column_value(column).cmp(&value)
  }

  #[must_use]
  pub fn contention_count(&self) -> u64 {
    self.contention_count.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn contention_max(&self) -> u64 {
    self.contention_max.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn contention_time(&self) -> u64 {
    self.contention_time.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn cpu_time(&self) -> u64 {
    self.cpu_time.load(Ordering::Relaxed)
  }

  pub fn dump(&self) -> Tag {
    let mut tag = Tag::leaf("method")
      .text("class", self.class_name.as_ref())
      .text("name", self.name.as_ref())
      .text("signature", self.signature.as_ref())
      .uint("calls", self.calls())
      .micros("cputime", self.cpu_time())
      .micros("elapsed", self.elapsed())
      .micros("contentiontime", self.contention_time())
      .uint("contentioncount", self.contention_count())
      .micros("contentionmax", self.contention_max())
      .uint("allocated", self.allocated())
      .hidden("id", self.id.to_string());

    if !self.is_enabled() {
      tag = tag.hidden("disabled", "yes");
    }

    if self.is_excluded() {
      tag = tag.hidden("excluded", "yes");
    }

    for local in self.locals.iter() {
      tag.push(local.dump());
    }

    tag
  }

  #[must_use]
  pub fn elapsed(&self) -> u64 {
    self.elapsed.load(Ordering::Relaxed)
  }

  /// Count a call. Returns whether the gate admitted it.
  pub fn enter(&self) -> bool {
    if !self.is_active() {
      return false;
    }

    self.calls.fetch_add(1, Ordering::Relaxed);
    true
  }

  /// Add the CPU and wall-clock micros of one completed call.
  pub fn exit(&self, cpu_delta: u64, elapsed_delta: u64) -> bool {
    if !self.is_active() {
      return false;
    }

    self.cpu_time.fetch_add(cpu_delta, Ordering::Relaxed);
    self.elapsed.fetch_add(elapsed_delta, Ordering::Relaxed);
    true
  }

  /// `Class.method` label.
  #[must_use]
  pub fn full_name(&self) -> String {
    format!("{}.{}", self.class_name, self.name)
  }

  #[must_use]
  pub fn has_trace_context(&self) -> bool {
    read_lock(&self.trace_context).is_some()
  }

  #[must_use]
  pub fn id(&self) -> MethodId {
    self.id
  }

  /// The sole gate for statistic updates.
  #[must_use]
  pub fn is_active(&self) -> bool {
    self.is_enabled() && !self.is_excluded()
  }

  #[must_use]
  pub fn is_debug(&self) -> bool {
    self.debug.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::Relaxed)
  }

  /// Excluded by its class or explicitly.
  #[must_use]
  pub fn is_excluded(&self) -> bool {
    self.class_excluded.load(Ordering::Relaxed)
      || self.is_excluded_explicitly()
  }

  #[must_use]
  pub fn is_excluded_explicitly(&self) -> bool {
    self.excluded.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn is_timer(&self) -> bool {
    self.timer.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn line_bounds(&self) -> (i32, i32) {
    (self.start_line, self.end_line)
  }

  #[must_use]
  pub fn locals(&self) -> &[LocalVariable] {
    &self.locals
  }

  /// Whether `location` falls inside the method's known source lines.
  /// Unknown bounds or an unknown location always pass.
  #[must_use]
  pub fn location_in_bounds(&self, location: Option<i64>) -> bool {
    let Some(line) = location else {
      return true;
    };

    if self.start_line < 0 || self.end_line < self.start_line {
      return true;
    }

    (i64::from(self.start_line)..=i64::from(self.end_line)).contains(&line)
  }

  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Fresh record with zeroed counters, disabled until scoped in.
  #[must_use]
  pub fn new(decl: &MethodDecl, class: ClassId, class_name: Arc<str>) -> Self {
    Self {
      allocated: AtomicU64::new(0),
      calls: AtomicU64::new(0),
      class,
      class_excluded: AtomicBool::new(false),
      class_name,
      contention_count: AtomicU64::new(0),
      contention_max: AtomicU64::new(0),
      contention_time: AtomicU64::new(0),
      cpu_time: AtomicU64::new(0),
      debug: AtomicBool::new(false),
      elapsed: AtomicU64::new(0),
      enabled: AtomicBool::new(false),
      end_line: decl.end_line,
      excluded: AtomicBool::new(false),
      id: decl.id,
      locals: decl.locals.clone().into_boxed_slice(),
      name: decl.name.as_str().into(),
      profile_context: RwLock::new(None),
      signature: decl.signature.as_str().into(),
      start_line: decl.start_line,
      timer: AtomicBool::new(false),
      trace_context: RwLock::new(None),
    }
  }

  pub fn record_contention(&self, micros: u64) {
    if !self.is_active() {
      return;
    }

    self.contention_count.fetch_add(1, Ordering::Relaxed);
    self.contention_time.fetch_add(micros, Ordering::Relaxed);
    self.contention_max.fetch_max(micros, Ordering::Relaxed);
  }

  pub fn reset_statistics(&self) {
    for counter in [
      &self.allocated,
      &self.calls,
      &self.contention_count,
      &self.contention_max,
      &self.contention_time,
      &self.cpu_time,
      &self.elapsed,
    ] {
      counter.store(0, Ordering::Relaxed);
    }
  }

  pub fn set_class_excluded(&self, excluded: bool) {
    self.class_excluded.store(excluded, Ordering::Relaxed);
  }

  pub fn set_debug(&self, debug: bool) {
    self.debug.store(debug, Ordering::Relaxed);
  }

  pub fn set_enabled(&self, enabled: bool) {
    self.enabled.store(enabled, Ordering::Relaxed);
  }

  /// Explicit exclusion, kept across class-level refreshes.
  pub fn set_excluded(&self, excluded: bool) {
    self.excluded.store(excluded, Ordering::Relaxed);
  }

  pub fn set_profile_context(&self, context: Option<Arc<Context>>) {
    *write_lock(&self.profile_context) = context;
  }

  pub fn set_timer(&self, timer: bool) {
    self.timer.store(timer, Ordering::Relaxed);
  }

  pub fn set_trace_context(&self, context: Option<Arc<Context>>) {
    *write_lock(&self.trace_context) = context;
  }

  #[must_use]
  pub fn signature(&self) -> &str {
    &self.signature
  }

  #[must_use]
  pub fn trace_context(&self) -> Option<Arc<Context>> {
    read_lock(&self.trace_context).clone()
  }
}

impl Disposable for MethodRecord {
  fn dispose(&self, _size: u32) {
    self.set_enabled(false);
    self.reset_statistics();
  }
}
