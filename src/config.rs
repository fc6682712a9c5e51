use super::*;

/// Smallest per-thread call stack.
pub const MIN_STACK_SIZE: usize = 128;

/// Largest per-thread call stack.
pub const MAX_STACK_SIZE: usize = 2048;

/// How intercepted calls turn into statistics.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub enum ProfilerMode {
  /// Every enabled method accumulates statistics.
  #[default]
  Profile,
  /// Statistics accumulate only inside an active trace trigger.
  Trigger,
  /// Only targeted methods are measured, as response-time transactions.
  Jarm,
  /// Calls are counted without timing.
  Ats,
}

impl ProfilerMode {
  pub const ALL: [Self; 4] =
    [Self::Profile, Self::Trigger, Self::Jarm, Self::Ats];

  #[must_use]
  pub fn from_index(index: u8) -> Self {
    Self::ALL
      .get(usize::from(index))
      .copied()
      .unwrap_or_default()
  }

  #[must_use]
  pub fn index(self) -> u8 {
    match self {
      Self::Profile => 0,
      Self::Trigger => 1,
      Self::Jarm => 2,
      Self::Ats => 3,
    }
  }

  #[must_use]
  pub fn name(self) -> &'static str {
    match self {
      Self::Profile => "profile",
      Self::Trigger => "trigger",
      Self::Jarm => "jarm",
      Self::Ats => "ats",
    }
  }
}

impl FromStr for ProfilerMode {
  type Err = ProfilerError;

  fn from_str(text: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|mode| mode.name().eq_ignore_ascii_case(text.trim()))
      .ok_or_else(|| ProfilerError::InvalidProperty {
        key: "Mode".into(),
        value: text.into(),
      })
  }
}

/// Measurement families that can be switched on and off.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum TimerKind {
  /// Per-thread CPU accounting.
  Cpu,
  /// Class allocation and GC history tracking.
  Heap,
  /// Method call counting and timing.
  Method,
  /// Monitor contention and wait timing.
  Monitor,
}

impl TimerKind {
  pub const ALL: [Self; 4] =
    [Self::Cpu, Self::Heap, Self::Method, Self::Monitor];

  #[must_use]
  pub fn bit(self) -> u8 {
    match self {
      Self::Cpu => 0b0001,
      Self::Heap => 0b0010,
      Self::Method => 0b0100,
      Self::Monitor => 0b1000,
    }
  }

  #[must_use]
  pub fn name(self) -> &'static str {
    match self {
      Self::Cpu => "cpu",
      Self::Heap => "heap",
      Self::Method => "method",
      Self::Monitor => "monitor",
    }
  }
}

impl FromStr for TimerKind {
  type Err = ProfilerError;

  fn from_str(text: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|kind| kind.name().eq_ignore_ascii_case(text.trim()))
      .ok_or_else(|| ProfilerError::InvalidProperty {
        key: "Timer".into(),
        value: text.into(),
      })
  }
}

/// Report families with their own row limits.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum OutputKind {
  Classes,
  Methods,
  Threads,
  Trace,
}

impl OutputKind {
  pub const ALL: [Self; 4] =
    [Self::Classes, Self::Methods, Self::Threads, Self::Trace];

  #[must_use]
  pub fn name(self) -> &'static str {
    match self {
      Self::Classes => "classes",
      Self::Methods => "methods",
      Self::Threads => "threads",
      Self::Trace => "trace",
    }
  }
}

/// Read-only configuration predicates consumed by the core.
pub trait Properties: Send + Sync {
  fn history_limit(&self) -> usize;

  fn is_class_debug_targeted(&self, class: &str) -> bool;

  fn is_method_targeted(&self, class: &str, method: &str) -> bool;

  fn is_package_excluded(&self, class: &str) -> bool;

  fn is_package_in_scope(&self, class: &str) -> bool;

  fn leak_alert_enabled(&self) -> bool;

  fn output_limit(&self, kind: OutputKind) -> usize;

  /// Context gating statistics for `class.method`, if any.
  fn profile_context(&self, class: &str, method: &str) -> Option<Arc<Context>>;

  fn profiler_mode(&self) -> ProfilerMode;

  fn stack_size_limit(&self) -> usize;

  fn timer_kind_enabled(&self, kind: TimerKind) -> bool;

  /// Trigger context attached to `class.method`, if any.
  fn trace_context(&self, class: &str, method: &str) -> Option<Arc<Context>>;
}

/// Row limits for each report family.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct OutputLimits {
  pub classes: usize,
  pub methods: usize,
  pub threads: usize,
  pub trace: usize,
}

impl Default for OutputLimits {
  fn default() -> Self {
    Self {
      classes: 50,
      methods: 50,
      threads: 100,
      trace: 1_000,
    }
  }
}

impl OutputLimits {
  #[must_use]
  pub fn get(&self, kind: OutputKind) -> usize {
    match kind {
      OutputKind::Classes => self.classes,
      OutputKind::Methods => self.methods,
      OutputKind::Threads => self.threads,
      OutputKind::Trace => self.trace,
    }
  }

  pub fn set(&mut self, kind: OutputKind, limit: usize) {
    match kind {
      OutputKind::Classes => self.classes = limit,
      OutputKind::Methods => self.methods = limit,
      OutputKind::Threads => self.threads = limit,
      OutputKind::Trace => self.trace = limit,
    }
  }
}

/// Profiler settings, applied from `key = values` pairs or built directly.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
  /// Class patterns whose methods act as trace triggers.
  pub debug_classes: Vec<String>,
  /// GC epochs kept per class, at least [`MIN_HISTORY`].
  pub history_limit: usize,
  /// Whether history rings run the leak heuristic.
  pub leak_alert: bool,
  /// Whether trigger enter/exit tags go to the live trace buffer.
  pub live_trace: bool,
  pub mode: ProfilerMode,
  pub output_limits: OutputLimits,
  /// Contexts that gate statistics for the methods they name.
  pub profile_contexts: Vec<Arc<Context>>,
  pub profile_exclude: Vec<String>,
  /// Package patterns in scope; empty means everything.
  pub profile_scope: Vec<String>,
  /// Per-thread call stack capacity, within
  /// [`MIN_STACK_SIZE`]..=[`MAX_STACK_SIZE`].
  pub stack_size: usize,
  /// Whether profiling starts enabled once attached.
  pub start_enabled: bool,
  pub timers: Vec<TimerKind>,
  /// Capacity of the live trace queue.
  pub trace_buffer_size: usize,
  /// Method contexts targeted for tracing.
  pub trace_triggers: Vec<Arc<Context>>,
}

impl Default for ProfilerConfig {
  fn default() -> Self {
    Self {
      debug_classes: Vec::new(),
      history_limit: MIN_HISTORY,
      leak_alert: true,
      live_trace: false,
      mode: ProfilerMode::Profile,
      output_limits: OutputLimits::default(),
      profile_contexts: Vec::new(),
      profile_exclude: Vec::new(),
      profile_scope: Vec::new(),
      stack_size: 1024,
      start_enabled: true,
      timers: TimerKind::ALL.to_vec(),
      trace_buffer_size: 4096,
      trace_triggers: Vec::new(),
    }
  }
}

impl ProfilerConfig {
  /// Apply one configuration key.
  ///
  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownProperty`] for unrecognized keys and
  /// [`ProfilerError::InvalidProperty`] for values that do not parse.
  pub fn apply(&mut self, key: &str, values: &[&str]) -> Result<()> {
    let lowered = key.trim().to_ascii_lowercase();

    if let Some(kind) = lowered.strip_prefix("outputlimit.") {
      let kind = OutputKind::ALL
        .into_iter()
        .find(|candidate| candidate.name() == kind)
        .ok_or_else(|| ProfilerError::UnknownProperty(key.into()))?;
      let limit = parse_number(key, values)?;
      self.output_limits.set(kind, limit);
      return Ok(());
    }

    match lowered.as_str() {
      "debugclass" => self.debug_classes = owned(values),
      "leakalert" => self.leak_alert = parse_flag(key, values)?,
      "livetrace" => self.live_trace = parse_flag(key, values)?,
      "memorylimithistory" => {
        self.history_limit = parse_number(key, values)?.max(MIN_HISTORY);
      }
      "mode" => {
        self.mode = single(key, values)?.parse()?;
      }
      "profilecontext" => self.profile_contexts = contexts(values),
      "profileexclude" => self.profile_exclude = owned(values),
      "profilescope" => self.profile_scope = owned(values),
      "stacksize" => {
        self.stack_size =
          parse_number(key, values)?.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
      }
      "startenabled" => self.start_enabled = parse_flag(key, values)?,
      "timer" => {
        self.timers = if values.iter().any(|v| v.eq_ignore_ascii_case("none"))
        {
          Vec::new()
        } else {
          values
            .iter()
            .map(|value| value.parse())
            .collect::<Result<Vec<TimerKind>>>()?
        };
      }
      "tracebuffersize" => {
        self.trace_buffer_size = parse_number(key, values)?.max(1);
      }
      "tracetrigger" => self.trace_triggers = contexts(values),
      _ => return Err(ProfilerError::UnknownProperty(key.into())),
    }

    Ok(())
  }

  /// Apply `key = v1, v2` lines. Blank lines and `#` comments are skipped;
  /// malformed lines and rejected keys are logged and ignored. Returns how
  /// many lines were applied.
  pub fn load_str(&mut self, text: &str) -> usize {
    let mut applied = 0;

    for line in text.lines().map(str::trim) {
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      let Some((key, raw)) = line.split_once('=') else {
        warn!(
          error = %ProfilerError::MalformedProperty(line.into()),
          "ignoring property line"
        );
        continue;
      };

      let values: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

      match self.apply(key.trim(), &values) {
        Ok(()) => applied += 1,
        Err(error) => warn!(%error, "ignoring property"),
      }
    }

    applied
  }

  /// Builder-style helper to set the profiler mode.
  #[must_use]
  pub fn with_mode(mut self, mode: ProfilerMode) -> Self {
    self.mode = mode;
    self
  }

  /// Builder-style helper to restrict profiling to `patterns`.
  #[must_use]
  pub fn with_scope<I, S>(mut self, patterns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.profile_scope = patterns.into_iter().map(Into::into).collect();
    self
  }

  /// Builder-style helper to set the per-thread stack capacity.
  #[must_use]
  pub fn with_stack_size(mut self, size: usize) -> Self {
    self.stack_size = size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
    self
  }

  /// Builder-style helper to add a trace trigger expression.
  #[must_use]
  pub fn with_trace_trigger(mut self, expression: &str) -> Self {
    self
      .trace_triggers
      .push(Arc::new(Context::parse(Some(expression))));
    self
  }

  pub(crate) fn timer_bits(&self) -> u8 {
    self.timers.iter().fold(0, |bits, kind| bits | kind.bit())
  }
}

impl Properties for ProfilerConfig {
  fn history_limit(&self) -> usize {
    self.history_limit.max(MIN_HISTORY)
  }

  fn is_class_debug_targeted(&self, class: &str) -> bool {
    self
      .debug_classes
      .iter()
      .any(|pattern| pattern_matches(pattern, class))
  }

  fn is_method_targeted(&self, class: &str, method: &str) -> bool {
    self.trace_context(class, method).is_some()
  }

  fn is_package_excluded(&self, class: &str) -> bool {
    self
      .profile_exclude
      .iter()
      .any(|pattern| pattern_matches(pattern, class))
  }

  fn is_package_in_scope(&self, class: &str) -> bool {
    self.profile_scope.is_empty()
      || self
        .profile_scope
        .iter()
        .any(|pattern| pattern_matches(pattern, class))
  }

  fn leak_alert_enabled(&self) -> bool {
    self.leak_alert
  }

  fn output_limit(&self, kind: OutputKind) -> usize {
    self.output_limits.get(kind)
  }

  fn profile_context(&self, class: &str, method: &str) -> Option<Arc<Context>> {
    self
      .profile_contexts
      .iter()
      .find(|context| context.name_matches(class, method))
      .cloned()
  }

  fn profiler_mode(&self) -> ProfilerMode {
    self.mode
  }

  fn stack_size_limit(&self) -> usize {
    self.stack_size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE)
  }

  fn timer_kind_enabled(&self, kind: TimerKind) -> bool {
    self.timers.contains(&kind)
  }

  fn trace_context(&self, class: &str, method: &str) -> Option<Arc<Context>> {
    self
      .trace_triggers
      .iter()
      .find(|context| context.name_matches(class, method))
      .cloned()
  }
}

/// `pkg.sub` matches the package and everything below it; a trailing `*`
/// makes the pattern a raw prefix (`pkg.Cls*` matches `pkg.ClsImpl`).
#[must_use]
pub fn pattern_matches(pattern: &str, class: &str) -> bool {
  let pattern = pattern.trim();

  if let Some(prefix) = pattern.strip_suffix('*') {
    return class.starts_with(prefix);
  }

  let pattern = pattern.trim_end_matches('.');

  !pattern.is_empty()
    && class.starts_with(pattern)
    && (class.len() == pattern.len()
      || class.as_bytes()[pattern.len()] == b'.')
}

fn contexts(values: &[&str]) -> Vec<Arc<Context>> {
  values
    .iter()
    .map(|value| Arc::new(Context::parse(Some(value))))
    .collect()
}

fn owned(values: &[&str]) -> Vec<String> {
  values.iter().map(|value| (*value).to_string()).collect()
}

fn parse_flag(key: &str, values: &[&str]) -> Result<bool> {
  let value = single(key, values)?;

  match value.to_ascii_lowercase().as_str() {
    "1" | "on" | "true" | "yes" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(ProfilerError::InvalidProperty {
      key: key.into(),
      value: value.into(),
    }),
  }
}

fn parse_number(key: &str, values: &[&str]) -> Result<usize> {
  let value = single(key, values)?;

  value.parse().map_err(|_| ProfilerError::InvalidProperty {
    key: key.into(),
    value: value.into(),
  })
}

fn single<'a>(key: &str, values: &[&'a str]) -> Result<&'a str> {
  match values {
    [value] => Ok(value.trim()),
    _ => Err(ProfilerError::InvalidProperty {
      key: key.into(),
      value: values.join(","),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scope_patterns_respect_package_boundaries() {
    assert!(pattern_matches("com.acme", "com.acme.Cls"));
    assert!(pattern_matches("com.acme.", "com.acme.sub.Cls"));
    assert!(!pattern_matches("com.acme", "com.acmetools.Cls"));
    assert!(pattern_matches("com.acme*", "com.acmetools.Cls"));
    assert!(pattern_matches("com.acme.Cls", "com.acme.Cls"));
    assert!(!pattern_matches("", "com.acme.Cls"));
  }

  #[test]
  fn empty_scope_includes_everything() {
    let config = ProfilerConfig::default();
    assert!(config.is_package_in_scope("any.Cls"));

    let scoped = config.with_scope(["com.acme"]);
    assert!(scoped.is_package_in_scope("com.acme.Cls"));
    assert!(!scoped.is_package_in_scope("org.other.Cls"));
  }

  #[test]
  fn stack_size_and_history_are_clamped() {
    let mut config = ProfilerConfig::default();
    assert_eq!(config.stack_size_limit(), 1024);

    config.apply("StackSize", &["16"]).unwrap();
    assert_eq!(config.stack_size, MIN_STACK_SIZE);

    config.apply("stacksize", &["100000"]).unwrap();
    assert_eq!(config.stack_size, MAX_STACK_SIZE);

    config.apply("MemoryLimitHistory", &["4"]).unwrap();
    assert_eq!(config.history_limit(), MIN_HISTORY);

    config.apply("MemoryLimitHistory", &["32"]).unwrap();
    assert_eq!(config.history_limit(), 32);
  }

  #[test]
  fn trace_triggers_target_methods() {
    let mut config = ProfilerConfig::default();
    config
      .apply("TraceTrigger", &["/.../Cls.foo{cpu}", "Other.bar"])
      .unwrap();

    assert!(config.is_method_targeted("pkg.Cls", "foo"));
    assert!(config.is_method_targeted("x.Other", "bar"));
    assert!(!config.is_method_targeted("pkg.Cls", "baz"));

    let context = config.trace_context("pkg.Cls", "foo").unwrap();
    assert!(context.has_attribute("cpu"));
  }

  #[test]
  fn timers_parse_and_disable() {
    let mut config = ProfilerConfig::default();
    config.apply("Timer", &["method", "heap"]).unwrap();
    assert!(config.timer_kind_enabled(TimerKind::Method));
    assert!(!config.timer_kind_enabled(TimerKind::Monitor));
    assert_eq!(
      config.timer_bits(),
      TimerKind::Method.bit() | TimerKind::Heap.bit()
    );

    config.apply("Timer", &["none"]).unwrap();
    assert!(config.timers.is_empty());

    assert!(config.apply("Timer", &["bogus"]).is_err());
  }

  #[test]
  fn rejects_unknown_keys_and_bad_values() {
    let mut config = ProfilerConfig::default();

    assert!(matches!(
      config.apply("NoSuchKey", &["1"]),
      Err(ProfilerError::UnknownProperty(_))
    ));
    assert!(matches!(
      config.apply("StackSize", &["lots"]),
      Err(ProfilerError::InvalidProperty { .. })
    ));
    assert!(matches!(
      config.apply("Mode", &["a", "b"]),
      Err(ProfilerError::InvalidProperty { .. })
    ));
  }

  #[test]
  fn load_str_skips_bad_lines() {
    let mut config = ProfilerConfig::default();
    let applied = config.load_str(
      "# comment\n\
       ProfileScope = com.acme, org.example\n\
       this line is malformed\n\
       Bogus = 1\n\
       Mode = jarm\n\
       OutputLimit.Methods = 5\n",
    );

    assert_eq!(applied, 3);
    assert_eq!(config.profile_scope, vec!["com.acme", "org.example"]);
    assert_eq!(config.mode, ProfilerMode::Jarm);
    assert_eq!(config.output_limit(OutputKind::Methods), 5);
  }

  #[test]
  fn mode_round_trips_through_index() {
    for mode in ProfilerMode::ALL {
      assert_eq!(ProfilerMode::from_index(mode.index()), mode);
      assert_eq!(mode.name().parse::<ProfilerMode>().unwrap(), mode);
    }
    assert_eq!(ProfilerMode::from_index(99), ProfilerMode::Profile);
  }
}
