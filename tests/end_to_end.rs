use jprof::{
  ClassDecl, ClassId, EventStatus, FieldDecl, FieldId, History, HistoryEntry,
  MethodDecl, MethodId, Profiler, ProfilerConfig, ProfilerMode, Tag, ThreadId,
  Timestamp,
};

const MAIN: ThreadId = ThreadId(1);
const FOO: MethodId = MethodId(0x10);
const BAR: MethodId = MethodId(0x11);
const CLS: ClassId = ClassId(0x100);

fn cls() -> ClassDecl {
  ClassDecl::new(CLS, "Lpkg/Cls;")
    .with_method(MethodDecl::new(FOO, "foo", "()V"))
    .with_method(MethodDecl::new(BAR, "bar", "(I)V"))
    .with_field(FieldDecl::new(FieldId(0x20), "cache", "[B"))
}

fn attached(config: ProfilerConfig) -> Profiler {
  let profiler = Profiler::with_config(config);
  profiler.on_vm_init();
  profiler.on_thread_start(MAIN, "main");
  profiler.on_class_load(&cls());
  profiler
}

fn call(
  profiler: &Profiler,
  method: MethodId,
  enter: (u64, u64),
  exit: (u64, u64),
) {
  let enter = Timestamp::new(enter.0, enter.1);
  let exit = Timestamp::new(exit.0, exit.1);

  assert!(profiler.on_method_enter(MAIN, method, enter, None).is_recorded());
  assert!(profiler.on_method_exit(MAIN, method, exit).is_recorded());
}

fn totals(profiler: &Profiler, method: MethodId) -> (u64, u64, u64) {
  let record = profiler.registry().method(method).unwrap();
  (record.cpu_time(), record.elapsed(), record.calls())
}

#[test]
fn method_totals_accumulate_across_calls() {
  let profiler = attached(ProfilerConfig::default());

  call(&profiler, FOO, (1_000, 0), (1_500, 1_600));
  assert_eq!(totals(&profiler, FOO), (500, 1_600, 1));

  call(&profiler, FOO, (2_000, 2_000), (2_200, 2_250));
  assert_eq!(totals(&profiler, FOO), (700, 1_850, 2));

  let report = profiler.execute("methods cpu 1").unwrap();
  assert_eq!(report.children().len(), 1);
  assert_eq!(report.children()[0].integer("cputime"), Some(700));
}

#[test]
fn other_methods_do_not_disturb_totals() {
  let profiler = attached(ProfilerConfig::default());
  let mut expected = (0, 0, 0);

  for n in 0..50u64 {
    let start = n * 1_000;

    // bar runs nested inside foo; foo's deltas include bar's time.
    profiler.on_method_enter(MAIN, FOO, Timestamp::new(start, start), None);
    call(&profiler, BAR, (start + 10, start + 10), (start + 30, start + 40));
    profiler.on_method_exit(
      MAIN,
      FOO,
      Timestamp::new(start + 40 + n, start + 50 + 2 * n),
    );

    expected.0 += 40 + n;
    expected.1 += 50 + 2 * n;
    expected.2 += 1;
  }

  assert_eq!(totals(&profiler, FOO), expected);
  assert_eq!(totals(&profiler, BAR), (50 * 20, 50 * 30, 50));
}

#[test]
fn class_eviction_waits_for_every_gate() {
  let profiler = attached(ProfilerConfig::default());
  let base = ClassId(0x200);
  let derived = ClassId(0x201);

  profiler.on_class_load(&ClassDecl::new(base, "pkg.Base"));
  profiler
    .on_class_load(&ClassDecl::new(derived, "pkg.Derived").with_super(base));
  profiler.on_object_alloc(MAIN, base, 32);

  // Pending, but 32 live bytes and one subclass reference remain.
  assert!(profiler.on_class_unload(base).is_recorded());
  let record = profiler.registry().class(base).unwrap();
  assert!(record.is_delete_pending());
  assert!(!record.delete_class());

  // Bytes gone, the subclass still holds a reference.
  profiler.on_object_free(base, 32);
  assert_eq!(record.live_size(), 0);
  assert_eq!(record.ref_count(), 1);
  assert!(profiler.registry().class(base).is_some());

  // Dropping the last reference clears the final gate.
  profiler.on_class_unload(derived);
  assert!(profiler.registry().class(derived).is_none());
  assert!(profiler.registry().class(base).is_none());
  assert_eq!(profiler.on_class_unload(base), EventStatus::Unknown);
}

#[test]
fn steady_growth_across_gc_epochs_raises_an_alert() {
  let profiler = attached(ProfilerConfig::default());

  for gc in 1..=10u64 {
    assert_eq!(
      profiler.execute("alerts").unwrap().integer("count"),
      Some(0)
    );
    profiler.on_object_alloc(MAIN, CLS, 100);
    profiler.on_gc_start();
    profiler.on_gc_finish(gc * 1_000);
  }

  let alerts = profiler.execute("alerts").unwrap();
  assert_eq!(alerts.integer("count"), Some(1));

  let history = profiler.execute("history pkg.Cls").unwrap();
  assert_eq!(history.value("alert"), Some("yes"));
  assert_eq!(history.children().len(), 9);

  profiler.execute("resetalert Cls").unwrap();
  let alerts = profiler.execute("alerts").unwrap();
  assert_eq!(alerts.integer("count"), Some(0));
  let history = profiler.execute("history Cls").unwrap();
  assert_eq!(history.children().len(), 1);
}

#[test]
fn freeing_memory_breaks_the_growth_streak() {
  let profiler = attached(ProfilerConfig::default());

  for gc in 1..=12u64 {
    profiler.on_object_alloc(MAIN, CLS, 100);
    if gc % 4 == 0 {
      profiler.on_object_free(CLS, 250);
    }
    profiler.on_gc_start();
    profiler.on_gc_finish(gc * 1_000);
  }

  let alerts = profiler.execute("alerts").unwrap();
  assert_eq!(alerts.integer("count"), Some(0));
}

#[test]
fn history_alerts_after_growth_and_truncates_on_a_drop() {
  let entry = |epoch: u64, size: u64| HistoryEntry {
    epoch,
    size,
    timestamp: epoch,
    ..HistoryEntry::default()
  };

  for capacity in [10, 16, 32] {
    let mut history = History::new(capacity, true);

    for n in 1..capacity as u64 - 1 {
      assert!(!history.record(entry(n, n * 10)));
    }

    assert!(history.record(entry(capacity as u64, capacity as u64 * 10)));
    assert_eq!(history.len(), capacity - 1);
  }

  let mut history = History::new(10, true);
  for (n, size) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
    history.record(entry(n, size));
  }

  let sizes = |history: &History| -> Vec<u64> {
    history.entries().map(|entry| entry.size).collect()
  };

  // The drop cuts everything at or above the new size.
  history.record(entry(6, 25));
  assert_eq!(sizes(&history), vec![25]);

  history.record(entry(7, 35));
  assert_eq!(sizes(&history), vec![25, 35]);
  assert!(!history.has_alert());
}

#[test]
fn trace_trigger_streams_a_bracket_through_the_console() {
  let mut config = ProfilerConfig::default()
    .with_mode(ProfilerMode::Trigger)
    .with_trace_trigger("pkg.Cls.foo");
  config.live_trace = true;
  let profiler = attached(config);

  profiler.on_method_enter(MAIN, FOO, Timestamp::new(0, 0), None);
  call(&profiler, BAR, (1, 1), (4, 5));
  profiler.on_object_alloc(MAIN, CLS, 16);
  profiler.on_method_exit(MAIN, FOO, Timestamp::new(10, 12));

  // Outside the trigger, bar is not counted in trigger mode.
  profiler.on_method_enter(MAIN, BAR, Timestamp::new(20, 20), None);
  profiler.on_method_exit(MAIN, BAR, Timestamp::new(21, 21));

  assert!(profiler.trace_flush_pending());
  let trace = profiler.execute("trace").unwrap();
  let names: Vec<&str> = trace.children().iter().map(Tag::name).collect();
  assert_eq!(names, vec!["enter", "alloc", "exit"]);
  assert!(!profiler.trace_flush_pending());

  assert_eq!(totals(&profiler, FOO), (10, 12, 1));
  assert_eq!(totals(&profiler, BAR), (3, 4, 1));
}

#[test]
fn console_drives_configuration_and_reports() {
  let profiler = attached(ProfilerConfig::default());

  call(&profiler, FOO, (0, 0), (5, 8));
  profiler.on_field_access(MAIN, CLS, FieldId(0x20));

  let fields = profiler.execute("fields pkg.Cls").unwrap();
  assert_eq!(fields.children()[0].value("name"), Some("cache"));

  profiler.execute("set ProfileExclude pkg").unwrap();
  profiler.on_method_enter(MAIN, FOO, Timestamp::new(10, 10), None);
  profiler.on_method_exit(MAIN, FOO, Timestamp::new(20, 20));
  assert_eq!(totals(&profiler, FOO), (5, 8, 1));

  profiler.execute("reset").unwrap();
  assert_eq!(totals(&profiler, FOO), (0, 0, 0));

  profiler.execute("disable").unwrap();
  assert_eq!(
    profiler.on_method_enter(MAIN, FOO, Timestamp::default(), None),
    EventStatus::Disabled
  );

  let threads = profiler.execute("threads").unwrap();
  assert_eq!(threads.integer("count"), Some(1));
  assert!(profiler.execute("frobnicate").is_err());
}
