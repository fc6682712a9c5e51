use {
  jprof::{
    ClassDecl, ClassId, FieldDecl, FieldId, MethodDecl, MethodId, Profiler,
    ProfilerConfig, ThreadId, Timestamp,
  },
  std::io::{self, Write},
};

fn main() -> jprof::Result<()> {
  let mut config = ProfilerConfig::default();
  config.load_str(
    "ProfileScope = pkg\n\
     TraceTrigger = pkg.Cls.foo\n\
     LiveTrace = true\n",
  );

  let profiler = Profiler::builder().with_config(config).finish();
  profiler.on_vm_init();

  let main = ThreadId(1);
  profiler.on_thread_start(main, "main");
  profiler.on_class_load(
    &ClassDecl::new(ClassId(0x100), "Lpkg/Cls;")
      .with_method(MethodDecl::new(MethodId(0x10), "foo", "()V"))
      .with_method(MethodDecl::new(MethodId(0x11), "bar", "(I)V"))
      .with_field(FieldDecl::new(FieldId(0x20), "cache", "[B")),
  );

  let mut cpu = 1_000;
  let mut wall = 0;

  for epoch in 1..=3 {
    let now = Timestamp::new(cpu, wall);
    profiler.on_method_enter(main, MethodId(0x10), now, None);

    for _ in 0..4 {
      let now = Timestamp::new(cpu, wall);
      profiler.on_method_enter(main, MethodId(0x11), now, None);
      profiler.on_object_alloc(main, ClassId(0x100), 64);
      profiler.on_field_access(main, ClassId(0x100), FieldId(0x20));
      cpu += 40;
      wall += 55;
      let now = Timestamp::new(cpu, wall);
      profiler.on_method_exit(main, MethodId(0x11), now);
    }

    cpu += 100;
    wall += 160;
    let now = Timestamp::new(cpu, wall);
    profiler.on_method_exit(main, MethodId(0x10), now);

    profiler.on_gc_start();
    profiler.on_gc_finish(wall + epoch);
  }

  let mut stdout = io::stdout().lock();

  for command in ["methods cpu", "classes", "threads", "fields Cls", "trace"] {
    let report = profiler.execute(command)?;
    writeln!(stdout, "=== {command} ===")?;
    report.export_json(&mut stdout)?;
    writeln!(stdout)?;
  }

  profiler.on_thread_end(main);
  profiler.on_vm_death();

  Ok(())
}
