use {
  jprof::{
    ClassDecl, ClassId, MethodDecl, MethodId, Profiler, ThreadId, Timestamp,
  },
  rand::{Rng, SeedableRng, rngs::StdRng},
  std::thread,
};

const THREADS: u64 = 8;
const CALLS: usize = 500;

struct Workload {
  deltas: Vec<(u64, u64)>,
  method: MethodId,
  thread: ThreadId,
}

impl Workload {
  fn expected(&self) -> (u64, u64, u64) {
    let cpu = self.deltas.iter().map(|(cpu, _)| cpu).sum();
    let wall = self.deltas.iter().map(|(_, wall)| wall).sum();
    (cpu, wall, self.deltas.len() as u64)
  }

  /// Replay the workload, yielding at random points so that threads
  /// interleave differently on every run.
  fn run(&self, profiler: &Profiler, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut clock = Timestamp::default();

    for &(cpu, wall) in &self.deltas {
      profiler.on_method_enter(self.thread, self.method, clock, None);

      if rng.gen_bool(0.3) {
        thread::yield_now();
      }

      clock = Timestamp::new(clock.cpu_us + cpu, clock.wall_us + wall);
      profiler.on_method_exit(self.thread, self.method, clock);
    }
  }
}

fn workloads(seed: u64) -> Vec<Workload> {
  let mut rng = StdRng::seed_from_u64(seed);

  (1..=THREADS)
    .map(|n| Workload {
      deltas: (0..CALLS)
        .map(|_| {
          let cpu = rng.gen_range(0..2_000);
          (cpu, cpu + rng.gen_range(0..500))
        })
        .collect(),
      method: MethodId(n),
      thread: ThreadId(100 + n),
    })
    .collect()
}

fn profiler() -> Profiler {
  let class = (1..=THREADS).fold(
    ClassDecl::new(ClassId(1), "pkg.Worker"),
    |class, n| {
      class.with_method(MethodDecl::new(MethodId(n), format!("m{n}"), "()V"))
    },
  );

  let profiler = Profiler::new();
  profiler.on_vm_init();
  profiler.on_class_load(&class);
  profiler
}

fn totals(profiler: &Profiler, method: MethodId) -> (u64, u64, u64) {
  let record = profiler.registry().method(method).unwrap();
  (record.cpu_time(), record.elapsed(), record.calls())
}

#[test]
fn concurrent_methods_match_sequential_totals() {
  for seed in [7, 42, 1_337] {
    let workloads = workloads(seed);

    let sequential = profiler();
    for (index, workload) in workloads.iter().enumerate() {
      workload.run(&sequential, seed + index as u64);
    }

    let concurrent = profiler();
    thread::scope(|scope| {
      for (index, workload) in workloads.iter().enumerate() {
        let profiler = concurrent.clone();
        scope.spawn(move || workload.run(&profiler, seed + index as u64));
      }
    });

    for workload in &workloads {
      let expected = workload.expected();
      assert_eq!(totals(&sequential, workload.method), expected);
      assert_eq!(totals(&concurrent, workload.method), expected);
    }

    assert_eq!(concurrent.threads().count(), THREADS as usize);
  }
}

#[test]
fn shared_method_counts_every_thread() {
  let profiler = profiler();
  let shared = MethodId(1);

  thread::scope(|scope| {
    for n in 0..THREADS {
      let profiler = profiler.clone();
      scope.spawn(move || {
        let thread = ThreadId(200 + n);
        for call in 0..CALLS as u64 {
          profiler.on_method_enter(
            thread,
            shared,
            Timestamp::new(call * 10, call * 10),
            None,
          );
          profiler.on_method_exit(
            thread,
            shared,
            Timestamp::new(call * 10 + 3, call * 10 + 5),
          );
        }
      });
    }
  });

  let calls = THREADS * CALLS as u64;
  assert_eq!(totals(&profiler, shared), (calls * 3, calls * 5, calls));
}
