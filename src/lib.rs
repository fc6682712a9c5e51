//! Event aggregation core of an in-process JVM profiler agent.
//!
//! The host attachment layer forwards runtime callbacks (method entry and
//! exit, allocation, class load, monitor contention) to a [`Profiler`],
//! which keeps per-thread call stacks and identity-keyed method, class and
//! field statistics. Reports come out as a [`Tag`] tree for an external
//! formatter to render.

mod class;
mod command;
mod config;
mod containers;
mod context;
mod error;
mod field;
mod hash_table;
mod history;
mod host;
mod ids;
mod method;
mod profiler;
mod registry;
mod report;
mod thread;
mod trace_buffer;

use {
  bitflags::bitflags,
  crossbeam_queue::ArrayQueue,
  dashmap::DashMap,
  nohash_hasher::BuildNoHashHasher,
  serde::{Serialize, Serializer, ser::SerializeStruct},
  std::{
    borrow::Cow,
    cell::Cell,
    cmp,
    collections::VecDeque,
    convert::Infallible,
    fmt::{self, Display, Formatter},
    io::{self, Write},
    mem,
    str::FromStr,
    sync::{
      Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard,
      RwLockWriteGuard,
      atomic::{
        AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering,
      },
    },
  },
  thiserror::Error,
  tracing::{debug, error, info, warn},
};

pub use {
  class::{ClassColumn, ClassRecord, GcEpoch},
  command::Command,
  config::{
    MAX_STACK_SIZE, MIN_STACK_SIZE, OutputKind, OutputLimits, ProfilerConfig,
    ProfilerMode, Properties, TimerKind, pattern_matches,
  },
  containers::{FrameHandle, FrameStack, Ring},
  context::{Context, Segment, StackView},
  error::{ProfilerError, Result, TableError},
  field::{
    ARRAY_HEADER_BYTES, ArrayType, ElementType, FieldRecord, REFERENCE_BYTES,
  },
  hash_table::{Disposable, Entry, IdentityTable},
  history::{History, HistoryEntry, MIN_HISTORY},
  host::{
    ClassDecl, DetachedHost, FieldDecl, HostRuntime, LocalVariable,
    MethodDecl, normalize_class_name,
  },
  ids::{ClassId, FieldId, MethodId, ThreadId, Timestamp},
  method::{MethodColumn, MethodRecord},
  profiler::{EventStatus, Profiler, ProfilerBuilder},
  registry::Registry,
  report::{AttrFlags, Attribute, Tag, TagKind},
  thread::{
    AllocationSite, ExitedFrame, Frame, ThreadRecord, ThreadRegistry,
    ThreadStacks, ThreadState, TriggerFrame,
  },
  trace_buffer::{DrainAction, TraceBuffer},
};

/// Lock `mutex`, recovering the data if a panicking holder poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
  lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
  lock.write().unwrap_or_else(PoisonError::into_inner)
}
