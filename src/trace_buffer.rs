use super::*;

/// What the writer of a trace tag should do next.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DrainAction {
  /// Enough tags are waiting that the console should drain them.
  FlushPending,
  Noop,
}

/// Live trigger events waiting for the console, written from any thread
/// without locks.
///
/// Tags past `capacity` are counted instead of kept. A drain takes at most
/// its output limit and leaves the rest for the next one.
#[derive(Debug)]
pub struct TraceBuffer {
  dropped: AtomicU64,
  flush_threshold: usize,
  queue: ArrayQueue<Tag>,
}

impl TraceBuffer {
  #[must_use]
  pub fn capacity(&self) -> usize {
    self.queue.capacity()
  }

  /// Oldest tags first, up to `limit`, with the number of tags lost to a
  /// full buffer since the last drain.
  pub fn drain(&self, limit: usize) -> (Vec<Tag>, u64) {
    let mut tags = Vec::with_capacity(limit.min(self.queue.len()));

    while tags.len() < limit {
      let Some(tag) = self.queue.pop() else {
        break;
      };
      tags.push(tag);
    }

    (tags, self.dropped.swap(0, Ordering::AcqRel))
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.queue.is_empty() && self.dropped.load(Ordering::Relaxed) == 0
  }

  /// Whether enough tags wait to ask for another drain.
  #[must_use]
  pub fn is_flush_pending(&self) -> bool {
    self.queue.len() >= self.flush_threshold
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.queue.len()
  }

  /// Room for `capacity` tags; a flush is requested at three quarters.
  #[must_use]
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);

    Self {
      dropped: AtomicU64::new(0),
      flush_threshold: capacity.saturating_sub(capacity / 4).max(1),
      queue: ArrayQueue::new(capacity),
    }
  }

  #[must_use]
  pub fn record(&self, tag: Tag) -> DrainAction {
    if self.queue.push(tag).is_err() {
      self.dropped.fetch_add(1, Ordering::Relaxed);
      return DrainAction::FlushPending;
    }

    if self.is_flush_pending() {
      DrainAction::FlushPending
    } else {
      DrainAction::Noop
    }
  }
}
