use super::*;

/// Fewest epochs a history ring retains.
pub const MIN_HISTORY: usize = 10;

/// One GC epoch as seen by a single class.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct HistoryEntry {
  /// Bytes allocated during the epoch that just ended.
  pub allocated: u64,
  /// Bytes freed during the epoch that just ended.
  pub deallocated: u64,
  pub epoch: u64,
  /// Live bytes when the epoch was recorded.
  pub size: u64,
  pub timestamp: u64,
}

impl HistoryEntry {
  fn dump(&self) -> Tag {
    Tag::leaf("epoch")
      .uint("epoch", self.epoch)
      .uint("timestamp", self.timestamp)
      .uint("allocated", self.allocated)
      .uint("deallocated", self.deallocated)
      .uint("size", self.size)
  }
}

/// Bounded per-class window of epochs feeding the leak heuristic.
///
/// With leak detection on, every recorded epoch runs [`History::eval_min`],
/// which keeps only the trailing run of strictly growing sizes. A run that
/// nearly fills the ring raises an alert. This is a cheap trend check over
/// at most `capacity` entries, not a proof of a leak.
#[derive(Debug, Clone)]
pub struct History {
  alert: bool,
  leak_detection: bool,
  ring: Ring<HistoryEntry>,
}

impl History {
  #[must_use]
  pub fn capacity(&self) -> usize {
    self.ring.capacity()
  }

  pub fn clear(&mut self) {
    self.alert = false;
    self.ring.clear();
  }

  pub fn dump(&self, class_name: &str) -> Tag {
    let mut tag = Tag::node("history")
      .text("class", class_name)
      .text("alert", if self.alert { "yes" } else { "no" })
      .uint("epochs", self.ring.len() as u64)
      .uint("capacity", self.ring.capacity() as u64);

    for entry in self.ring.iter() {
      tag.push(entry.dump());
    }

    tag
  }

  /// Entries from oldest to newest.
  pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
    self.ring.iter()
  }

  /// Drop history that no longer ends in a growth streak and raise the
  /// alert once the streak reaches `capacity - 1` entries.
  ///
  /// Scanning back from the newest entry, the first older entry whose size
  /// is at least the newest size cuts the window: it and everything before
  /// it are discarded.
  pub fn eval_min(&mut self) -> bool {
    let Some(newest) = self.ring.newest().map(|entry| entry.size) else {
      return self.alert;
    };

    let cut = (1..self.ring.len()).find(|&back| {
      self
        .ring
        .get_from_newest(back)
        .is_some_and(|entry| entry.size >= newest)
    });

    if let Some(back) = cut {
      self.ring.retain_newest(back);
    }

    if self.ring.len() >= self.ring.capacity().saturating_sub(1) {
      self.alert = true;
    }

    self.alert
  }

  #[must_use]
  pub fn has_alert(&self) -> bool {
    self.alert
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.ring.is_empty()
  }

  #[must_use]
  pub fn latest(&self) -> Option<&HistoryEntry> {
    self.ring.newest()
  }

  #[must_use]
  pub fn leak_detection(&self) -> bool {
    self.leak_detection
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.ring.len()
  }

  /// History keeping at least [`MIN_HISTORY`] epochs.
  #[must_use]
  pub fn new(limit: usize, leak_detection: bool) -> Self {
    Self {
      alert: false,
      leak_detection,
      ring: Ring::new(limit.max(MIN_HISTORY)),
    }
  }

  /// Append an epoch and, with leak detection on, re-evaluate the trend.
  pub fn record(&mut self, entry: HistoryEntry) -> bool {
    self.ring.push(entry);

    if self.leak_detection {
      self.eval_min()
    } else {
      false
    }
  }

  /// Clear the alert, keeping only the newest entry as a baseline.
  pub fn reset_alert(&mut self) {
    self.alert = false;
    self.ring.retain_newest(1);
  }

  pub fn set_leak_detection(&mut self, enabled: bool) {
    self.leak_detection = enabled;
  }
}
