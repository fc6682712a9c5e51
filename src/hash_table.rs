use super::*;

/// Probe step. Odd, so it is co-prime to every power-of-two capacity and a
/// probe sequence visits each slot exactly once per cycle.
const PROBE_STRIDE: usize = 7;

/// Smallest capacity a table is ever sized to.
const MIN_CAPACITY: usize = 8;

/// Capability for values that release resources when a table is reset.
pub trait Disposable {
  /// Release whatever this value accounted for; `size` is the entry weight
  /// it was inserted with.
  fn dispose(&self, size: u32);
}

impl<T: Disposable + ?Sized> Disposable for Arc<T> {
  fn dispose(&self, size: u32) {
    T::dispose(self, size);
  }
}

/// A live table entry.
#[derive(Debug, Clone)]
pub struct Entry<V> {
  /// Grouping tag used by [`IdentityTable::delete_arena`]; `0` means none.
  pub arena: u64,
  pub key: u64,
  /// Opaque back-reference to whatever owns this entry.
  pub owner: u64,
  /// Entry weight, always at least 1.
  pub size: u32,
  pub value: V,
}

#[derive(Debug, Clone)]
enum Slot<V> {
  Empty,
  Occupied(Entry<V>),
  Tombstone,
}

impl<V> Slot<V> {
  fn entry(&self) -> Option<&Entry<V>> {
    match self {
      Self::Occupied(entry) => Some(entry),
      _ => None,
    }
  }

  fn is_empty(&self) -> bool {
    matches!(self, Self::Empty)
  }
}

/// Open-addressing table keyed by non-zero host identities.
///
/// Slots carry an explicit empty/tombstone/occupied tag. Probing starts at
/// `key mod capacity` and advances by a fixed stride. Inserts grow the table
/// once occupancy passes 3/4; lookups never resize. A probe cycle that finds
/// no free slot forces a grow-and-retry, and a second failure marks the
/// table corrupted: it then refuses inserts and resizes, and reports the
/// condition only once.
#[derive(Debug)]
pub struct IdentityTable<V> {
  corrupted: bool,
  min_capacity: usize,
  name: &'static str,
  occupied: usize,
  slots: Vec<Slot<V>>,
  tombstones: usize,
  volume: u64,
}

impl<V> IdentityTable<V> {
  /// Count live slots and sum their weights by walking the whole table.
  ///
  /// Used to check `len()` and `volume()` against the slot contents.
  #[must_use]
  pub fn audit(&self) -> (usize, u64) {
    self
      .slots
      .iter()
      .filter_map(Slot::entry)
      .fold((0, 0), |(count, volume), entry| {
        (count + 1, volume + u64::from(entry.size))
      })
  }

  #[must_use]
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// Halve the capacity while fewer than 1/32 of the slots are live,
  /// never going below the configured minimum.
  pub fn check_size(&mut self) {
    let capacity = self.capacity();
    let mut target = capacity;

    while target / 2 >= self.min_capacity && self.occupied * 32 < target {
      target /= 2;
    }

    if target < capacity {
      self.rehash(target);
    }
  }

  /// Drop every entry without running any teardown.
  pub fn clear(&mut self) {
    for slot in &mut self.slots {
      *slot = Slot::Empty;
    }

    self.occupied = 0;
    self.tombstones = 0;
    self.volume = 0;
  }

  #[must_use]
  pub fn contains(&self, key: u64) -> bool {
    self.locate(key).is_some()
  }

  /// Remove every entry tagged with `arena` in one sweep and return them.
  pub fn delete_arena(&mut self, arena: u64) -> Vec<Entry<V>> {
    let mut removed = Vec::new();

    for slot in &mut self.slots {
      if slot.entry().is_some_and(|entry| entry.arena == arena) {
        if let Slot::Occupied(entry) = mem::replace(slot, Slot::Tombstone) {
          self.occupied -= 1;
          self.tombstones += 1;
          self.volume -= u64::from(entry.size);
          removed.push(entry);
        }
      }
    }

    if !removed.is_empty() && self.tombstones * 4 >= self.capacity() {
      let capacity = self.capacity();
      self.rehash(capacity);
    }

    removed
  }

  #[must_use]
  pub fn entry(&self, key: u64) -> Option<&Entry<V>> {
    self.locate(key).and_then(|index| self.slots[index].entry())
  }

  #[must_use]
  pub fn find(&self, key: u64) -> Option<&V> {
    self.entry(key).map(|entry| &entry.value)
  }

  #[must_use]
  pub fn find_mut(&mut self, key: u64) -> Option<&mut V> {
    let index = self.locate(key)?;

    match &mut self.slots[index] {
      Slot::Occupied(entry) => Some(&mut entry.value),
      _ => None,
    }
  }

  /// Insert or replace the entry for `key`.
  ///
  /// # Errors
  ///
  /// Returns [`TableError::ReservedKey`] for key `0` and
  /// [`TableError::Corrupted`] once the table has given up on resizing.
  pub fn insert(
    &mut self,
    key: u64,
    value: V,
    arena: u64,
    owner: u64,
    size: u32,
  ) -> Result<&mut Entry<V>, TableError> {
    if key == 0 {
      return Err(TableError::ReservedKey);
    }

    let size = size.max(1);

    if let Some(index) = self.locate(key) {
      return match &mut self.slots[index] {
        Slot::Occupied(entry) => {
          self.volume = self.volume - u64::from(entry.size) + u64::from(size);
          *entry = Entry {
            arena,
            key,
            owner,
            size,
            value,
          };
          Ok(entry)
        }
        _ => Err(TableError::Corrupted),
      };
    }

    if self.corrupted {
      return Err(TableError::Corrupted);
    }

    self.reserve_one();

    let index = match self.free_slot(key) {
      Some(index) => index,
      None => {
        warn!(
          table = self.name,
          capacity = self.capacity(),
          "probe cycle exhausted, growing table"
        );
        let doubled = self.capacity().saturating_mul(2);

        if !self.rehash(doubled) {
          return Err(TableError::Corrupted);
        }

        match self.free_slot(key) {
          Some(index) => index,
          None => {
            self.mark_corrupted("probe cycle exhausted after grow");
            return Err(TableError::Corrupted);
          }
        }
      }
    };

    if matches!(self.slots[index], Slot::Tombstone) {
      self.tombstones -= 1;
    }

    self.occupied += 1;
    self.volume += u64::from(size);
    self.slots[index] = Slot::Occupied(Entry {
      arena,
      key,
      owner,
      size,
      value,
    });

    match &mut self.slots[index] {
      Slot::Occupied(entry) => Ok(entry),
      _ => Err(TableError::Corrupted),
    }
  }

  #[must_use]
  pub fn is_corrupted(&self) -> bool {
    self.corrupted
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.occupied == 0
  }

  /// Live entries in slot order.
  pub fn iter(&self) -> impl Iterator<Item = &Entry<V>> {
    self.slots.iter().filter_map(Slot::entry)
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.occupied
  }

  #[must_use]
  pub fn new(name: &'static str) -> Self {
    Self::with_capacity(name, MIN_CAPACITY)
  }

  /// Reinsert every live entry into a fresh table of at least
  /// `new_capacity` slots. Returns `false` when the table is corrupted or
  /// the new slot array cannot be sized or allocated.
  pub fn rehash(&mut self, new_capacity: usize) -> bool {
    if self.corrupted {
      return false;
    }

    let Some(capacity) = new_capacity
      .max(self.occupied)
      .max(self.min_capacity)
      .checked_next_power_of_two()
    else {
      self.mark_corrupted("rehash capacity overflow");
      return false;
    };

    let mut slots = Vec::new();

    if slots.try_reserve_exact(capacity).is_err() {
      self.mark_corrupted("allocation failure during rehash");
      return false;
    }

    slots.resize_with(capacity, || Slot::Empty);

    let previous = mem::replace(&mut self.slots, slots);
    self.tombstones = 0;

    for slot in previous {
      let Slot::Occupied(entry) = slot else {
        continue;
      };

      match self.free_slot(entry.key) {
        Some(index) => self.slots[index] = Slot::Occupied(entry),
        None => {
          self.occupied -= 1;
          self.volume -= u64::from(entry.size);
          self.mark_corrupted("entry lost during rehash");
        }
      }
    }

    debug!(table = self.name, capacity, entries = self.occupied, "rehashed");

    !self.corrupted
  }

  /// Remove `key`, compacting trailing tombstones when the chain ends right
  /// after the removed slot.
  pub fn remove(&mut self, key: u64) -> Option<Entry<V>> {
    if key == 0 {
      return None;
    }

    let mut index = self.home(key);
    let mut probes = 0;

    loop {
      if probes == self.capacity() {
        return None;
      }

      match &self.slots[index] {
        Slot::Empty => return None,
        Slot::Occupied(entry) if entry.key == key => break,
        _ => {}
      }

      index = self.next(index);
      probes += 1;
    }

    let Slot::Occupied(entry) =
      mem::replace(&mut self.slots[index], Slot::Tombstone)
    else {
      return None;
    };

    self.occupied -= 1;
    self.tombstones += 1;
    self.volume -= u64::from(entry.size);

    if self.slots[self.next(index)].is_empty() {
      let mut cursor = index;

      for _ in 0..=probes {
        if !matches!(self.slots[cursor], Slot::Tombstone) {
          break;
        }

        self.slots[cursor] = Slot::Empty;
        self.tombstones -= 1;
        cursor = self.prev(cursor);
      }
    }

    Some(entry)
  }

  #[must_use]
  pub fn tombstones(&self) -> usize {
    self.tombstones
  }

  /// Sum of entry weights.
  #[must_use]
  pub fn volume(&self) -> u64 {
    self.volume
  }

  #[must_use]
  pub fn with_capacity(name: &'static str, min_capacity: usize) -> Self {
    let min_capacity = min_capacity.max(MIN_CAPACITY).next_power_of_two();
    let mut slots = Vec::with_capacity(min_capacity);
    slots.resize_with(min_capacity, || Slot::Empty);

    Self {
      corrupted: false,
      min_capacity,
      name,
      occupied: 0,
      slots,
      tombstones: 0,
      volume: 0,
    }
  }

  fn free_slot(&self, key: u64) -> Option<usize> {
    let mut index = self.home(key);
    let mut first_tombstone = None;

    for _ in 0..self.capacity() {
      match &self.slots[index] {
        Slot::Empty => return Some(first_tombstone.unwrap_or(index)),
        Slot::Tombstone if first_tombstone.is_none() => {
          first_tombstone = Some(index);
        }
        _ => {}
      }

      index = self.next(index);
    }

    first_tombstone
  }

  fn home(&self, key: u64) -> usize {
    // Capacity is a power of two, so the remainder fits in usize.
    (key % self.capacity() as u64) as usize
  }

  fn locate(&self, key: u64) -> Option<usize> {
    if key == 0 {
      return None;
    }

    let mut index = self.home(key);

    for _ in 0..self.capacity() {
      match &self.slots[index] {
        Slot::Empty => return None,
        Slot::Occupied(entry) if entry.key == key => return Some(index),
        _ => {}
      }

      index = self.next(index);
    }

    None
  }

  fn mark_corrupted(&mut self, reason: &'static str) {
    if !self.corrupted {
      self.corrupted = true;
      error!(table = self.name, reason, "hash table corrupted");
    }
  }

  fn next(&self, index: usize) -> usize {
    (index + PROBE_STRIDE) & (self.capacity() - 1)
  }

  fn prev(&self, index: usize) -> usize {
    index.wrapping_sub(PROBE_STRIDE) & (self.capacity() - 1)
  }

  fn reserve_one(&mut self) {
    let capacity = self.capacity();

    if (self.occupied + 1) * 4 > capacity * 3 {
      self.rehash(capacity * 2);
    } else if (self.occupied + self.tombstones + 1) * 4 > capacity * 3 {
      self.rehash(capacity);
    }
  }
}

impl<V: Disposable> IdentityTable<V> {
  /// Drop every entry, calling [`Disposable::dispose`] on each live value.
  pub fn reset(&mut self) {
    for slot in &mut self.slots {
      if let Slot::Occupied(entry) = mem::replace(slot, Slot::Empty) {
        entry.value.dispose(entry.size);
      }
    }

    self.occupied = 0;
    self.tombstones = 0;
    self.volume = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Default)]
  struct Counted {
    disposed: Cell<u32>,
  }

  impl Disposable for Counted {
    fn dispose(&self, size: u32) {
      self.disposed.set(self.disposed.get() + size);
    }
  }

  #[test]
  fn rejects_reserved_key() {
    let mut table = IdentityTable::new("test");
    assert_eq!(
      table.insert(0, 1, 0, 0, 1).map(|_| ()),
      Err(TableError::ReservedKey)
    );
    assert!(table.is_empty());
  }

  #[test]
  fn insert_replaces_existing_key() {
    let mut table = IdentityTable::new("test");
    table.insert(5, "a", 0, 0, 2).map(|_| ()).unwrap();
    table.insert(5, "b", 0, 0, 3).map(|_| ()).unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(table.volume(), 3);
    assert_eq!(table.find(5), Some(&"b"));
  }

  #[test]
  fn grows_past_three_quarters() {
    let mut table = IdentityTable::new("test");
    assert_eq!(table.capacity(), 8);

    for key in 1..=7u64 {
      table.insert(key, key, 0, 0, 1).map(|_| ()).unwrap();
    }

    assert!(table.capacity() >= 16);
    assert_eq!(table.len(), 7);
    for key in 1..=7u64 {
      assert_eq!(table.find(key), Some(&key));
    }
  }

  #[test]
  fn oversized_rehash_marks_the_table_corrupted() {
    let mut table = IdentityTable::new("test");
    table.insert(3, 3, 0, 0, 1).map(|_| ()).unwrap();

    assert!(!table.rehash(usize::MAX));
    assert!(table.is_corrupted());
    assert_eq!(table.find(3), Some(&3));
    assert_eq!(
      table.insert(4, 4, 0, 0, 1).map(|_| ()),
      Err(TableError::Corrupted)
    );
    assert!(!table.rehash(16));

    let mut huge = IdentityTable::<u64>::new("test");
    assert!(!huge.rehash(1 << 62));
    assert!(huge.is_corrupted());
  }

  #[test]
  fn colliding_keys_survive_removal_in_the_middle() {
    let mut table = IdentityTable::with_capacity("test", 64);
    // All three share a home slot.
    for key in [64u64, 128, 192] {
      table.insert(key, key, 0, 0, 1).map(|_| ()).unwrap();
    }

    assert!(table.remove(128).is_some());
    assert_eq!(table.find(192), Some(&192));
    assert_eq!(table.find(64), Some(&64));
    assert!(table.find(128).is_none());
  }

  #[test]
  fn removal_at_chain_end_clears_tombstones() {
    let mut table = IdentityTable::with_capacity("test", 64);
    for key in [64u64, 128, 192] {
      table.insert(key, key, 0, 0, 1).map(|_| ()).unwrap();
    }

    table.remove(128);
    assert_eq!(table.tombstones(), 1);

    // 192 ends the chain, so both it and the tombstone before it clear.
    table.remove(192);
    assert_eq!(table.tombstones(), 0);
    assert_eq!(table.find(64), Some(&64));
  }

  #[test]
  fn delete_arena_removes_only_tagged_entries() {
    let mut table = IdentityTable::new("test");
    for key in 1..=20u64 {
      let arena = if key % 2 == 0 { 100 } else { 200 };
      table.insert(key, key, arena, 0, 1).map(|_| ()).unwrap();
    }

    let removed = table.delete_arena(100);
    assert_eq!(removed.len(), 10);
    assert!(removed.iter().all(|entry| entry.arena == 100));
    assert_eq!(table.len(), 10);
    assert_eq!(table.audit(), (10, 10));
    assert!(table.iter().all(|entry| entry.arena == 200));
  }

  #[test]
  fn rehash_preserves_entries() {
    let mut table = IdentityTable::new("test");
    for key in (8..400u64).step_by(8) {
      table.insert(key, key * 2, 0, key, 1).map(|_| ()).unwrap();
    }

    let before = table.len();
    assert!(table.rehash(1024));
    assert_eq!(table.capacity(), 1024);
    assert_eq!(table.len(), before);

    for key in (8..400u64).step_by(8) {
      let entry = table.entry(key).expect("entry survives rehash");
      assert_eq!(entry.value, key * 2);
      assert_eq!(entry.owner, key);
    }
  }

  #[test]
  fn check_size_shrinks_sparse_tables() {
    let mut table = IdentityTable::with_capacity("test", 16);
    for key in 1..=600u64 {
      table.insert(key, (), 0, 0, 1).map(|_| ()).unwrap();
    }
    for key in 3..=600u64 {
      table.remove(key);
    }

    let before = table.capacity();
    table.check_size();

    assert!(table.capacity() < before);
    assert!(table.capacity() >= 16);
    assert!(table.contains(1));
    assert!(table.contains(2));
  }

  #[test]
  fn reset_disposes_each_value() {
    let mut table = IdentityTable::new("test");
    for key in 1..=3u64 {
      table
        .insert(key, Arc::new(Counted::default()), 0, 0, 2)
        .map(|_| ())
        .unwrap();
    }

    let values: Vec<_> =
      table.iter().map(|entry| Arc::clone(&entry.value)).collect();
    table.reset();

    assert!(table.is_empty());
    assert_eq!(table.volume(), 0);
    assert!(values.iter().all(|value| value.disposed.get() == 2));
  }

  #[test]
  fn weighted_entries_accumulate_volume() {
    let mut table = IdentityTable::new("test");
    table.insert(1, (), 0, 0, 5).map(|_| ()).unwrap();
    table.insert(2, (), 0, 0, 0).map(|_| ()).unwrap();

    assert_eq!(table.volume(), 6);
    table.remove(1);
    assert_eq!(table.volume(), 1);
  }
}
