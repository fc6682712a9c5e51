use super::*;

/// One garbage-collection cycle: the time axis of class histories.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct GcEpoch {
  pub number: u64,
  pub timestamp: u64,
}

/// Sortable statistic of a [`ClassRecord`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ClassColumn {
  Size,
  Instances,
  NewInstances,
  HeapCount,
  HeapSize,
  MaxSize,
}

impl ClassColumn {
  pub const ALL: [Self; 6] = [
    Self::Size,
    Self::Instances,
    Self::NewInstances,
    Self::HeapCount,
    Self::HeapSize,
    Self::MaxSize,
  ];

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
      Self::HeapCount => "heapcount",
      Self::HeapSize => "heapsize",
      Self::Instances => "instances",
      Self::MaxSize => "maxsize",
      Self::NewInstances => "newinstances",
      Self::Size => "size",
    }
  }
}

impl FromStr for ClassColumn {
  type Err = ProfilerError;

  fn from_str(text: &str) -> Result<Self> {
    Self::from_prefix(text)
      .ok_or_else(|| ProfilerError::UnknownColumn(text.into()))
  }
}

/// Mutable per-class accounting, guarded by the record's mutex.
#[derive(Debug)]
struct ClassStats {
  allocated_since: u64,
  dealloc_warned: bool,
  deallocated_since: u64,
  epoch: Option<GcEpoch>,
  heap_count: u64,
  heap_size: u64,
  history: History,
  instances: u64,
  max_size: u64,
  new_instances: u64,
  size: u64,
}

impl ClassStats {
  fn new(history_limit: usize, leak_detection: bool) -> Self {
    Self {
      allocated_since: 0,
      dealloc_warned: false,
      deallocated_since: 0,
      epoch: None,
      heap_count: 0,
      heap_size: 0,
      history: History::new(history_limit, leak_detection),
      instances: 0,
      max_size: 0,
      new_instances: 0,
      size: 0,
    }
  }

  /// Close the previous epoch into history when `epoch` starts a new one.
  fn roll_epoch(&mut self, epoch: GcEpoch) -> bool {
    let previous = match self.epoch {
      Some(previous) if previous.timestamp == epoch.timestamp => {
        return false;
      }
      previous => previous,
    };

    self.epoch = Some(epoch);

    let Some(previous) = previous else {
      return false;
    };

    let entry = HistoryEntry {
      allocated: mem::take(&mut self.allocated_since),
      deallocated: mem::take(&mut self.deallocated_since),
      epoch: previous.number,
      size: self.size,
      timestamp: previous.timestamp,
    };

    let had_alert = self.history.has_alert();
    self.history.record(entry) && !had_alert
  }
}

/// Long-lived metadata and heap accounting for one loaded class.
#[derive(Debug)]
pub struct ClassRecord {
  delete_pending: AtomicBool,
  enabled: AtomicBool,
  excluded: AtomicBool,
  fields: Mutex<Option<IdentityTable<Arc<FieldRecord>>>>,
  id: ClassId,
  methods: Mutex<Vec<MethodId>>,
  name: Arc<str>,
  ref_count: AtomicU32,
  stats: Mutex<ClassStats>,
  super_class: Option<ClassId>,
  visible: AtomicBool,
}

impl ClassRecord {
  /// Install a field in the class's own table, keyed by field identity
  /// with the class as arena.
  ///
  /// # Errors
  ///
  /// Returns a [`TableError`] when the field table refuses the insert.
  pub fn add_field(&self, decl: &FieldDecl) -> Result<Arc<FieldRecord>> {
    let mut fields = lock(&self.fields);
    let table =
      fields.get_or_insert_with(|| IdentityTable::with_capacity("fields", 8));

    if let Some(existing) = table.find(decl.id.key()) {
      return Ok(Arc::clone(existing));
    }

    let record = Arc::new(FieldRecord::new(decl, self.id));
    table.insert(
      decl.id.key(),
      Arc::clone(&record),
      self.id.key(),
      self.id.key(),
      1,
    )?;

    Ok(record)
  }

  pub fn add_method(&self, method: MethodId) {
    let mut methods = lock(&self.methods);

    if !methods.contains(&method) {
      methods.push(method);
    }
  }

  pub fn add_ref(&self) -> u32 {
    self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
  }

  /// Account one new instance of `size` bytes allocated during `epoch`.
  ///
  /// Returns `true` when this allocation closed an epoch that raised the
  /// leak alert.
  pub fn allocate(&self, size: u64, epoch: GcEpoch) -> bool {
    let mut stats = lock(&self.stats);
    let alerted = stats.roll_epoch(epoch);

    stats.size = stats.size.saturating_add(size);
    stats.max_size = stats.max_size.max(stats.size);
    stats.instances += 1;
    stats.new_instances += 1;
    stats.allocated_since = stats.allocated_since.saturating_add(size);

    alerted
  }

  #[must_use]
  pub fn column_value(&self, column: ClassColumn) -> u64 {
    let stats = lock(&self.stats);

    match column {
      ClassColumn::HeapCount => stats.heap_count,
      ClassColumn::HeapSize => stats.heap_size,
      ClassColumn::Instances => stats.instances,
      ClassColumn::MaxSize => stats.max_size,
      ClassColumn::NewInstances => stats.new_instances,
      ClassColumn::Size => stats.size,
    }
  }

  #[must_use]
  pub fn compare(&self, column: ClassColumn, value: u64) -> cmp::Ordering {
    self.column_value(column).cmp(&value)
  }

  /// Release `size` live bytes. Freeing more than is live clamps to the
  /// live size and logs once per class.
  ///
  /// `is_stat` marks a real object death, which counts toward the epoch's
  /// deallocations and the live instance count.
  pub fn deallocate(&self, size: u64, is_stat: bool) -> u64 {
    let mut stats = lock(&self.stats);

    let freed = if size > stats.size {
      if !stats.dealloc_warned {
        stats.dealloc_warned = true;
        warn!(
          class = %self.name,
          requested = size,
          live = stats.size,
          "deallocation exceeds live size, clamping"
        );
      }
      stats.size
    } else {
      size
    };

    stats.size -= freed;

    if is_stat {
      stats.deallocated_since = stats.deallocated_since.saturating_add(freed);
      stats.instances = stats.instances.saturating_sub(1);
    }

    freed
  }

  /// Whether the registry may evict this class now: it must be pending
  /// deletion with no live bytes and no references.
  #[must_use]
  pub fn delete_class(&self) -> bool {
    self.is_delete_pending()
      && lock(&self.stats).size == 0
      && self.ref_count() == 0
  }

  pub fn dump(&self) -> Tag {
    let stats = lock(&self.stats);

    let mut tag = Tag::leaf("class")
      .text("name", self.name.as_ref())
      .uint("size", stats.size)
      .uint("maxsize", stats.max_size)
      .uint("instances", stats.instances)
      .uint("newinstances", stats.new_instances)
      .uint("heapcount", stats.heap_count)
      .uint("heapsize", stats.heap_size)
      .text("alert", if stats.history.has_alert() { "yes" } else { "no" })
      .uint("methods", lock(&self.methods).len() as u64)
      .hidden("id", self.id.to_string());

    if let Some(super_class) = self.super_class {
      tag = tag.hidden("super", super_class.to_string());
    }

    if self.is_delete_pending() {
      tag = tag.hidden("unloaded", "yes");
    }

    tag
  }

  /// All fields as a `fields` node.
  pub fn dump_fields(&self) -> Tag {
    let mut tag = Tag::node("fields").text("class", self.name.as_ref());

    let mut fields = self.fields();
    fields.sort_by(|a, b| a.name().cmp(b.name()));

    for field in fields {
      tag.push(field.dump());
    }

    tag
  }

  pub fn dump_history(&self) -> Tag {
    lock(&self.stats).history.dump(&self.name)
  }

  #[must_use]
  pub fn field(&self, field: FieldId) -> Option<Arc<FieldRecord>> {
    lock(&self.fields)
      .as_ref()
      .and_then(|table| table.find(field.key()).cloned())
  }

  #[must_use]
  pub fn fields(&self) -> Vec<Arc<FieldRecord>> {
    lock(&self.fields)
      .as_ref()
      .map(|table| table.iter().map(|entry| Arc::clone(&entry.value)).collect())
      .unwrap_or_default()
  }

  #[must_use]
  pub fn has_alert(&self) -> bool {
    lock(&self.stats).history.has_alert()
  }

  #[must_use]
  pub fn history_len(&self) -> usize {
    lock(&self.stats).history.len()
  }

  #[must_use]
  pub fn id(&self) -> ClassId {
    self.id
  }

  #[must_use]
  pub fn is_delete_pending(&self) -> bool {
    self.delete_pending.load(Ordering::Acquire)
  }

  #[must_use]
  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn is_excluded(&self) -> bool {
    self.excluded.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn is_visible(&self) -> bool {
    self.visible.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn live_size(&self) -> u64 {
    lock(&self.stats).size
  }

  pub fn mark_delete_pending(&self) {
    self.delete_pending.store(true, Ordering::Release);
  }

  #[must_use]
  pub fn method_ids(&self) -> Vec<MethodId> {
    lock(&self.methods).clone()
  }

  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Shared handle on the name, for method records that display it.
  #[must_use]
  pub fn name_handle(&self) -> Arc<str> {
    Arc::clone(&self.name)
  }

  #[must_use]
  pub fn new(decl: &ClassDecl, history_limit: usize, leak: bool) -> Self {
    Self {
      delete_pending: AtomicBool::new(false),
      enabled: AtomicBool::new(false),
      excluded: AtomicBool::new(false),
      fields: Mutex::new(None),
      id: decl.id,
      methods: Mutex::new(Vec::new()),
      name: Arc::from(decl.name.as_str()),
      ref_count: AtomicU32::new(0),
      stats: Mutex::new(ClassStats::new(history_limit, leak)),
      super_class: decl.super_class,
      visible: AtomicBool::new(true),
    }
  }

  /// Resize one live instance from `old_size` to `new_size` bytes.
  pub fn reallocate(&self, old_size: u64, new_size: u64, epoch: GcEpoch) {
    let mut stats = lock(&self.stats);
    stats.roll_epoch(epoch);

    if new_size >= old_size {
      let grown = new_size - old_size;
      stats.size = stats.size.saturating_add(grown);
      stats.allocated_since = stats.allocated_since.saturating_add(grown);
    } else {
      let shrunk = (old_size - new_size).min(stats.size);
      stats.size -= shrunk;
      stats.deallocated_since = stats.deallocated_since.saturating_add(shrunk);
    }

    stats.max_size = stats.max_size.max(stats.size);
  }

  #[must_use]
  pub fn ref_count(&self) -> u32 {
    self.ref_count.load(Ordering::Acquire)
  }

  pub fn release_ref(&self) -> u32 {
    let previous = self
      .ref_count
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
        Some(count.saturating_sub(1))
      })
      .unwrap_or(0);

    previous.saturating_sub(1)
  }

  pub fn reset_alert(&self) {
    lock(&self.stats).history.reset_alert();
  }

  /// Zero the counters that describe activity rather than live state.
  pub fn reset_statistics(&self) {
    let mut stats = lock(&self.stats);

    stats.allocated_since = 0;
    stats.deallocated_since = 0;
    stats.dealloc_warned = false;
    stats.heap_count = 0;
    stats.heap_size = 0;
    stats.history.clear();
    stats.max_size = stats.size;
    stats.new_instances = 0;

    if let Some(fields) = lock(&self.fields).as_ref() {
      for entry in fields.iter() {
        entry.value.reset_statistics();
      }
    }
  }

  pub fn set_enabled(&self, enabled: bool) {
    self.enabled.store(enabled, Ordering::Relaxed);
  }

  pub fn set_excluded(&self, excluded: bool) {
    self.excluded.store(excluded, Ordering::Relaxed);
  }

  /// Record a heap census result for this class.
  pub fn set_heap(&self, count: u64, size: u64) {
    let mut stats = lock(&self.stats);
    stats.heap_count = count;
    stats.heap_size = size;
  }

  pub fn set_leak_detection(&self, enabled: bool) {
    lock(&self.stats).history.set_leak_detection(enabled);
  }

  pub fn set_visible(&self, visible: bool) {
    self.visible.store(visible, Ordering::Relaxed);
  }

  #[must_use]
  pub fn super_class(&self) -> Option<ClassId> {
    self.super_class
  }
}

impl Disposable for ClassRecord {
  fn dispose(&self, _size: u32) {
    if let Some(mut fields) = lock(&self.fields).take() {
      fields.reset();
    }

    lock(&self.methods).clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record() -> ClassRecord {
    ClassRecord::new(&ClassDecl::new(ClassId(1), "pkg.Cls"), 10, true)
  }

  fn epoch(number: u64) -> GcEpoch {
    GcEpoch {
      number,
      timestamp: number * 100,
    }
  }

  #[test]
  fn deletion_requires_pending_flag() {
    let class = record();
    assert!(!class.delete_class());

    class.mark_delete_pending();
    assert!(class.delete_class());
  }

  #[test]
  fn deletion_requires_zero_live_bytes() {
    let class = record();
    class.mark_delete_pending();
    class.allocate(64, epoch(1));
    assert!(!class.delete_class());

    class.deallocate(64, true);
    assert!(class.delete_class());
  }

  #[test]
  fn deletion_requires_zero_references() {
    let class = record();
    class.mark_delete_pending();
    class.add_ref();
    assert!(!class.delete_class());

    class.release_ref();
    assert!(class.delete_class());
  }

  #[test]
  fn over_deallocation_clamps_to_live_size() {
    let class = record();
    class.allocate(100, epoch(1));

    assert_eq!(class.deallocate(250, true), 100);
    assert_eq!(class.live_size(), 0);
    assert_eq!(class.deallocate(10, true), 0);
  }

  #[test]
  fn history_grows_once_per_epoch() {
    let class = record();

    for _ in 0..5 {
      class.allocate(8, epoch(1));
    }
    assert_eq!(class.history_len(), 0);

    class.allocate(8, epoch(2));
    assert_eq!(class.history_len(), 1);

    class.allocate(8, epoch(2));
    assert_eq!(class.history_len(), 1);

    class.allocate(8, epoch(3));
    assert_eq!(class.history_len(), 2);
  }

  #[test]
  fn steady_growth_raises_alert_once() {
    let class = record();
    let mut raised = 0;

    for number in 1..=12 {
      if class.allocate(1_000, epoch(number)) {
        raised += 1;
      }
    }

    assert!(class.has_alert());
    assert_eq!(raised, 1);

    class.reset_alert();
    assert!(!class.has_alert());
    assert_eq!(class.history_len(), 1);
  }

  #[test]
  fn reallocation_tracks_size_delta() {
    let class = record();
    class.allocate(32, epoch(1));
    class.reallocate(32, 96, epoch(1));
    assert_eq!(class.live_size(), 96);

    class.reallocate(96, 16, epoch(1));
    assert_eq!(class.live_size(), 16);
    assert_eq!(class.column_value(ClassColumn::MaxSize), 96);
    assert_eq!(class.column_value(ClassColumn::Instances), 1);
  }

  #[test]
  fn fields_live_in_class_table() {
    let class = record();
    let decl = FieldDecl::new(FieldId(7), "items", "[I");

    let first = class.add_field(&decl).unwrap();
    let again = class.add_field(&decl).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    first.touch();
    assert_eq!(class.field(FieldId(7)).map(|f| f.references()), Some(1));
    assert_eq!(class.dump_fields().children().len(), 1);

    class.reset_statistics();
    assert_eq!(first.references(), 0);
  }

  #[test]
  fn columns_resolve_by_prefix() {
    assert_eq!(ClassColumn::from_prefix("s"), Some(ClassColumn::Size));
    assert_eq!(ClassColumn::from_prefix("heap"), Some(ClassColumn::HeapCount));
    assert_eq!(ClassColumn::from_prefix("heaps"), Some(ClassColumn::HeapSize));
    assert_eq!(ClassColumn::from_prefix("N"), Some(ClassColumn::NewInstances));
    assert!("bogus".parse::<ClassColumn>().is_err());
  }

  #[test]
  fn compare_reports_ordering() {
    let class = record();
    class.allocate(40, epoch(1));
    class.set_heap(3, 120);

    assert_eq!(class.compare(ClassColumn::Size, 40), cmp::Ordering::Equal);
    assert_eq!(class.compare(ClassColumn::HeapSize, 200), cmp::Ordering::Less);
    assert_eq!(class.dump().integer("heapcount"), Some(3));
  }
}
