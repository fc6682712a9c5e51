use super::*;

/// Identity-keyed tables of every known class and method.
///
/// Structural changes (insert, remove, rehash, arena eviction) take the
/// table's write lock; lookups share the read lock. Statistics live in the
/// records themselves, so the hot enter/exit path only ever reads.
#[derive(Debug)]
pub struct Registry {
  classes: RwLock<IdentityTable<Arc<ClassRecord>>>,
  methods: RwLock<IdentityTable<Arc<MethodRecord>>>,
}

impl Default for Registry {
  fn default() -> Self {
    Self::new()
  }
}

impl Registry {
  /// Configure a freshly created or reconfigured method from `properties`.
  ///
  /// Only class-derived flags are rewritten: an explicit method exclusion
  /// stays, and methods of an unloaded class stay disabled.
  pub fn apply_method_flags(
    method: &MethodRecord,
    class: &ClassRecord,
    properties: &dyn Properties,
  ) {
    let class_name = class.name();
    let name = method.name();

    method.set_enabled(class.is_enabled() && !class.is_delete_pending());
    method.set_class_excluded(class.is_excluded());
    method.set_debug(properties.is_class_debug_targeted(class_name));
    method.set_timer(properties.is_method_targeted(class_name, name));
    method.set_trace_context(properties.trace_context(class_name, name));
    method.set_profile_context(properties.profile_context(class_name, name));
  }

  /// Re-evaluate every record's flags against new `properties`.
  pub fn apply_properties(&self, properties: &dyn Properties) {
    for class in self.classes() {
      class.set_enabled(properties.is_package_in_scope(class.name()));
      class.set_excluded(properties.is_package_excluded(class.name()));
      class.set_visible(!class.is_excluded());
      class.set_leak_detection(properties.leak_alert_enabled());

      for method in self.methods_of(&class) {
        Self::apply_method_flags(&method, &class, properties);
      }
    }
  }

  #[must_use]
  pub fn class(&self, id: ClassId) -> Option<Arc<ClassRecord>> {
    read_lock(&self.classes).find(id.key()).cloned()
  }

  /// Class by exact or simple name (`pkg.Cls` or `Cls`).
  #[must_use]
  pub fn class_by_name(&self, name: &str) -> Option<Arc<ClassRecord>> {
    let name = normalize_class_name(name.trim());
    let classes = read_lock(&self.classes);

    classes
      .iter()
      .find(|entry| entry.value.name() == name)
      .or_else(|| {
        classes.iter().find(|entry| {
          entry
            .value
            .name()
            .rsplit_once('.')
            .is_some_and(|(_, simple)| simple == name)
        })
      })
      .map(|entry| Arc::clone(&entry.value))
  }

  #[must_use]
  pub fn classes(&self) -> Vec<Arc<ClassRecord>> {
    read_lock(&self.classes)
      .iter()
      .map(|entry| Arc::clone(&entry.value))
      .collect()
  }

  /// Drop every record, running each one's teardown.
  pub fn clear(&self) {
    write_lock(&self.methods).reset();
    write_lock(&self.classes).reset();
  }

  /// `(classes, methods)` currently registered.
  #[must_use]
  pub fn counts(&self) -> (usize, usize) {
    (read_lock(&self.classes).len(), read_lock(&self.methods).len())
  }

  /// Evict `class` and all of its methods if it is eligible for removal.
  ///
  /// Returns whether the class was evicted.
  pub fn delete_class(&self, class: &ClassRecord) -> bool {
    if !class.delete_class() {
      return false;
    }

    self.evict_class(class.id()).is_some()
  }

  /// Classes with a raised leak alert.
  pub fn dump_alerts(&self) -> Tag {
    let mut tag = Tag::node("alerts");

    let mut alerted: Vec<_> = self
      .classes()
      .into_iter()
      .filter(|class| class.has_alert())
      .collect();
    alerted.sort_by(|a, b| a.name().cmp(b.name()));

    tag = tag.uint("count", alerted.len() as u64);

    for class in alerted {
      tag.push(class.dump_history());
    }

    tag
  }

  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownClass`] when no class matches `name`.
  pub fn dump_fields(&self, name: &str) -> Result<Tag> {
    self
      .class_by_name(name)
      .map(|class| class.dump_fields())
      .ok_or_else(|| ProfilerError::UnknownClass(name.into()))
  }

  /// Visible classes ordered by `column`, largest first.
  pub fn dump_heap(&self, column: ClassColumn, limit: usize) -> Tag {
    let mut rows: Vec<(u64, Arc<ClassRecord>)> = self
      .classes()
      .into_iter()
      .filter(|class| class.is_visible())
      .map(|class| (class.column_value(column), class))
      .collect();

    rows.sort_by(|(a, left), (b, right)| {
      b.cmp(a).then_with(|| left.name().cmp(right.name()))
    });

    let total: u64 = rows.iter().map(|(_, class)| class.live_size()).sum();

    let mut tag = Tag::node("heap")
      .text("column", column.name())
      .uint("classes", rows.len() as u64)
      .uint("size", total);

    for (_, class) in rows.into_iter().take(limit) {
      tag.push(class.dump());
    }

    tag
  }

  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownClass`] when no class matches `name`.
  pub fn dump_history(&self, name: &str) -> Result<Tag> {
    self
      .class_by_name(name)
      .map(|class| class.dump_history())
      .ok_or_else(|| ProfilerError::UnknownClass(name.into()))
  }

  /// Methods with at least one call, ordered by `column`, largest first.
  pub fn dump_methods(&self, column: MethodColumn, limit: usize) -> Tag {
    let mut rows: Vec<(u64, Arc<MethodRecord>)> = read_lock(&self.methods)
      .iter()
      .filter(|entry| entry.value.calls() > 0)
      .map(|entry| (entry.value.column_value(column), Arc::clone(&entry.value)))
      .collect();

    rows.sort_by(|(a, left), (b, right)| {
      b.cmp(a).then_with(|| left.id().cmp(&right.id()))
    });

    let mut tag = Tag::node("methods")
      .text("column", column.name())
      .uint("count", rows.len() as u64);

    for (_, method) in rows.into_iter().take(limit) {
      tag.push(method.dump());
    }

    tag
  }

  /// Remove `class` from the table along with every method grouped under
  /// it, then shrink the tables if they have become sparse.
  pub fn evict_class(&self, id: ClassId) -> Option<Arc<ClassRecord>> {
    let removed = {
      let mut classes = write_lock(&self.classes);
      let removed = classes.remove(id.key());
      classes.check_size();
      removed
    }?;

    let evicted = {
      let mut methods = write_lock(&self.methods);
      let evicted = methods.delete_arena(id.key());
      methods.check_size();
      evicted
    };

    let owner = removed.owner;
    let class = removed.value;
    class.dispose(removed.size);

    for entry in &evicted {
      entry.value.dispose(entry.size);
    }

    debug!(
      class = class.name(),
      methods = evicted.len(),
      "class evicted"
    );

    // An unloaded parent may have been waiting on this last reference.
    if let Some(parent) = (owner != 0)
      .then(|| self.class(ClassId(owner)))
      .flatten()
    {
      parent.release_ref();
      self.delete_class(&parent);
    }

    Some(class)
  }

  #[must_use]
  pub fn is_corrupted(&self) -> bool {
    read_lock(&self.classes).is_corrupted()
      || read_lock(&self.methods).is_corrupted()
  }

  #[must_use]
  pub fn method(&self, id: MethodId) -> Option<Arc<MethodRecord>> {
    read_lock(&self.methods).find(id.key()).cloned()
  }

  #[must_use]
  pub fn methods_of(&self, class: &ClassRecord) -> Vec<Arc<MethodRecord>> {
    let methods = read_lock(&self.methods);

    class
      .method_ids()
      .into_iter()
      .filter_map(|id| methods.find(id.key()).cloned())
      .collect()
  }

  #[must_use]
  pub fn new() -> Self {
    Self {
      classes: RwLock::new(IdentityTable::with_capacity("classes", 64)),
      methods: RwLock::new(IdentityTable::with_capacity("methods", 256)),
    }
  }

  /// Register a loaded class together with its declared methods and
  /// fields. Registering a known class returns the existing record.
  ///
  /// # Errors
  ///
  /// Returns a table error if the class or one of its methods could not be
  /// stored.
  pub fn register_class(
    &self,
    decl: &ClassDecl,
    properties: &dyn Properties,
  ) -> Result<Arc<ClassRecord>> {
    let class = {
      let mut classes = write_lock(&self.classes);

      if let Some(existing) = classes.find(decl.id.key()) {
        return Ok(Arc::clone(existing));
      }

      let class = Arc::new(ClassRecord::new(
        decl,
        properties.history_limit(),
        properties.leak_alert_enabled(),
      ));

      class.set_enabled(properties.is_package_in_scope(class.name()));
      class.set_excluded(properties.is_package_excluded(class.name()));
      class.set_visible(!class.is_excluded());

      // The owner is recorded only for a parent that took a reference, so
      // eviction releases exactly what was added.
      let parent = decl
        .super_class
        .and_then(|id| classes.find(id.key()).cloned());

      classes.insert(
        decl.id.key(),
        Arc::clone(&class),
        0,
        parent.as_ref().map_or(0, |parent| parent.id().key()),
        1,
      )?;

      if let Some(parent) = parent {
        parent.add_ref();
      }

      class
    };

    for method in &decl.methods {
      self.register_method(&class, method, properties)?;
    }

    for field in &decl.fields {
      self.register_field(&class, field)?;
    }

    debug!(
      class = class.name(),
      methods = decl.methods.len(),
      fields = decl.fields.len(),
      enabled = class.is_enabled(),
      "class loaded"
    );

    Ok(class)
  }

  /// # Errors
  ///
  /// Returns a table error if the class's field table refuses the field.
  pub fn register_field(
    &self,
    class: &ClassRecord,
    decl: &FieldDecl,
  ) -> Result<Arc<FieldRecord>> {
    class.add_field(decl)
  }

  /// Register `decl` as a method of `class`, grouped under the class so
  /// that evicting the class evicts the method. Idempotent per identity.
  ///
  /// # Errors
  ///
  /// Returns a table error if the method table refuses the insert.
  pub fn register_method(
    &self,
    class: &ClassRecord,
    decl: &MethodDecl,
    properties: &dyn Properties,
  ) -> Result<Arc<MethodRecord>> {
    let mut methods = write_lock(&self.methods);

    if let Some(existing) = methods.find(decl.id.key()) {
      return Ok(Arc::clone(existing));
    }

    let method =
      Arc::new(MethodRecord::new(decl, class.id(), class.name_handle()));
    Self::apply_method_flags(&method, class, properties);

    methods.insert(
      decl.id.key(),
      Arc::clone(&method),
      class.id().key(),
      class.id().key(),
      1,
    )?;

    drop(methods);
    class.add_method(decl.id);

    Ok(method)
  }

  /// Zero every statistic while keeping all records registered.
  pub fn reset_statistics(&self) {
    for entry in read_lock(&self.methods).iter() {
      entry.value.reset_statistics();
    }

    for entry in read_lock(&self.classes).iter() {
      entry.value.reset_statistics();
    }
  }

  /// Enable or disable `class`; `recursive` carries the flag to all of its
  /// methods. Excluded methods stay excluded either way.
  ///
  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownClass`] for an unregistered class.
  pub fn set_class_enabled(
    &self,
    id: ClassId,
    enabled: bool,
    recursive: bool,
  ) -> Result<()> {
    let class = self
      .class(id)
      .ok_or_else(|| ProfilerError::UnknownClass(id.to_string()))?;

    class.set_enabled(enabled);

    if recursive {
      for method in self.methods_of(&class) {
        method.set_enabled(enabled);
      }
    }

    Ok(())
  }

  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownMethod`] for an unregistered method.
  pub fn set_method_enabled(&self, id: MethodId, enabled: bool) -> Result<()> {
    self
      .method(id)
      .ok_or(ProfilerError::UnknownMethod(id))?
      .set_enabled(enabled);

    Ok(())
  }

  /// # Errors
  ///
  /// Returns [`ProfilerError::UnknownMethod`] for an unregistered method.
  pub fn set_method_excluded(
    &self,
    id: MethodId,
    excluded: bool,
  ) -> Result<()> {
    self
      .method(id)
      .ok_or(ProfilerError::UnknownMethod(id))?
      .set_excluded(excluded);

    Ok(())
  }

  /// Mark `class` unloaded and evict it right away if nothing keeps it.
  ///
  /// Returns whether the class was evicted now.
  pub fn unload_class(&self, id: ClassId) -> bool {
    let Some(class) = self.class(id) else {
      return false;
    };

    class.mark_delete_pending();

    for method in self.methods_of(&class) {
      method.set_enabled(false);
    }

    debug!(
      class = class.name(),
      live = class.live_size(),
      refs = class.ref_count(),
      "class unloaded"
    );

    self.delete_class(&class)
  }
}
