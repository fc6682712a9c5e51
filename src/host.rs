use super::*;

/// Entry of a method's local variable table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalVariable {
  pub length: u32,
  pub name: String,
  pub signature: String,
  pub slot: u16,
  pub start: u32,
}

impl LocalVariable {
  pub fn dump(&self) -> Tag {
    Tag::leaf("local")
      .text("name", self.name.as_str())
      .text("signature", self.signature.as_str())
      .uint("slot", u64::from(self.slot))
  }
}

/// Method metadata as reported by the host runtime.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MethodDecl {
  /// Last source line, or `-1` when unknown.
  pub end_line: i32,
  pub id: MethodId,
  pub locals: Vec<LocalVariable>,
  pub name: String,
  pub signature: String,
  /// First source line, or `-1` when unknown.
  pub start_line: i32,
}

impl MethodDecl {
  #[must_use]
  pub fn new(
    id: MethodId,
    name: impl Into<String>,
    signature: impl Into<String>,
  ) -> Self {
    Self {
      end_line: -1,
      id,
      locals: Vec::new(),
      name: name.into(),
      signature: signature.into(),
      start_line: -1,
    }
  }

  #[must_use]
  pub fn with_lines(mut self, start_line: i32, end_line: i32) -> Self {
    self.start_line = start_line;
    self.end_line = end_line;
    self
  }

  #[must_use]
  pub fn with_local(mut self, local: LocalVariable) -> Self {
    self.locals.push(local);
    self
  }
}

/// Field metadata as reported by the host runtime.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FieldDecl {
  pub id: FieldId,
  pub is_static: bool,
  pub name: String,
  pub signature: String,
}

impl FieldDecl {
  #[must_use]
  pub fn new(
    id: FieldId,
    name: impl Into<String>,
    signature: impl Into<String>,
  ) -> Self {
    Self {
      id,
      is_static: false,
      name: name.into(),
      signature: signature.into(),
    }
  }

  #[must_use]
  pub fn static_field(mut self) -> Self {
    self.is_static = true;
    self
  }
}

/// Class metadata delivered with a class-load event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClassDecl {
  pub fields: Vec<FieldDecl>,
  pub id: ClassId,
  pub methods: Vec<MethodDecl>,
  /// Dotted binary name; see [`normalize_class_name`].
  pub name: String,
  pub super_class: Option<ClassId>,
}

impl ClassDecl {
  /// Declaration for `name`, which may use either dotted or internal
  /// (`Lpkg/Cls;`, `pkg/Cls`) form.
  #[must_use]
  pub fn new(id: ClassId, name: &str) -> Self {
    Self {
      fields: Vec::new(),
      id,
      methods: Vec::new(),
      name: normalize_class_name(name),
      super_class: None,
    }
  }

  #[must_use]
  pub fn with_field(mut self, field: FieldDecl) -> Self {
    self.fields.push(field);
    self
  }

  #[must_use]
  pub fn with_method(mut self, method: MethodDecl) -> Self {
    self.methods.push(method);
    self
  }

  #[must_use]
  pub fn with_super(mut self, super_class: ClassId) -> Self {
    self.super_class = Some(super_class);
    self
  }
}

/// Identity resolution the core asks of the attachment layer when an event
/// names something it has not been told about yet.
pub trait HostRuntime: Send + Sync {
  fn class_info(&self, _class: ClassId) -> Option<ClassDecl> {
    None
  }

  /// Declaring class and metadata of a method first seen at call time.
  fn method_info(&self, _method: MethodId) -> Option<(ClassId, MethodDecl)> {
    None
  }

  fn thread_name(&self, _thread: ThreadId) -> Option<String> {
    None
  }
}

/// Host that resolves nothing; every identity must arrive through events.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl HostRuntime for DetachedHost {}

/// Turn `Lpkg/sub/Cls;` or `pkg/sub/Cls` into `pkg.sub.Cls`.
#[must_use]
pub fn normalize_class_name(name: &str) -> String {
  let trimmed = name
    .strip_prefix('L')
    .and_then(|rest| rest.strip_suffix(';'))
    .unwrap_or(name);

  trimmed.replace('/', ".")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalizes_internal_names() {
    assert_eq!(normalize_class_name("Ljava/lang/String;"), "java.lang.String");
    assert_eq!(normalize_class_name("pkg/Cls"), "pkg.Cls");
    assert_eq!(normalize_class_name("pkg.Cls"), "pkg.Cls");
    assert_eq!(normalize_class_name("Lone"), "Lone");
  }

  #[test]
  fn builds_class_declarations() {
    let decl = ClassDecl::new(ClassId(1), "Lpkg/Cls;")
      .with_super(ClassId(2))
      .with_method(MethodDecl::new(MethodId(10), "foo", "()V").with_lines(3, 9))
      .with_field(FieldDecl::new(FieldId(20), "count", "I").static_field());

    assert_eq!(decl.name, "pkg.Cls");
    assert_eq!(decl.super_class, Some(ClassId(2)));
    assert_eq!(decl.methods[0].start_line, 3);
    assert!(decl.fields[0].is_static);
  }
}
