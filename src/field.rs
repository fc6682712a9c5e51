use super::*;

/// Bytes in an array object header (mark word, class word, length).
pub const ARRAY_HEADER_BYTES: u64 = 16;

/// Bytes per object reference slot.
pub const REFERENCE_BYTES: u64 = 8;

/// Element type code of an array field, as written in a type signature.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ElementType {
  Boolean,
  Byte,
  Char,
  Double,
  Float,
  Int,
  Long,
  Reference,
  Short,
}

impl ElementType {
  #[must_use]
  pub fn byte_size(self) -> u64 {
    match self {
      Self::Boolean | Self::Byte => 1,
      Self::Char | Self::Short => 2,
      Self::Float | Self::Int => 4,
      Self::Double | Self::Long => 8,
      Self::Reference => REFERENCE_BYTES,
    }
  }

  #[must_use]
  pub fn code(self) -> char {
    match self {
      Self::Boolean => 'Z',
      Self::Byte => 'B',
      Self::Char => 'C',
      Self::Double => 'D',
      Self::Float => 'F',
      Self::Int => 'I',
      Self::Long => 'J',
      Self::Reference => 'L',
      Self::Short => 'S',
    }
  }

  #[must_use]
  pub fn from_code(code: char) -> Option<Self> {
    Some(match code {
      'Z' => Self::Boolean,
      'B' => Self::Byte,
      'C' => Self::Char,
      'D' => Self::Double,
      'F' => Self::Float,
      'I' => Self::Int,
      'J' => Self::Long,
      'L' => Self::Reference,
      'S' => Self::Short,
      _ => return None,
    })
  }
}

/// Geometry of an array-typed field.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ArrayType {
  pub dimensions: u8,
  pub element: ElementType,
}

impl ArrayType {
  /// Heap footprint of one array of `length` elements at the outermost
  /// dimension, rounded up to 8 bytes.
  #[must_use]
  pub fn byte_size(&self, length: u64) -> u64 {
    let raw = ARRAY_HEADER_BYTES
      .saturating_add(length.saturating_mul(self.stride()));
    raw.div_ceil(8).saturating_mul(8)
  }

  /// Decode `[I`, `[[J`, `[Ljava/lang/String;` and friends.
  #[must_use]
  pub fn from_signature(signature: &str) -> Option<Self> {
    let dimensions = signature.bytes().take_while(|&b| b == b'[').count();

    if dimensions == 0 {
      return None;
    }

    let code = signature[dimensions..].chars().next()?;

    Some(Self {
      dimensions: u8::try_from(dimensions).unwrap_or(u8::MAX),
      element: ElementType::from_code(code)?,
    })
  }

  /// Bytes per outermost element. Nested dimensions hold references.
  #[must_use]
  pub fn stride(&self) -> u64 {
    if self.dimensions > 1 {
      REFERENCE_BYTES
    } else {
      self.element.byte_size()
    }
  }
}

/// Metadata and access counter for one field of a loaded class.
#[derive(Debug)]
pub struct FieldRecord {
  array: Option<ArrayType>,
  class: ClassId,
  id: FieldId,
  is_static: bool,
  name: Box<str>,
  references: AtomicU64,
  signature: Box<str>,
}

impl FieldRecord {
  #[must_use]
  pub fn array(&self) -> Option<ArrayType> {
    self.array
  }

  #[must_use]
  pub fn class(&self) -> ClassId {
    self.class
  }

  pub fn dump(&self) -> Tag {
    let mut tag = Tag::leaf("field")
      .text("name", self.name.as_ref())
      .text("signature", self.signature.as_ref())
      .text("static", if self.is_static { "yes" } else { "no" })
      .uint("references", self.references());

    if let Some(array) = self.array {
      tag = tag
        .uint("dimensions", u64::from(array.dimensions))
        .text("element", array.element.code().to_string())
        .uint("stride", array.stride())
        .uint("empty_size", array.byte_size(0));
    }

    tag.hidden("id", self.id.to_string())
  }

  #[must_use]
  pub fn id(&self) -> FieldId {
    self.id
  }

  #[must_use]
  pub fn is_static(&self) -> bool {
    self.is_static
  }

  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[must_use]
  pub fn new(decl: &FieldDecl, class: ClassId) -> Self {
    Self {
      array: ArrayType::from_signature(&decl.signature),
      class,
      id: decl.id,
      is_static: decl.is_static,
      name: decl.name.as_str().into(),
      references: AtomicU64::new(0),
      signature: decl.signature.as_str().into(),
    }
  }

  #[must_use]
  pub fn references(&self) -> u64 {
    self.references.load(Ordering::Relaxed)
  }

  pub fn reset_statistics(&self) {
    self.references.store(0, Ordering::Relaxed);
  }

  #[must_use]
  pub fn signature(&self) -> &str {
    &self.signature
  }

  /// Count one access; returns the new total.
  pub fn touch(&self) -> u64 {
    self.references.fetch_add(1, Ordering::Relaxed) + 1
  }
}

impl Disposable for FieldRecord {
  fn dispose(&self, _size: u32) {
    self.reset_statistics();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_array_signatures() {
    assert_eq!(
      ArrayType::from_signature("[I"),
      Some(ArrayType {
        dimensions: 1,
        element: ElementType::Int,
      })
    );
    assert_eq!(
      ArrayType::from_signature("[[Ljava/lang/String;"),
      Some(ArrayType {
        dimensions: 2,
        element: ElementType::Reference,
      })
    );
    assert_eq!(ArrayType::from_signature("I"), None);
    assert_eq!(ArrayType::from_signature("[Q"), None);
    assert_eq!(ArrayType::from_signature("["), None);
  }

  #[test]
  fn array_sizes_round_to_eight_bytes() {
    let bytes = ArrayType::from_signature("[B").unwrap();
    assert_eq!(bytes.byte_size(0), 16);
    assert_eq!(bytes.byte_size(1), 24);
    assert_eq!(bytes.byte_size(8), 24);

    let longs = ArrayType::from_signature("[J").unwrap();
    assert_eq!(longs.byte_size(3), 40);

    let matrix = ArrayType::from_signature("[[D").unwrap();
    assert_eq!(matrix.byte_size(2), 16 + 2 * REFERENCE_BYTES);
  }

  #[test]
  fn field_counts_accesses() {
    let decl = FieldDecl::new(FieldId(3), "buffer", "[C");
    let field = FieldRecord::new(&decl, ClassId(1));

    assert_eq!(field.touch(), 1);
    assert_eq!(field.touch(), 2);

    let tag = field.dump();
    assert_eq!(tag.integer("references"), Some(2));
    assert_eq!(tag.value("element"), Some("C"));
    assert_eq!(tag.integer("stride"), Some(2));
    assert_eq!(tag.integer("empty_size"), Some(16));

    let scalar =
      FieldRecord::new(&FieldDecl::new(FieldId(4), "n", "I"), ClassId(1));
    assert!(scalar.dump().attribute("stride").is_none());

    field.reset_statistics();
    assert_eq!(field.references(), 0);
  }
}
