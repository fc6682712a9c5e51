use super::*;

bitflags! {
  /// How a formatter should treat an attribute value.
  #[derive(Debug, Clone, Copy, Default, Eq, Hash, PartialEq)]
  pub struct AttrFlags: u8 {
    /// Value is a decimal integer and may be right-aligned or summed.
    const INTEGER = 0b001;
    /// Value is carried for machine consumers only.
    const HIDDEN = 0b010;
    /// Value is a microsecond count the formatter may rescale.
    const MICROS = 0b100;
  }
}

impl AttrFlags {
  pub const PLAIN: Self = Self::empty();
}

/// Whether a tag may carry children.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
  Leaf,
  Node,
}

/// Key/value pair on a [`Tag`]. Values are always strings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Attribute {
  pub flags: AttrFlags,
  pub info: Option<String>,
  pub key: Cow<'static, str>,
  pub value: String,
}

impl Attribute {
  #[must_use]
  pub fn new(
    key: impl Into<Cow<'static, str>>,
    value: impl Into<String>,
    flags: AttrFlags,
  ) -> Self {
    Self {
      flags,
      info: None,
      key: key.into(),
      value: value.into(),
    }
  }

  /// Parsed integer value, when the attribute is flagged as one.
  #[must_use]
  pub fn as_integer(&self) -> Option<i64> {
    if self.flags.intersects(AttrFlags::INTEGER | AttrFlags::MICROS) {
      self.value.parse().ok()
    } else {
      None
    }
  }
}

impl Serialize for Attribute {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let fields = if self.info.is_some() { 4 } else { 3 };
    let mut state = serializer.serialize_struct("Attribute", fields)?;
    state.serialize_field("key", &self.key)?;
    state.serialize_field("value", &self.value)?;
    state.serialize_field("flags", &self.flags.bits())?;

    if let Some(info) = &self.info {
      state.serialize_field("info", info)?;
    }

    state.end()
  }
}

/// Node of the report tree handed to external formatters.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tag {
  attributes: Vec<Attribute>,
  children: Vec<Tag>,
  kind: TagKind,
  name: Cow<'static, str>,
}

impl Tag {
  #[must_use]
  pub fn attribute(&self, key: &str) -> Option<&Attribute> {
    self.attributes.iter().find(|attribute| attribute.key == key)
  }

  #[must_use]
  pub fn attributes(&self) -> &[Attribute] {
    &self.attributes
  }

  #[must_use]
  pub fn child(mut self, child: Tag) -> Self {
    self.push(child);
    self
  }

  #[must_use]
  pub fn children(&self) -> &[Tag] {
    &self.children
  }

  /// Serialize this tree as JSON into `writer`.
  ///
  /// # Errors
  ///
  /// Returns an error if encoding or writing fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<()> {
    serde_json::to_writer(writer, self)?;
    Ok(())
  }

  #[must_use]
  pub fn hidden(
    self,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<String>,
  ) -> Self {
    self.with(Attribute::new(key, value, AttrFlags::HIDDEN))
  }

  #[must_use]
  pub fn int(self, key: impl Into<Cow<'static, str>>, value: i64) -> Self {
    self.with(Attribute::new(key, value.to_string(), AttrFlags::INTEGER))
  }

  /// Integer value of attribute `key`.
  #[must_use]
  pub fn integer(&self, key: &str) -> Option<i64> {
    self.attribute(key).and_then(Attribute::as_integer)
  }

  #[must_use]
  pub fn kind(&self) -> TagKind {
    self.kind
  }

  #[must_use]
  pub fn leaf(name: impl Into<Cow<'static, str>>) -> Self {
    Self::new(name, TagKind::Leaf)
  }

  #[must_use]
  pub fn micros(self, key: impl Into<Cow<'static, str>>, value: u64) -> Self {
    self.with(Attribute::new(
      key,
      value.to_string(),
      AttrFlags::INTEGER | AttrFlags::MICROS,
    ))
  }

  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[must_use]
  pub fn node(name: impl Into<Cow<'static, str>>) -> Self {
    Self::new(name, TagKind::Node)
  }

  /// Append a child, promoting a leaf to a node.
  pub fn push(&mut self, child: Tag) {
    self.kind = TagKind::Node;
    self.children.push(child);
  }

  pub fn push_attribute(&mut self, attribute: Attribute) {
    self.attributes.push(attribute);
  }

  #[must_use]
  pub fn text(
    self,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<String>,
  ) -> Self {
    self.with(Attribute::new(key, value, AttrFlags::PLAIN))
  }

  #[must_use]
  pub fn uint(self, key: impl Into<Cow<'static, str>>, value: u64) -> Self {
    self.with(Attribute::new(key, value.to_string(), AttrFlags::INTEGER))
  }

  /// String value of attribute `key`.
  #[must_use]
  pub fn value(&self, key: &str) -> Option<&str> {
    self.attribute(key).map(|attribute| attribute.value.as_str())
  }

  /// Depth-first walk, handing each tag and its depth to `visit`.
  pub fn walk<F>(&self, visit: &mut F)
  where
    F: FnMut(&Tag, usize),
  {
    self.walk_at(0, visit);
  }

  #[must_use]
  pub fn with(mut self, attribute: Attribute) -> Self {
    self.attributes.push(attribute);
    self
  }

  /// Attach `info` to the most recently added attribute.
  #[must_use]
  pub fn with_info(mut self, info: impl Into<String>) -> Self {
    if let Some(attribute) = self.attributes.last_mut() {
      attribute.info = Some(info.into());
    }
    self
  }

  fn new(name: impl Into<Cow<'static, str>>, kind: TagKind) -> Self {
    Self {
      attributes: Vec::new(),
      children: Vec::new(),
      kind,
      name: name.into(),
    }
  }

  fn walk_at<F>(&self, depth: usize, visit: &mut F)
  where
    F: FnMut(&Tag, usize),
  {
    visit(self, depth);

    for child in &self.children {
      child.walk_at(depth + 1, visit);
    }
  }
}

impl Serialize for Tag {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("Tag", 4)?;
    state.serialize_field("name", &self.name)?;
    state.serialize_field("kind", &self.kind)?;
    state.serialize_field("attributes", &self.attributes)?;
    state.serialize_field("children", &self.children)?;
    state.end()
  }
}
