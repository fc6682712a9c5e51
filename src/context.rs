use super::*;

/// Read-only view of a call stack, innermost frame first.
pub trait StackView {
  fn depth(&self) -> usize;

  /// `(class, method)` names of the frame `from_top` positions below the
  /// innermost one.
  fn frame(&self, from_top: usize) -> Option<(&str, &str)>;
}

/// Frames given bottom-up as `Class.method` labels; the last entry is the
/// innermost call.
impl StackView for [&str] {
  fn depth(&self) -> usize {
    self.len()
  }

  fn frame(&self, from_top: usize) -> Option<(&str, &str)> {
    let index = self.len().checked_sub(from_top + 1)?;
    let label = self[index];

    Some(match label.rsplit_once('.') {
      Some((class, method)) => (class, method),
      None => ("", label),
    })
  }
}

/// One `/`-separated element of a context expression.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Segment {
  /// `.`: exactly one frame, whatever it is.
  Any,
  /// `...`: zero or more frames.
  Ellipsis,
  Literal(Box<str>),
}

impl Segment {
  fn parse(text: &str) -> Self {
    match text {
      "." => Self::Any,
      "..." => Self::Ellipsis,
      other => Self::Literal(other.into()),
    }
  }
}

impl Display for Segment {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::Any => f.write_str("."),
      Self::Ellipsis => f.write_str("..."),
      Self::Literal(text) => f.write_str(text),
    }
  }
}

/// Parsed call-path expression `/seg1/seg2/.../Class.method{attr1,attr2}`.
///
/// Without a leading `/` the expression carries no stack segments and
/// matches every stack. A trace trigger carrying `locals` lists the
/// method's local variables on its enter event.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Context {
  attributes: Vec<Box<str>>,
  min_depth: usize,
  name: Box<str>,
  segments: Vec<Segment>,
  source: Option<Box<str>>,
}

impl Context {
  #[must_use]
  pub fn attributes(&self) -> impl Iterator<Item = &str> {
    self.attributes.iter().map(AsRef::as_ref)
  }

  #[must_use]
  pub fn has_attribute(&self, attribute: &str) -> bool {
    self
      .attributes
      .iter()
      .any(|candidate| candidate.eq_ignore_ascii_case(attribute))
  }

  /// Walk `stack` from its innermost frame outwards while walking the
  /// segments from last to first.
  ///
  /// A literal that fails right after a `.` (or with no wildcard pending)
  /// ends the match; after `...` the frame is skipped and the same literal
  /// is tried one frame further out.
  #[must_use]
  pub fn matches<S: StackView + ?Sized>(&self, stack: &S) -> bool {
    if self.segments.is_empty() {
      return true;
    }

    if stack.depth() < self.min_depth {
      return false;
    }

    let mut frame = 0;
    let mut floating = false;

    for segment in self.segments.iter().rev() {
      match segment {
        Segment::Ellipsis => floating = true,
        Segment::Any => {
          if frame >= stack.depth() {
            return false;
          }
          frame += 1;
          floating = false;
        }
        Segment::Literal(pattern) => loop {
          let Some((class, method)) = stack.frame(frame) else {
            return false;
          };
          frame += 1;

          if literal_matches(pattern, class, method) {
            floating = false;
            break;
          }

          if !floating {
            return false;
          }
        },
      }
    }

    true
  }

  /// Frames a stack needs before it can possibly match.
  #[must_use]
  pub fn min_depth(&self) -> usize {
    self.min_depth
  }

  /// The `Class.method` part the expression is attached to.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Whether the name part designates `method` of `class`.
  #[must_use]
  pub fn name_matches(&self, class: &str, method: &str) -> bool {
    !self.name.is_empty() && literal_matches(&self.name, class, method)
  }

  /// Parse `text`; `None` or blank text yields a context matching anything.
  #[must_use]
  pub fn parse(text: Option<&str>) -> Self {
    let Some(text) = text.map(str::trim).filter(|text| !text.is_empty())
    else {
      return Self::default();
    };

    let (body, attributes) = match text.find('{') {
      Some(open) => {
        let rest = &text[open + 1..];
        let inner = rest.find('}').map_or(rest, |close| &rest[..close]);
        let attributes = inner
          .split(',')
          .map(str::trim)
          .filter(|attribute| !attribute.is_empty())
          .map(Box::from)
          .collect();
        (text[..open].trim(), attributes)
      }
      None => (text, Vec::new()),
    };

    let segments: Vec<Segment> = if body.starts_with('/') {
      body
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(Segment::parse)
        .collect()
    } else {
      Vec::new()
    };

    let name = match segments.last() {
      Some(Segment::Literal(literal)) => literal.clone(),
      Some(_) => Box::from(""),
      None => Box::from(body),
    };

    let min_depth = segments
      .iter()
      .filter(|segment| !matches!(segment, Segment::Ellipsis))
      .count();

    Self {
      attributes,
      min_depth,
      name,
      segments,
      source: Some(text.into()),
    }
  }

  #[must_use]
  pub fn segments(&self) -> &[Segment] {
    &self.segments
  }

  /// Expression this context was parsed from.
  #[must_use]
  pub fn source(&self) -> Option<&str> {
    self.source.as_deref()
  }
}

impl FromStr for Context {
  type Err = Infallible;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    Ok(Self::parse(Some(text)))
  }
}

/// `Class.method`, `SimpleClass.method` or a bare method name against one
/// frame. A `*` method part matches any method of the class.
fn literal_matches(pattern: &str, class: &str, method: &str) -> bool {
  match pattern.rsplit_once('.') {
    Some((class_part, method_part)) => {
      (method_part == "*" || method_part == method)
        && class_name_matches(class_part, class)
    }
    None => pattern == method,
  }
}

fn class_name_matches(pattern: &str, class: &str) -> bool {
  if pattern == class {
    return true;
  }

  class.len() > pattern.len()
    && class.ends_with(pattern)
    && class.as_bytes()[class.len() - pattern.len() - 1] == b'.'
}
