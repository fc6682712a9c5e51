use super::*;

/// Failures reported by [`IdentityTable`](crate::IdentityTable).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum TableError {
  #[error("hash table is corrupted, further inserts are refused")]
  Corrupted,
  #[error("identity key 0 is reserved for empty slots")]
  ReservedKey,
}

/// Errors surfaced by registry, configuration, command and export paths.
///
/// Event handlers never return these; they log them and degrade to an
/// [`EventStatus`](crate::EventStatus).
#[derive(Debug, Error)]
pub enum ProfilerError {
  #[error("invalid argument for `{command}`: {reason}")]
  InvalidArgument {
    command: &'static str,
    reason: String,
  },
  #[error("invalid value `{value}` for property `{key}`")]
  InvalidProperty { key: String, value: String },
  #[error("i/o error during export: {0}")]
  Io(#[from] io::Error),
  #[error("failed to encode report as json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("malformed property line `{0}`")]
  MalformedProperty(String),
  #[error("call stack is full at {capacity} frames")]
  StackOverflow { capacity: usize },
  #[error(transparent)]
  Table(#[from] TableError),
  #[error("unknown class `{0}`")]
  UnknownClass(String),
  #[error("unknown column `{0}`")]
  UnknownColumn(String),
  #[error("unknown command `{0}`")]
  UnknownCommand(String),
  #[error("unknown method {0}")]
  UnknownMethod(MethodId),
  #[error("unknown property `{0}`")]
  UnknownProperty(String),
}

pub type Result<T, E = ProfilerError> = std::result::Result<T, E>;
