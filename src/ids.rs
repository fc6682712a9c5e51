use super::*;

macro_rules! identity {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct $name(pub u64);

    impl $name {
      /// Raw hash-table key for this identity.
      #[must_use]
      pub const fn key(self) -> u64 {
        self.0
      }

      /// Zero is reserved as the empty-slot marker and never names anything.
      #[must_use]
      pub const fn is_valid(self) -> bool {
        self.0 != 0
      }
    }

    impl From<u64> for $name {
      fn from(value: u64) -> Self {
        Self(value)
      }
    }

    impl Display for $name {
      fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
      }
    }
  };
}

identity!(
  /// Opaque host handle naming a method.
  MethodId
);

identity!(
  /// Opaque host tag naming a loaded class.
  ClassId
);

identity!(
  /// Opaque host handle naming a field.
  FieldId
);

identity!(
  /// Opaque host handle naming a runtime thread.
  ThreadId
);

/// Clock reading supplied with every timed event, in microseconds.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Timestamp {
  pub cpu_us: u64,
  pub wall_us: u64,
}

impl Timestamp {
  #[must_use]
  pub const fn new(cpu_us: u64, wall_us: u64) -> Self {
    Self { cpu_us, wall_us }
  }

  /// CPU and wall-clock micros elapsed since `earlier`, clamped at zero.
  #[must_use]
  pub const fn since(self, earlier: Timestamp) -> (u64, u64) {
    (
      self.cpu_us.saturating_sub(earlier.cpu_us),
      self.wall_us.saturating_sub(earlier.wall_us),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_identity_is_invalid() {
    assert!(!MethodId(0).is_valid());
    assert!(ClassId(7).is_valid());
    assert_eq!(ThreadId::from(9).key(), 9);
  }

  #[test]
  fn timestamp_delta_saturates() {
    let earlier = Timestamp::new(1_000, 2_000);
    let later = Timestamp::new(1_500, 3_600);

    assert_eq!(later.since(earlier), (500, 1_600));
    assert_eq!(earlier.since(later), (0, 0));
  }
}
