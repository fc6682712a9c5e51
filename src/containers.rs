use super::*;

/// Index of a slot in a [`FrameStack`].
///
/// Handles stay meaningful until the slot they name is popped; a stack never
/// reallocates, so a handle can never point at moved storage.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FrameHandle(usize);

impl FrameHandle {
  #[must_use]
  pub fn index(self) -> usize {
    self.0
  }
}

/// Stack with a capacity fixed at construction.
///
/// The backing storage is reserved up front and `push` refuses to grow it,
/// so pushes and pops never allocate.
#[derive(Debug)]
pub struct FrameStack<T> {
  capacity: usize,
  items: Vec<T>,
}

impl<T> FrameStack<T> {
  #[must_use]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }

  #[must_use]
  pub fn get(&self, handle: FrameHandle) -> Option<&T> {
    self.items.get(handle.0)
  }

  #[must_use]
  pub fn get_mut(&mut self, handle: FrameHandle) -> Option<&mut T> {
    self.items.get_mut(handle.0)
  }

  /// Item `depth` positions below the top; `0` is the top itself.
  #[must_use]
  pub fn get_from_top(&self, depth: usize) -> Option<&T> {
    let index = self.items.len().checked_sub(depth + 1)?;
    self.items.get(index)
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  #[must_use]
  pub fn is_full(&self) -> bool {
    self.items.len() >= self.capacity
  }

  /// Items from the bottom of the stack up.
  pub fn iter(&self) -> std::slice::Iter<'_, T> {
    self.items.iter()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.items.len()
  }

  #[must_use]
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      items: Vec::with_capacity(capacity),
    }
  }

  #[must_use]
  pub fn peek(&self) -> Option<&T> {
    self.items.last()
  }

  #[must_use]
  pub fn peek_mut(&mut self) -> Option<&mut T> {
    self.items.last_mut()
  }

  pub fn pop(&mut self) -> Option<T> {
    self.items.pop()
  }

  /// Push `item`, handing it back when the stack is full.
  ///
  /// # Errors
  ///
  /// Returns the rejected item once `capacity` items are stored.
  pub fn push(&mut self, item: T) -> Result<FrameHandle, T> {
    if self.is_full() {
      return Err(item);
    }

    self.items.push(item);
    Ok(FrameHandle(self.items.len() - 1))
  }

  /// Pop everything above the first `len` items.
  pub fn truncate(&mut self, len: usize) {
    self.items.truncate(len);
  }
}

/// Bounded ring that overwrites its oldest element when full.
#[derive(Debug, Clone)]
pub struct Ring<T> {
  capacity: usize,
  items: VecDeque<T>,
}

impl<T> Ring<T> {
  #[must_use]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }

  /// Element `back` steps before the newest; `0` is the newest.
  #[must_use]
  pub fn get_from_newest(&self, back: usize) -> Option<&T> {
    let index = self.items.len().checked_sub(back + 1)?;
    self.items.get(index)
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  #[must_use]
  pub fn is_full(&self) -> bool {
    self.items.len() >= self.capacity
  }

  /// Elements from oldest to newest.
  pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
    self.items.iter()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.items.len()
  }

  #[must_use]
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);

    Self {
      capacity,
      items: VecDeque::with_capacity(capacity),
    }
  }

  #[must_use]
  pub fn newest(&self) -> Option<&T> {
    self.items.back()
  }

  #[must_use]
  pub fn newest_mut(&mut self) -> Option<&mut T> {
    self.items.back_mut()
  }

  #[must_use]
  pub fn oldest(&self) -> Option<&T> {
    self.items.front()
  }

  /// Append `item`, returning the element it displaced when full.
  pub fn push(&mut self, item: T) -> Option<T> {
    let evicted = if self.is_full() {
      self.items.pop_front()
    } else {
      None
    };

    self.items.push_back(item);
    evicted
  }

  /// Drop all but the `keep` newest elements.
  pub fn retain_newest(&mut self, keep: usize) {
    let excess = self.items.len().saturating_sub(keep);
    self.items.drain(..excess);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_stack_rejects_push_when_full() {
    let mut stack = FrameStack::new(2);
    assert!(stack.push(1).is_ok());
    assert!(stack.push(2).is_ok());
    assert_eq!(stack.push(3), Err(3));
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.capacity(), 2);
  }

  #[test]
  fn frame_stack_handles_address_pushed_items() {
    let mut stack = FrameStack::new(4);
    let first = stack.push("a").unwrap();
    let second = stack.push("b").unwrap();

    if let Some(item) = stack.get_mut(first) {
      *item = "z";
    }

    assert_eq!(stack.get(first), Some(&"z"));
    assert_eq!(stack.get(second), Some(&"b"));
    assert_eq!(stack.get_from_top(0), Some(&"b"));
    assert_eq!(stack.get_from_top(1), Some(&"z"));
    assert_eq!(stack.get_from_top(2), None);

    stack.pop();
    assert!(stack.get(second).is_none());
  }

  #[test]
  fn ring_overwrites_oldest() {
    let mut ring = Ring::new(3);
    assert_eq!(ring.push(1), None);
    assert_eq!(ring.push(2), None);
    assert_eq!(ring.push(3), None);
    assert_eq!(ring.push(4), Some(1));

    assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    assert_eq!(ring.newest(), Some(&4));
    assert_eq!(ring.oldest(), Some(&2));
    assert_eq!(ring.get_from_newest(2), Some(&2));
  }

  #[test]
  fn ring_retain_newest_drops_oldest_first() {
    let mut ring = Ring::new(5);
    for value in 1..=5 {
      ring.push(value);
    }

    ring.retain_newest(2);
    assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![4, 5]);

    ring.retain_newest(10);
    assert_eq!(ring.len(), 2);
  }
}
