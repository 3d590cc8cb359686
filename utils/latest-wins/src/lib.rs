//! A single-slot latest-wins buffer.
//!
//! A `put` replaces any value that has not been read yet; a `take`
//! atomically consumes and clears the slot. This is the hand-off primitive
//! between a fast producer and a slower consumer when only the most recent
//! value matters (frame receiver to frame processor, executor result to
//! polling loop).

use std::sync::Arc;

use parking_lot::Mutex;

pub struct LatestValue<T>(Arc<Mutex<Option<T>>>);

impl<T> LatestValue<T> {
    pub fn new() -> Self {
        LatestValue(Arc::new(Mutex::new(None)))
    }

    /// Store `value`, discarding any unread predecessor. Returns true if a
    /// previous value was replaced.
    #[inline]
    pub fn put(&self, value: T) -> bool {
        self.0.lock().replace(value).is_some()
    }

    /// Consume and clear the slot.
    #[inline]
    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_none()
    }
}

impl<T> Default for LatestValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for LatestValue<T> {
    #[inline]
    fn clone(&self) -> Self {
        LatestValue(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_replaces_unread_value() {
        let slot = LatestValue::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn clones_share_the_slot() {
        let a = LatestValue::new();
        let b = a.clone();
        a.put("x");
        assert_eq!(b.take(), Some("x"));
        assert!(a.is_empty());
    }
}
