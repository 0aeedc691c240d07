//! Read-only publication of core state.
//!
//! The core is the single writer; collaborators on other threads load the
//! latest published value without taking a lock.

use arc_swap::ArcSwap;
use std::sync::Arc;

pub struct SnapshotCell<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(value)),
        }
    }

    pub fn publish(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    pub fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }
}

impl<T> Clone for SnapshotCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmotionalState;

    #[test]
    fn test_clones_observe_publications() {
        let writer = SnapshotCell::new(EmotionalState::default());
        let reader = writer.clone();

        writer.publish(EmotionalState {
            cycle: 9,
            ..Default::default()
        });
        assert_eq!(reader.load().cycle, 9);
    }

    #[test]
    fn test_loaded_snapshot_is_stable() {
        let cell = SnapshotCell::new(1u32);
        let held = cell.load();
        cell.publish(2);
        assert_eq!(*held, 1);
        assert_eq!(*cell.load(), 2);
    }
}
