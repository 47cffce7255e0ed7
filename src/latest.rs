//! Single-slot holder for the most recent value of something.

use parking_lot::RwLock;

/// Holds the latest value. Readers get a clone; writers replace the whole slot.
#[derive(Debug)]
pub(crate) struct Latest<T> {
    slot: RwLock<Option<T>>,
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }
}

impl<T: Clone> Latest<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> Option<T> {
        self.slot.read().clone()
    }

    pub(crate) fn set(&self, value: T) {
        *self.slot.write() = Some(value);
    }
}
