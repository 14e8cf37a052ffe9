//! Tracks the buffer that belongs to each posted ring slot.

use alloc::vec::Vec;

/// A fixed-capacity table with one entry per ring slot.
///
/// A slot is occupied exactly while its descriptor is posted to the NIC.
/// Posting into a slot that is still occupied is refused, so a buffer can never be tracked twice.
pub struct SlotTable<T> {
    slots: Vec<Option<T>>,
    occupied: usize,
}

impl<T> SlotTable<T> {
    /// Creates a table of `capacity` empty slots. `capacity` must be a power of two.
    pub fn new(capacity: usize) -> SlotTable<T> {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        SlotTable { slots, occupied: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// The slot that a ring counter refers to.
    pub fn index_of(&self, counter: u32) -> usize {
        counter as usize & (self.slots.len().wrapping_sub(1))
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Stores `value` in slot `index`.
    /// If the slot is out of range or already occupied, the value is handed back in the error.
    pub fn insert(&mut self, index: usize, value: T) -> Result<(), T> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(value);
                self.occupied += 1;
                Ok(())
            }
            _ => Err(value),
        }
    }

    /// Empties slot `index` and returns what was in it.
    pub fn take(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.occupied -= 1;
        Some(value)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    /// Empties every slot, returning the values that were in them.
    pub fn drain(&mut self) -> Vec<T> {
        self.occupied = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

impl<T> core::fmt::Debug for SlotTable<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied)
            .finish()
    }
}
