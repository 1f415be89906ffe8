//! Sequence-keyed circular stores.
//!
//! Both buffers key their slots by `sequence % capacity` and tag each slot
//! with the sequence it currently holds, so lookups are O(1) and stale
//! entries are recognised by a tag mismatch.

/// A fixed-capacity circular store keyed by monotonically growing sequence
/// numbers.
#[derive(Debug)]
pub struct SequenceBuffer<T> {
    slots: Vec<Slot<T>>,
}

#[derive(Debug)]
struct Slot<T> {
    sequence: Option<u32>,
    value: T,
}

impl<T: Default> SequenceBuffer<T> {
    /// Creates a buffer with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sequence buffer capacity must be non-zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            sequence: None,
            value: T::default(),
        });
        Self { slots }
    }

    /// Returns the slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Resets the slot for `sequence` and returns it.
    ///
    /// Whatever the slot held before is discarded.
    pub fn acquire(&mut self, sequence: u32) -> &mut T {
        let idx = sequence as usize % self.slots.len();
        let slot = &mut self.slots[idx];
        slot.sequence = Some(sequence);
        slot.value = T::default();
        &mut slot.value
    }

    /// Returns the slot for `sequence` iff it still holds that sequence.
    #[must_use]
    pub fn try_get(&self, sequence: u32) -> Option<&T> {
        let slot = &self.slots[sequence as usize % self.slots.len()];
        (slot.sequence == Some(sequence)).then_some(&slot.value)
    }

    /// Mutable variant of [`try_get`](Self::try_get).
    pub fn try_get_mut(&mut self, sequence: u32) -> Option<&mut T> {
        let idx = sequence as usize % self.slots.len();
        let slot = &mut self.slots[idx];
        (slot.sequence == Some(sequence)).then_some(&mut slot.value)
    }

    /// Returns `true` if the buffer currently holds `sequence`.
    #[must_use]
    pub fn exists(&self, sequence: u32) -> bool {
        self.try_get(sequence).is_some()
    }

    /// Takes the value for `sequence` out of the buffer, freeing the slot.
    pub fn take(&mut self, sequence: u32) -> Option<T> {
        let idx = sequence as usize % self.slots.len();
        let slot = &mut self.slots[idx];
        if slot.sequence != Some(sequence) {
            return None;
        }
        slot.sequence = None;
        Some(std::mem::take(&mut slot.value))
    }

    /// Takes whatever entry occupies the slot that `sequence` maps to, if it
    /// holds a *different* sequence. Used to surface evictions before reuse.
    pub fn take_evicted(&mut self, sequence: u32) -> Option<(u32, T)> {
        let idx = sequence as usize % self.slots.len();
        let slot = &mut self.slots[idx];
        match slot.sequence {
            Some(old) if old != sequence => {
                slot.sequence = None;
                Some((old, std::mem::take(&mut slot.value)))
            }
            _ => None,
        }
    }

    /// Frees every slot.
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.sequence = None;
            slot.value = T::default();
        }
    }
}

/// A sequence-keyed cache of fixed-size byte payloads with
/// greatest-key-at-or-below lookup.
///
/// Payloads are allocated eagerly at construction, so steady-state inserts
/// are allocation-free. Inserting into an occupied slot evicts whatever was
/// there; with monotonically growing keys that is always the oldest entry
/// mapping to the slot.
#[derive(Debug)]
pub struct SparseSequenceBuffer {
    payload_bytes: usize,
    slots: Vec<SparseSlot>,
    len: usize,
}

#[derive(Debug)]
struct SparseSlot {
    sequence: Option<u32>,
    data: Vec<u8>,
}

impl SparseSequenceBuffer {
    /// Creates a buffer of `capacity` slots of `payload_bytes` each.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, payload_bytes: usize) -> Self {
        assert!(capacity > 0, "sparse buffer capacity must be non-zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || SparseSlot {
            sequence: None,
            data: vec![0u8; payload_bytes],
        });
        Self {
            payload_bytes,
            slots,
            len: 0,
        }
    }

    /// Returns the slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the fixed payload size in bytes.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    /// Returns `true` if no entries are resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Claims the slot for `sequence`, zeroes its payload, and returns it.
    pub fn insert(&mut self, sequence: u32) -> &mut [u8] {
        let idx = sequence as usize % self.slots.len();
        let slot = &mut self.slots[idx];
        if slot.sequence.is_none() {
            self.len += 1;
        }
        slot.sequence = Some(sequence);
        slot.data.fill(0);
        &mut slot.data
    }

    /// Returns the payload stored for exactly `sequence`, if resident.
    #[must_use]
    pub fn get(&self, sequence: u32) -> Option<&[u8]> {
        let slot = &self.slots[sequence as usize % self.slots.len()];
        (slot.sequence == Some(sequence)).then_some(slot.data.as_slice())
    }

    /// Returns the resident payload with the greatest key `≤ sequence`.
    #[must_use]
    pub fn find_max(&self, sequence: u32) -> Option<(u32, &[u8])> {
        let mut best: Option<(u32, &[u8])> = None;
        for slot in &self.slots {
            if let Some(key) = slot.sequence {
                if key <= sequence && best.map_or(true, |(b, _)| key > b) {
                    best = Some((key, slot.data.as_slice()));
                }
            }
        }
        best
    }

    /// Frees every entry; payload allocations are retained.
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.sequence = None;
        }
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_try_get() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(4);
        *buf.acquire(10) = 42;
        assert_eq!(buf.try_get(10), Some(&42));
        assert_eq!(buf.try_get(11), None);
        assert!(buf.exists(10));
    }

    #[test]
    fn acquire_resets_slot() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(4);
        *buf.acquire(2) = 7;
        let fresh = buf.acquire(6); // same slot, new tag
        assert_eq!(*fresh, 0);
        assert_eq!(buf.try_get(2), None);
        assert!(buf.exists(6));
    }

    #[test]
    fn stale_tag_rejected_after_wrap() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(4);
        *buf.acquire(1) = 1;
        *buf.acquire(5) = 5; // evicts 1
        assert_eq!(buf.try_get(1), None);
        assert_eq!(buf.try_get(5), Some(&5));
    }

    #[test]
    fn take_frees_slot() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(4);
        *buf.acquire(3) = 9;
        assert_eq!(buf.take(3), Some(9));
        assert_eq!(buf.take(3), None);
        assert!(!buf.exists(3));
    }

    #[test]
    fn take_evicted_surfaces_old_entry() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(4);
        *buf.acquire(1) = 11;
        assert_eq!(buf.take_evicted(5), Some((1, 11)));
        // Slot now free; nothing further to evict.
        assert_eq!(buf.take_evicted(5), None);
        // Same sequence is not an eviction.
        *buf.acquire(5) = 55;
        assert_eq!(buf.take_evicted(5), None);
    }

    #[test]
    fn clear_all_empties_buffer() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(4);
        *buf.acquire(1) = 1;
        *buf.acquire(2) = 2;
        buf.clear_all();
        assert!(!buf.exists(1));
        assert!(!buf.exists(2));
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn zero_capacity_panics() {
        let _: SequenceBuffer<i32> = SequenceBuffer::new(0);
    }

    #[test]
    fn sparse_insert_and_get() {
        let mut buf = SparseSequenceBuffer::new(4, 8);
        buf.insert(10).copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf.get(10), Some([1, 2, 3, 4, 5, 6, 7, 8].as_slice()));
        assert_eq!(buf.get(11), None);
        assert_eq!(buf.len(), 1);
        assert!(!buf.is_empty());
    }

    #[test]
    fn sparse_insert_zeroes_payload() {
        let mut buf = SparseSequenceBuffer::new(2, 4);
        buf.insert(1).fill(0xFF);
        let fresh = buf.insert(3); // same slot
        assert_eq!(fresh, &[0, 0, 0, 0]);
        assert_eq!(buf.get(1), None);
    }

    #[test]
    fn sparse_find_max_picks_greatest_at_or_below() {
        let mut buf = SparseSequenceBuffer::new(4, 4);
        buf.insert(10)[0] = 10;
        buf.insert(20)[0] = 20;
        buf.insert(30)[0] = 30;

        assert_eq!(buf.find_max(25).map(|(k, _)| k), Some(20));
        assert_eq!(buf.find_max(30).map(|(k, _)| k), Some(30));
        assert_eq!(buf.find_max(9), None);
        let (key, data) = buf.find_max(100).unwrap();
        assert_eq!(key, 30);
        assert_eq!(data[0], 30);
    }

    #[test]
    fn sparse_find_max_after_eviction() {
        let mut buf = SparseSequenceBuffer::new(2, 4);
        buf.insert(1);
        buf.insert(2);
        buf.insert(3); // evicts 1
        assert_eq!(buf.find_max(1), None);
        assert_eq!(buf.find_max(2).map(|(k, _)| k), Some(2));
        assert_eq!(buf.find_max(10).map(|(k, _)| k), Some(3));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn sparse_clear_all_retains_capacity() {
        let mut buf = SparseSequenceBuffer::new(4, 16);
        buf.insert(1);
        buf.insert(2);
        buf.clear_all();
        assert!(buf.is_empty());
        assert_eq!(buf.get(1), None);
        assert_eq!(buf.payload_bytes(), 16);
        assert_eq!(buf.capacity(), 4);
    }
}
