//! Fixed-capacity circular buffer holding the candidates of one lane.
//!
//! # Invariants
//! - `head < capacity` and `len <= capacity`.
//! - Slots in the logical range `[head, head + len)` (wrapping) are `Some`, all others `None`.
//! - Storage is allocated once in [`RingBuffer::new`] and never grows.

/// Circular FIFO with a capacity chosen at construction.
///
/// Pushing into a full buffer is not an error: the oldest element is evicted and handed back
/// to the caller, which decides whether it still matters.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be > 0");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn fill_level(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    #[inline]
    fn physical(&self, logical: usize) -> usize {
        debug_assert!(logical < self.capacity());
        let idx = self.head + logical;
        if idx >= self.capacity() {
            idx - self.capacity()
        } else {
            idx
        }
    }

    /// Appends `value` as the newest element. Returns the evicted oldest element if the buffer
    /// was full, `None` otherwise.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.is_full() {
            self.pop_front()
        } else {
            None
        };
        let tail = self.physical(self.len);
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(value);
        self.len += 1;
        debug_assert!(self.len <= self.capacity());
        evicted
    }

    /// Removes and returns the oldest element.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.slots[self.head].take();
        debug_assert!(value.is_some());
        self.head = self.physical(1 % self.capacity());
        self.len -= 1;
        if self.len == 0 {
            self.head = 0;
        }
        value
    }

    /// Removes and returns the most recently inserted element.
    pub fn pop_reverse(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let idx = self.physical(self.len - 1);
        let value = self.slots[idx].take();
        debug_assert!(value.is_some());
        self.len -= 1;
        if self.len == 0 {
            self.head = 0;
        }
        value
    }

    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            self.slots[self.head].as_ref()
        }
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (wrapped, leading) = self.slots.split_at(self.head);
        leading
            .iter()
            .chain(wrapped.iter())
            .take(self.len)
            .filter_map(Option::as_ref)
    }

    /// Element `index`, counted from the oldest.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[self.physical(index)].as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        let idx = self.physical(index);
        self.slots[idx].as_mut()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }
}
