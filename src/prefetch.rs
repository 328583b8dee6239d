use std::collections::VecDeque;

/// Shift register in front of a lane's [`RingBuffer`](crate::ring_buffer::RingBuffer).
///
/// Holds the newest elements of a lane, which a comparison cycle reads first, so they can be
/// compared before they are committed to the ring. Once `depth` elements are held the window
/// is primed, and each further shift pushes the oldest element out so the caller can commit
/// it to the ring.
#[derive(Debug, Clone)]
pub struct PrefetchWindow<T> {
    window: VecDeque<T>,
    depth: usize,
}

impl<T> PrefetchWindow<T> {
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "prefetch depth must be > 0");
        Self {
            window: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// True once the window holds `depth` elements.
    pub fn is_primed(&self) -> bool {
        self.window.len() == self.depth
    }

    /// Shifts `value` in and returns the element that fell out of the far end, if any.
    pub fn shift(&mut self, value: T) -> Option<T> {
        let out = if self.is_primed() {
            self.window.pop_front()
        } else {
            None
        };
        self.window.push_back(value);
        debug_assert!(self.window.len() <= self.depth);
        out
    }

    pub fn oldest(&self) -> Option<&T> {
        self.window.front()
    }

    pub fn take_oldest(&mut self) -> Option<T> {
        self.window.pop_front()
    }

    /// Element `index`, counted from the oldest.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.window.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.window.get_mut(index)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.window.iter()
    }
}
