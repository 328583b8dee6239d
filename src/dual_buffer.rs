use std::mem;

/// Two banks of the same register: one is read from while the other is written to.
///
/// Writes made during a step only become readable after [`DualBuffer::flip`], so nothing
/// computed in a step can feed back into that same step.
#[derive(Debug, Clone, Default)]
pub struct DualBuffer<T> {
    front: T,
    back: T,
}

impl<T> DualBuffer<T> {
    /// Bank holding the values published by the last flip.
    pub fn front(&self) -> &T {
        &self.front
    }

    /// Bank being filled by the current step.
    pub fn back_mut(&mut self) -> &mut T {
        &mut self.back
    }

    pub fn flip(&mut self) {
        mem::swap(&mut self.front, &mut self.back);
    }
}
