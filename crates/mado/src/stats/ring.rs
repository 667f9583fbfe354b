/// Fixed-capacity circular buffer. Pushing into a full buffer overwrites the oldest value.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Index of the oldest value once the buffer is full
    next: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    /// Returns the overwritten value, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(value);
            return None;
        }

        let evicted = std::mem::replace(&mut self.slots[self.next], value);
        self.next = (self.next + 1) % self.capacity;
        Some(evicted)
    }

    /// Values from the oldest to the newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots[self.next..]
            .iter()
            .chain(self.slots[..self.next].iter())
    }
}

impl RingBuffer<f64> {
    pub fn mean(&self) -> Option<f64> {
        if self.slots.is_empty() {
            return None;
        }
        Some(self.slots.iter().sum::<f64>() / self.slots.len() as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.slots.iter().copied().reduce(f64::max)
    }
}
