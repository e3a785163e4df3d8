//! Ring Buffer Implementation

/// Default buffer capacity (180 frames = ~6 s at 30 fps)
pub const DEFAULT_CAPACITY: usize = 180;

/// Fixed-capacity ring buffer; pushing into a full buffer drops the oldest item
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// Backing storage, grows up to `capacity` then is reused in place
    storage: Vec<T>,
    /// Capacity of the buffer
    capacity: usize,
    /// Next write position (also the oldest item once full)
    head: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    /// Create a buffer with default capacity (180 items)
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Push an item into the buffer (overwrites oldest if full)
    pub fn push(&mut self, item: T) {
        if self.storage.len() < self.capacity {
            self.storage.push(item);
        } else {
            self.storage[self.head] = item;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    /// Get the number of items currently in the buffer
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.storage.len() == self.capacity
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate from oldest to most recent
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        // Before the first wrap `head == len`, so the first slice is empty.
        let split = if self.is_full() { self.head } else { self.storage.len() };
        self.storage[split..].iter().chain(self.storage[..split].iter())
    }

    /// Most recently pushed item
    pub fn last(&self) -> Option<&T> {
        self.iter().next_back()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.storage.clear();
        self.head = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Read the last N items in chronological order (oldest first)
    pub fn tail(&self, count: usize) -> Vec<T> {
        let skip = self.len().saturating_sub(count);
        self.iter().skip(skip).cloned().collect()
    }

    /// Copy the whole buffer in chronological order
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_and_read() {
        let mut buffer = RingBuffer::new(10);

        for i in 0..5u32 {
            buffer.push(i * 100);
        }

        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.tail(2), vec![300, 400]);
        assert_eq!(buffer.tail(9), vec![0, 100, 200, 300, 400]);
        assert_eq!(buffer.last(), Some(&400));
    }

    #[test]
    fn test_overwrite_oldest() {
        let mut buffer = RingBuffer::new(5);

        // Fill beyond capacity
        for i in 0..12u32 {
            buffer.push(i);
        }

        assert_eq!(buffer.len(), 5);
        assert!(buffer.is_full());
        assert_eq!(buffer.to_vec(), vec![7, 8, 9, 10, 11]);
        assert_eq!(buffer.last(), Some(&11));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = RingBuffer::new(0);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.to_vec(), vec![2]);
    }

    #[test]
    fn test_clear_resets_order() {
        let mut buffer = RingBuffer::new(3);
        for i in 0..7 {
            buffer.push(i);
        }
        buffer.clear();
        assert!(buffer.is_empty());

        buffer.push(42);
        buffer.push(43);
        assert_eq!(buffer.to_vec(), vec![42, 43]);
    }

    proptest! {
        #[test]
        fn keeps_most_recent_items(capacity in 1usize..64, values in proptest::collection::vec(any::<i32>(), 0..200)) {
            let mut buffer = RingBuffer::new(capacity);
            for v in &values {
                buffer.push(*v);
            }

            let expected_len = values.len().min(capacity);
            prop_assert_eq!(buffer.len(), expected_len);
            prop_assert_eq!(buffer.to_vec(), values[values.len() - expected_len..].to_vec());
        }
    }
}
