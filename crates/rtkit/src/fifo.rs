//! Fixed-size circular buffer that overwrites its oldest elements.

/// Circular overwrite buffer with write-relative indexing.
///
/// Index `0` is the slot that will be written next (the oldest element once
/// the buffer has wrapped); `-1` is the most recently written element.
#[derive(Debug, Clone)]
pub struct FifoArray<T> {
    buffer: Vec<T>,
    index: usize,
}

impl<T: Copy + Default> FifoArray<T> {
    /// Creates a buffer of `size` default-initialised elements.
    pub fn new(size: usize) -> Self {
        debug_assert!(size > 0, "fifo size must be positive");
        Self {
            buffer: vec![T::default(); size.max(1)],
            index: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Writes one element, wrapping at the end.
    pub fn push(&mut self, value: T) {
        self.buffer[self.index] = value;
        self.index = (self.index + 1) % self.buffer.len();
    }

    /// Writes a run of elements.
    ///
    /// Input at least as long as the buffer replaces its whole content with
    /// the last `size` elements and resets the write index.
    pub fn push_slice(&mut self, data: &[T]) {
        let size = self.buffer.len();
        if data.len() >= size {
            self.buffer.copy_from_slice(&data[data.len() - size..]);
            self.index = 0;
            return;
        }
        let room = size - self.index;
        if data.len() < room {
            self.buffer[self.index..self.index + data.len()].copy_from_slice(data);
            self.index += data.len();
        } else {
            let (head, tail) = data.split_at(room);
            self.buffer[self.index..].copy_from_slice(head);
            self.buffer[..tail.len()].copy_from_slice(tail);
            self.index = tail.len();
        }
    }

    /// Element at `offset` relative to the write index; negative offsets
    /// count back from the newest element.
    pub fn get(&self, offset: isize) -> T {
        self.buffer[self.wrap(offset)]
    }

    pub fn get_mut(&mut self, offset: isize) -> &mut T {
        let i = self.wrap(offset);
        &mut self.buffer[i]
    }

    /// Rotates the storage so the oldest element comes first.
    pub fn align(&mut self) -> &[T] {
        if self.index != 0 {
            self.buffer.rotate_left(self.index);
            self.index = 0;
        }
        &self.buffer
    }

    /// Raw storage and current write index.
    pub fn raw(&self) -> (&[T], usize) {
        (&self.buffer, self.index)
    }

    /// Resets every element to its default and rewinds the index.
    pub fn clear(&mut self) {
        self.buffer.fill(T::default());
        self.index = 0;
    }

    fn wrap(&self, offset: isize) -> usize {
        let size = self.buffer.len() as isize;
        (self.index as isize + offset).rem_euclid(size) as usize
    }
}
