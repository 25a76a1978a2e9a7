//! Fixed-size batching of decoded records

/// Push buffer that hands out a full batch every `size` records.
///
/// Order is preserved and nothing is dropped: [`RecordBatcher::finish`]
/// returns the short final batch.
#[derive(Debug)]
pub struct RecordBatcher<T> {
    size: usize,
    pending: Vec<T>,
}

impl<T> RecordBatcher<T> {
    /// A `size` of zero is treated as one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { size, pending: Vec::with_capacity(size) }
    }

    /// Add a record, returning a batch once `size` records are pending.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.pending.push(item);
        if self.pending.len() >= self.size {
            Some(std::mem::replace(&mut self.pending, Vec::with_capacity(self.size)))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whatever remains, if anything
    pub fn finish(self) -> Option<Vec<T>> {
        (!self.pending.is_empty()).then_some(self.pending)
    }
}
