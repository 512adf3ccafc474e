//! FIFO batching of converted records.

use crate::record::ConvertedRecord;

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The buffer reached the send size.
    Full,
    /// The run is draining; a short batch goes out as-is.
    Final,
}

/// Buffers converted records and yields batches of `send_size`.
#[derive(Debug)]
pub struct Batcher {
    send_size: usize,
    buffer: Vec<ConvertedRecord>,
    flushed: usize,
}

impl Batcher {
    /// Create a batcher. A zero send size is treated as one.
    #[must_use]
    pub fn new(send_size: usize) -> Self {
        let send_size = send_size.max(1);
        Self {
            send_size,
            buffer: Vec::with_capacity(send_size),
            flushed: 0,
        }
    }

    /// Add a record. Returns a full batch when the threshold is reached.
    pub fn push(&mut self, record: ConvertedRecord) -> Option<(Vec<ConvertedRecord>, FlushReason)> {
        self.buffer.push(record);
        if self.buffer.len() >= self.send_size {
            return Some((self.take(), FlushReason::Full));
        }
        None
    }

    /// Take whatever is buffered at the end of the run.
    pub fn finish(&mut self) -> Option<(Vec<ConvertedRecord>, FlushReason)> {
        if self.buffer.is_empty() {
            return None;
        }
        Some((self.take(), FlushReason::Final))
    }

    fn take(&mut self) -> Vec<ConvertedRecord> {
        self.flushed += 1;
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.send_size))
    }

    /// Records currently buffered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Batches produced so far.
    #[must_use]
    pub fn flushed(&self) -> usize {
        self.flushed
    }
}
