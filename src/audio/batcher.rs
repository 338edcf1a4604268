// Frame batcher for the session sender
//
// Capture chunks are small (one device callback each). Sending each one as
// its own network message wastes per-message overhead, so the sender
// accumulates them until a minimum frame size is reached. When the capture
// queue runs dry the partial buffer is flushed right away so latency stays
// bounded during silence or slow capture.

/// Accumulates capture chunks into transmit frames of at least `threshold` bytes.
#[derive(Debug)]
pub struct FrameBatcher {
    buffer: Vec<u8>,
    threshold: usize,
}

impl FrameBatcher {
    pub fn new(threshold: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(threshold * 2),
            threshold,
        }
    }

    /// Append a chunk. Returns a complete frame once the buffer has reached
    /// the threshold; the whole buffer is taken, so frames may exceed it.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() >= self.threshold {
            Some(self.take())
        } else {
            None
        }
    }

    /// Take whatever is pending (idle flush). `None` when nothing is buffered.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.threshold * 2))
    }
}
