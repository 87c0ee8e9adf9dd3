//! Append-only accumulation buffer with a read cursor.

use anyhow::{Result, bail};

use crate::utils::errors::BufferError;

/// Consumed prefixes shorter than this are kept around until the buffer grows.
const MIN_COMPACT_SIZE: usize = 64 * 1024;

#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    start: usize,
    total_added: u64,
    total_consumed: u64,
}

impl ByteBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Appends bytes, reclaiming the consumed prefix when it dominates the
    /// backing store.
    pub fn add(&mut self, bytes: &[u8]) {
        if self.start >= MIN_COMPACT_SIZE && self.start * 2 >= self.data.len() {
            self.compact();
        }

        self.data.extend_from_slice(bytes);
        self.total_added += bytes.len() as u64;
    }

    /// Advances the read cursor by `n` bytes.
    pub fn consumed(&mut self, n: usize) -> Result<()> {
        let available = self.available();
        if n > available {
            bail!(BufferError::ConsumedPastEnd {
                requested: n,
                available,
            });
        }

        self.start += n;
        self.total_consumed += n as u64;
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }

        Ok(())
    }

    /// Unconsumed bytes.
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data[self.start..]
    }

    #[inline(always)]
    pub fn available(&self) -> usize {
        self.data.len() - self.start
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Stream offset of the first unconsumed byte.
    pub fn position(&self) -> u64 {
        self.total_consumed
    }

    pub fn total_added(&self) -> u64 {
        self.total_added
    }

    pub fn clear(&mut self) {
        self.total_consumed += self.available() as u64;
        self.data.clear();
        self.start = 0;
    }

    fn compact(&mut self) {
        self.data.drain(..self.start);
        self.start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_consume() -> Result<()> {
        let mut buffer = ByteBuffer::default();
        buffer.add(&[1, 2, 3, 4]);
        buffer.consumed(3)?;
        assert_eq!(buffer.data(), &[4]);
        assert_eq!(buffer.position(), 3);

        buffer.add(&[5, 6]);
        assert_eq!(buffer.data(), &[4, 5, 6]);
        assert_eq!(buffer.total_added(), 6);

        assert!(buffer.consumed(4).is_err());
        buffer.consumed(3)?;
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn compaction_keeps_unconsumed_bytes() -> Result<()> {
        let mut buffer = ByteBuffer::with_capacity(16);
        let chunk = vec![0xAA; MIN_COMPACT_SIZE];
        buffer.add(&chunk);
        buffer.add(&[1, 2, 3]);
        buffer.consumed(MIN_COMPACT_SIZE + 1)?;

        buffer.add(&[4]);
        assert_eq!(buffer.data(), &[2, 3, 4]);
        assert_eq!(buffer.position(), MIN_COMPACT_SIZE as u64 + 1);
        Ok(())
    }
}
