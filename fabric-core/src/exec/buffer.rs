//! Bounded output buffer: keeps only the last `max_bytes`, silently
//! dropping earlier bytes so long-running command output can't exhaust
//! memory (§4.1).

use std::collections::VecDeque;

/// Default retained tail for the Remote Exec Layer (§4.1).
pub const DEFAULT_MAX_BYTES: usize = 256 * 1024;

/// Retained tail for the §7 error-body contract ("last 120 000 bytes").
pub const ERROR_BODY_MAX_BYTES: usize = 120_000;

/// A ring buffer over bytes that keeps only the most recent `max_bytes`.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    data: VecDeque<u8>,
    max_bytes: usize,
    truncated: bool,
}

impl BoundedBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(max_bytes.min(64 * 1024)),
            max_bytes,
            truncated: false,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.max_bytes {
            self.data.clear();
            self.data.extend(bytes[bytes.len() - self.max_bytes..].iter().copied());
            self.truncated = true;
            return;
        }
        self.data.extend(bytes.iter().copied());
        while self.data.len() > self.max_bytes {
            self.data.pop_front();
            self.truncated = true;
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.to_vec()).into_owned()
    }
}

impl Default for BoundedBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_input_is_retained_whole() {
        let mut buf = BoundedBuffer::new(16);
        buf.append(b"hello");
        assert_eq!(buf.to_string_lossy(), "hello");
        assert!(!buf.truncated());
    }

    #[test]
    fn overflow_keeps_only_the_tail() {
        let mut buf = BoundedBuffer::new(5);
        buf.append(b"abcdefgh");
        assert_eq!(buf.to_string_lossy(), "defgh");
        assert!(buf.truncated());
    }

    #[test]
    fn incremental_appends_respect_the_bound() {
        let mut buf = BoundedBuffer::new(5);
        for _ in 0..10 {
            buf.append(b"xy");
        }
        assert_eq!(buf.len(), 5);
        assert!(buf.truncated());
    }

    #[test]
    fn empty_buffer_is_empty() {
        let buf = BoundedBuffer::new(10);
        assert!(buf.is_empty());
    }
}
