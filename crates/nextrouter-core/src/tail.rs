use std::collections::VecDeque;

/// Bounded ring holding the trailing bytes of a stream, read back once at
/// finalization for best-effort metrics extraction.
#[derive(Debug)]
pub struct TailBuffer {
    cap: usize,
    buf: VecDeque<u8>,
}

impl TailBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            buf: VecDeque::with_capacity(cap.min(64 * 1024)),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.cap {
            self.buf.clear();
            self.buf.extend(&chunk[chunk.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend(chunk);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_tail() {
        let mut tail = TailBuffer::new(8);
        tail.push(b"0123456789");
        assert_eq!(tail.into_bytes(), b"23456789");
    }

    #[test]
    fn accumulates_under_cap() {
        let mut tail = TailBuffer::new(16);
        tail.push(b"abc");
        tail.push(b"def");
        assert_eq!(tail.len(), 6);
        assert_eq!(tail.into_bytes(), b"abcdef");
    }

    #[test]
    fn rolling_overflow() {
        let mut tail = TailBuffer::new(4);
        tail.push(b"ab");
        tail.push(b"cd");
        tail.push(b"ef");
        assert_eq!(tail.into_bytes(), b"cdef");
    }
}
