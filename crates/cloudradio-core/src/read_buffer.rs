use bytes::Bytes;

/// Whole items from one reassembly pass, served through an advancing cursor.
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    data: Bytes,
    cursor: usize,
    item_size: usize,
}

impl ReadBuffer {
    pub fn new(item_size: usize) -> Self {
        Self {
            data: Bytes::new(),
            cursor: 0,
            item_size: item_size.max(1),
        }
    }

    /// Items not yet served.
    pub fn remaining(&self) -> usize {
        (self.data.len() - self.cursor) / self.item_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Copy up to `out.len() / item_size` items into `out`. Returns the number
    /// of items written.
    pub fn fill(&mut self, out: &mut [u8]) -> usize {
        let n = (out.len() / self.item_size).min(self.remaining());
        let bytes = n * self.item_size;
        out[..bytes].copy_from_slice(&self.data[self.cursor..self.cursor + bytes]);
        self.cursor += bytes;
        n
    }

    /// Swap in the next array of items and reset the cursor.
    pub fn replace(&mut self, data: Bytes) {
        debug_assert_eq!(data.len() % self.item_size, 0);
        self.data = data;
        self.cursor = 0;
    }

    pub fn clear(&mut self) {
        self.replace(Bytes::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_exhausted() {
        let buf = ReadBuffer::new(4);
        assert!(buf.is_exhausted());
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_fill_advances_cursor() {
        let mut buf = ReadBuffer::new(2);
        buf.replace(Bytes::from_static(&[1, 2, 3, 4, 5, 6]));

        let mut out = [0u8; 4];
        assert_eq!(buf.fill(&mut out), 2);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(buf.remaining(), 1);

        assert_eq!(buf.fill(&mut out), 1);
        assert_eq!(&out[..2], &[5, 6]);
        assert!(buf.is_exhausted());
        assert_eq!(buf.fill(&mut out), 0);
    }

    #[test]
    fn test_fill_ignores_trailing_partial_output_slot() {
        let mut buf = ReadBuffer::new(4);
        buf.replace(Bytes::from_static(&[1, 1, 1, 1, 2, 2, 2, 2]));
        let mut out = [0u8; 7];
        assert_eq!(buf.fill(&mut out), 1);
        assert_eq!(buf.remaining(), 1);
    }

    #[test]
    fn test_replace_resets_cursor() {
        let mut buf = ReadBuffer::new(1);
        buf.replace(Bytes::from_static(&[1, 2]));
        let mut out = [0u8; 2];
        buf.fill(&mut out);
        buf.replace(Bytes::from_static(&[3]));
        assert_eq!(buf.remaining(), 1);
        buf.clear();
        assert!(buf.is_exhausted());
    }
}
