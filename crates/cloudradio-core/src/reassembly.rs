//! Chunk reassembly.
//!
//! Network downloads arrive in chunks whose sizes have nothing to do with the
//! item size. Reassembly prepends the bytes left over from the previous
//! chunk, emits every whole item and keeps the trailing partial item as the
//! new residue (`0 <= residue.len() < item_size`).

use bytes::{Bytes, BytesMut};

/// Prepend `residue` to `chunk`, split off whole items.
///
/// Returns `(items, new_residue)` where `items.len()` is a multiple of
/// `item_size` and `new_residue.len() < item_size`.
pub fn reassemble(chunk: Bytes, residue: &[u8], item_size: usize) -> (Bytes, Bytes) {
    debug_assert!(item_size > 0);

    let mut joined = if residue.is_empty() {
        chunk
    } else {
        let mut buf = BytesMut::with_capacity(residue.len() + chunk.len());
        buf.extend_from_slice(residue);
        buf.extend_from_slice(&chunk);
        buf.freeze()
    };

    let whole = joined.len() - joined.len() % item_size;
    let items = joined.split_to(whole);
    (items, joined)
}

/// Stateful reassembler that carries the residue between chunks.
#[derive(Debug, Clone)]
pub struct ChunkReassembler {
    item_size: usize,
    residue: Bytes,
}

impl ChunkReassembler {
    pub fn new(item_size: usize) -> Self {
        Self {
            item_size: item_size.max(1),
            residue: Bytes::new(),
        }
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Feed one chunk; returns the whole items it completes (possibly empty).
    pub fn push(&mut self, chunk: Bytes) -> Bytes {
        let (items, residue) = reassemble(chunk, &self.residue, self.item_size);
        self.residue = residue;
        items
    }

    pub fn residue(&self) -> &[u8] {
        &self.residue
    }

    /// Drop any carried bytes, e.g. when the download restarts.
    pub fn reset(&mut self) {
        self.residue = Bytes::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ten_then_six_bytes_of_eight_byte_items() {
        let data: Vec<u8> = (0u8..16).collect();
        let mut r = ChunkReassembler::new(8);

        let first = r.push(Bytes::copy_from_slice(&data[..10]));
        assert_eq!(first.len(), 8);
        assert_eq!(&first[..], &data[..8]);
        assert_eq!(r.residue(), &data[8..10]);

        let second = r.push(Bytes::copy_from_slice(&data[10..]));
        assert_eq!(second.len(), 8);
        assert_eq!(&second[..], &data[8..16]);
        assert!(r.residue().is_empty());
    }

    #[test]
    fn test_chunk_smaller_than_item() {
        let mut r = ChunkReassembler::new(8);
        assert!(r.push(Bytes::from_static(&[1, 2, 3])).is_empty());
        assert!(r.push(Bytes::from_static(&[4, 5, 6])).is_empty());
        assert_eq!(r.residue(), &[1, 2, 3, 4, 5, 6]);
        let items = r.push(Bytes::from_static(&[7, 8, 9]));
        assert_eq!(&items[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(r.residue(), &[9]);
    }

    #[test]
    fn test_empty_chunk_keeps_residue() {
        let mut r = ChunkReassembler::new(4);
        r.push(Bytes::from_static(&[1, 2]));
        assert!(r.push(Bytes::new()).is_empty());
        assert_eq!(r.residue(), &[1, 2]);
    }

    #[test]
    fn test_aligned_chunk_is_zero_copy() {
        let chunk = Bytes::from(vec![0u8; 64]);
        let ptr = chunk.as_ptr();
        let (items, residue) = reassemble(chunk, &[], 8);
        assert_eq!(items.as_ptr(), ptr);
        assert!(residue.is_empty());
    }

    #[test]
    fn test_reset_drops_residue() {
        let mut r = ChunkReassembler::new(4);
        r.push(Bytes::from_static(&[1, 2, 3]));
        r.reset();
        assert!(r.residue().is_empty());
        assert_eq!(&r.push(Bytes::from_static(&[9, 9, 9, 9]))[..], &[9, 9, 9, 9]);
    }

    proptest! {
        #[test]
        fn prop_any_chunking_yields_same_items(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            cuts in proptest::collection::vec(0usize..512, 0..16),
            item_size in 1usize..17,
        ) {
            let mut bounds: Vec<usize> = cuts.into_iter().map(|c| c % (data.len() + 1)).collect();
            bounds.push(0);
            bounds.push(data.len());
            bounds.sort_unstable();

            let mut r = ChunkReassembler::new(item_size);
            let mut out = Vec::new();
            for pair in bounds.windows(2) {
                let items = r.push(Bytes::copy_from_slice(&data[pair[0]..pair[1]]));
                prop_assert_eq!(items.len() % item_size, 0);
                prop_assert!(r.residue().len() < item_size);
                out.extend_from_slice(&items);
            }

            prop_assert_eq!(out.len(), (data.len() / item_size) * item_size);
            prop_assert_eq!(r.residue().len(), data.len() % item_size);

            out.extend_from_slice(r.residue());
            prop_assert_eq!(out, data);
        }
    }
}
