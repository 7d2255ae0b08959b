//! Upload Window
//!
//! Accumulates a fixed number of items (`block_len`) across work calls and
//! hands the full window to the upload queue in one piece.
//!
//! ## Lifecycle of a window
//!
//! ```text
//! filling ──(block_len reached)──► sealed ──(try_push ok)──► queued
//!    ▲                               │                          │
//!    │                          (queue full)                    │
//!    │                               ▼                          │
//!    │                    retained, re-offered                  │
//!    │                    on the next call                      │
//!    └──────────── fresh zeroed buffer ◄────────────────────────┘
//! ```
//!
//! A sealed window is frozen into [`Bytes`]. Once it is pushed the window
//! side holds no reference to it, so the transfer side owns it exclusively.
//! While a sealed window waits for queue space, [`UploadWindow::accumulate`]
//! consumes nothing: the caller's input stays with the caller.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::queue::{QueueSender, TryPush};

/// Result of [`UploadWindow::enqueue_if_full`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The window still has room; nothing was pushed.
    NotFull,
    /// The full window moved to the queue and a fresh window took its place.
    Enqueued,
    /// The queue had no room; the full window is retained.
    QueueFull,
}

#[derive(Debug)]
pub struct UploadWindow {
    block_len: usize,
    item_size: usize,
    buf: BytesMut,
    filled: usize,
    sealed: Option<Bytes>,
}

impl UploadWindow {
    pub fn new(block_len: usize, item_size: usize) -> Result<Self> {
        if block_len == 0 {
            return Err(Error::Config("block_len must be at least 1".to_string()));
        }
        if item_size == 0 {
            return Err(Error::Config("item size must be at least 1 byte".to_string()));
        }
        let bytes = block_len
            .checked_mul(item_size)
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or_else(|| {
                Error::Config(format!(
                    "block_len {} of {}-byte items does not fit in memory",
                    block_len, item_size
                ))
            })?;
        Ok(Self {
            block_len,
            item_size,
            buf: BytesMut::zeroed(bytes),
            filled: 0,
            sealed: None,
        })
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Items currently held, counting a sealed window as `block_len`.
    pub fn len(&self) -> usize {
        if self.sealed.is_some() {
            self.block_len
        } else {
            self.filled
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.sealed.is_some()
    }

    /// Free item slots in the current window.
    pub fn remaining(&self) -> usize {
        self.block_len - self.len()
    }

    /// Copy as many items from `input` as fit into the window.
    ///
    /// `input` must hold whole items. Returns the number of items consumed,
    /// which is `min(remaining, input items)` and may be zero.
    pub fn accumulate(&mut self, input: &[u8]) -> Result<usize> {
        if input.len() % self.item_size != 0 {
            return Err(Error::PartialItem {
                len: input.len(),
                item_size: self.item_size,
            });
        }

        let available = input.len() / self.item_size;
        let n = self.remaining().min(available);
        if n == 0 {
            return Ok(0);
        }

        let start = self.filled * self.item_size;
        let end = start + n * self.item_size;
        self.buf[start..end].copy_from_slice(&input[..n * self.item_size]);
        self.filled += n;

        if self.filled == self.block_len {
            let full = std::mem::take(&mut self.buf).freeze();
            self.sealed = Some(full);
            self.filled = 0;
        }

        Ok(n)
    }

    /// Offer the window to `queue` if it is full, without waiting.
    pub fn enqueue_if_full(&mut self, queue: &QueueSender<Bytes>) -> Result<Enqueue> {
        let Some(window) = self.sealed.take() else {
            return Ok(Enqueue::NotFull);
        };

        match queue.try_push(window)? {
            TryPush::Pushed => {
                self.buf = BytesMut::zeroed(self.block_len * self.item_size);
                Ok(Enqueue::Enqueued)
            }
            TryPush::Full(window) => {
                self.sealed = Some(window);
                Ok(Enqueue::QueueFull)
            }
        }
    }

    /// Take whatever the window holds (full or partial) and start over with a
    /// fresh window. `None` when the window is empty.
    ///
    /// Used at shutdown, where the remainder must be staged even if it is
    /// shorter than `block_len`.
    pub fn take_remaining(&mut self) -> Option<Bytes> {
        if let Some(window) = self.sealed.take() {
            self.buf = BytesMut::zeroed(self.block_len * self.item_size);
            return Some(window);
        }
        if self.filled == 0 {
            return None;
        }

        let mut partial = std::mem::replace(
            &mut self.buf,
            BytesMut::zeroed(self.block_len * self.item_size),
        );
        partial.truncate(self.filled * self.item_size);
        self.filled = 0;
        Some(partial.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::bounded;

    fn items(range: std::ops::Range<u32>) -> Vec<u8> {
        range.flat_map(|i| i.to_le_bytes()).collect()
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(UploadWindow::new(0, 4).is_err());
        assert!(UploadWindow::new(4, 0).is_err());
    }

    #[test]
    fn test_rejects_oversized_window() {
        let err = UploadWindow::new(1 << 62, 4).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(matches!(
            UploadWindow::new(usize::MAX / 2 + 1, 1).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn test_accumulate_partial_copy() {
        let mut window = UploadWindow::new(4, 4).unwrap();
        assert_eq!(window.accumulate(&items(0..3)).unwrap(), 3);
        assert_eq!(window.len(), 3);
        assert_eq!(window.remaining(), 1);

        // Only one slot left: one of the two items is consumed.
        assert_eq!(window.accumulate(&items(3..5)).unwrap(), 1);
        assert!(window.is_full());
        assert_eq!(window.remaining(), 0);
    }

    #[test]
    fn test_accumulate_rejects_split_item() {
        let mut window = UploadWindow::new(4, 4).unwrap();
        let err = window.accumulate(&[0u8; 6]).unwrap_err();
        assert!(matches!(err, Error::PartialItem { len: 6, item_size: 4 }));
        assert!(window.is_empty());
    }

    #[test]
    fn test_full_window_consumes_nothing() {
        let mut window = UploadWindow::new(2, 4).unwrap();
        window.accumulate(&items(0..2)).unwrap();
        assert_eq!(window.accumulate(&items(2..4)).unwrap(), 0);
    }

    #[test]
    fn test_enqueue_not_full() {
        let (tx, _rx) = bounded(1).unwrap();
        let mut window = UploadWindow::new(4, 4).unwrap();
        window.accumulate(&items(0..1)).unwrap();
        assert_eq!(window.enqueue_if_full(&tx).unwrap(), Enqueue::NotFull);
        assert!(tx.is_empty());
    }

    #[test]
    fn test_enqueue_full_window_hands_off_and_resets() {
        let (tx, mut rx) = bounded(1).unwrap();
        let mut window = UploadWindow::new(3, 4).unwrap();
        window.accumulate(&items(0..3)).unwrap();

        assert_eq!(window.enqueue_if_full(&tx).unwrap(), Enqueue::Enqueued);
        assert!(window.is_empty());
        assert_eq!(rx.try_pop().unwrap(), Bytes::from(items(0..3)));

        // The replacement window starts zeroed and fills independently.
        window.accumulate(&items(10..11)).unwrap();
        let rest = window.take_remaining().unwrap();
        assert_eq!(rest, Bytes::from(items(10..11)));
    }

    #[test]
    fn test_queue_full_retains_window_then_retries() {
        let (tx, mut rx) = bounded(1).unwrap();
        let mut window = UploadWindow::new(2, 4).unwrap();

        window.accumulate(&items(0..2)).unwrap();
        assert_eq!(window.enqueue_if_full(&tx).unwrap(), Enqueue::Enqueued);

        window.accumulate(&items(2..4)).unwrap();
        assert_eq!(window.enqueue_if_full(&tx).unwrap(), Enqueue::QueueFull);
        assert!(window.is_full());
        assert_eq!(window.accumulate(&items(4..5)).unwrap(), 0);

        assert_eq!(rx.try_pop().unwrap(), Bytes::from(items(0..2)));
        assert_eq!(window.enqueue_if_full(&tx).unwrap(), Enqueue::Enqueued);
        assert_eq!(rx.try_pop().unwrap(), Bytes::from(items(2..4)));
    }

    #[test]
    fn test_take_remaining_partial_is_exact() {
        let mut window = UploadWindow::new(10, 4).unwrap();
        window.accumulate(&items(0..7)).unwrap();
        let partial = window.take_remaining().unwrap();
        assert_eq!(partial.len(), 7 * 4);
        assert_eq!(partial, Bytes::from(items(0..7)));
        assert!(window.take_remaining().is_none());
    }

    #[test]
    fn test_take_remaining_returns_sealed_window() {
        let mut window = UploadWindow::new(2, 4).unwrap();
        window.accumulate(&items(0..2)).unwrap();
        assert_eq!(window.take_remaining().unwrap(), Bytes::from(items(0..2)));
        assert!(window.is_empty());
        assert_eq!(window.accumulate(&items(2..3)).unwrap(), 1);
    }

    #[test]
    fn test_queued_window_not_aliased() {
        let (tx, mut rx) = bounded(2).unwrap();
        let mut window = UploadWindow::new(2, 4).unwrap();
        window.accumulate(&items(0..2)).unwrap();
        window.enqueue_if_full(&tx).unwrap();

        // Writing into the fresh window must not touch the queued bytes.
        window.accumulate(&items(100..102)).unwrap();
        window.enqueue_if_full(&tx).unwrap();

        assert_eq!(rx.try_pop().unwrap(), Bytes::from(items(0..2)));
        assert_eq!(rx.try_pop().unwrap(), Bytes::from(items(100..102)));
    }
}
