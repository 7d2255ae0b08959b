//! Bounded hand-off queue.
//!
//! A thin wrapper over `tokio::sync::mpsc` that exposes the three push
//! flavours the buffering code needs:
//!
//! - [`QueueSender::try_push`]: never waits; a full queue hands the item back
//!   so the caller can keep it and re-offer it on a later work call
//! - [`QueueSender::push`]: waits for space (the blocking hand-off used at
//!   shutdown and after the re-offer budget is spent)
//! - [`QueueReceiver::try_pop`] / [`QueueReceiver::pop`]: non-blocking and
//!   waiting pops for the transfer side
//!
//! Capacity is fixed at construction; memory use is bounded by
//! `capacity * window_size`.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use crate::error::{Error, Result};

/// Create a bounded queue with room for `capacity` items.
pub fn bounded<T>(capacity: usize) -> Result<(QueueSender<T>, QueueReceiver<T>)> {
    if capacity == 0 {
        return Err(Error::Config("queue size must be at least 1".to_string()));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((QueueSender { tx }, QueueReceiver { rx }))
}

/// Outcome of a non-blocking push.
#[derive(Debug, PartialEq, Eq)]
pub enum TryPush<T> {
    Pushed,
    /// The queue had no free slot; ownership of the item returns to the caller.
    Full(T),
}

/// Producer half of the queue.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    pub fn try_push(&self, item: T) -> Result<TryPush<T>> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(TryPush::Pushed),
            Err(TrySendError::Full(item)) => Ok(TryPush::Full(item)),
            Err(TrySendError::Closed(_)) => Err(Error::QueueClosed),
        }
    }

    pub async fn push(&self, item: T) -> Result<()> {
        self.tx.send(item).await.map_err(|_| Error::QueueClosed)
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    /// Number of queued items not yet popped.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of the queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Pop without waiting. `None` when nothing is queued right now.
    pub fn try_pop(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next item. `None` once every sender is dropped and the
    /// queue is drained.
    pub async fn pop(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Stop accepting new items; already queued items can still be popped.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(bounded::<u32>(0).is_err());
    }

    #[test]
    fn test_try_push_until_full() {
        let (tx, mut rx) = bounded::<u32>(2).unwrap();
        assert_eq!(tx.try_push(1).unwrap(), TryPush::Pushed);
        assert_eq!(tx.try_push(2).unwrap(), TryPush::Pushed);
        assert!(tx.is_full());
        assert_eq!(tx.try_push(3).unwrap(), TryPush::Full(3));
        assert_eq!(tx.len(), 2);

        assert_eq!(rx.try_pop(), Some(1));
        assert!(!tx.is_full());
        assert_eq!(tx.try_push(3).unwrap(), TryPush::Pushed);
        assert_eq!(rx.try_pop(), Some(2));
        assert_eq!(rx.try_pop(), Some(3));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_fifo_order() {
        let (tx, mut rx) = bounded::<u32>(8).unwrap();
        for i in 0..8 {
            tx.try_push(i).unwrap();
        }
        let drained: Vec<u32> = std::iter::from_fn(|| rx.try_pop()).collect();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_try_push_after_receiver_dropped() {
        let (tx, rx) = bounded::<u32>(1).unwrap();
        drop(rx);
        assert!(matches!(tx.try_push(1), Err(Error::QueueClosed)));
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_blocking_push_waits_for_space() {
        let (tx, mut rx) = bounded::<u32>(1).unwrap();
        tx.push(1).await.unwrap();

        let pusher = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.push(2).await })
        };

        assert_eq!(rx.pop().await, Some(1));
        pusher.await.unwrap().unwrap();
        assert_eq!(rx.pop().await, Some(2));
    }

    #[tokio::test]
    async fn test_pop_returns_none_after_senders_dropped() {
        let (tx, mut rx) = bounded::<u32>(2).unwrap();
        tx.push(7).await.unwrap();
        drop(tx);
        assert_eq!(rx.pop().await, Some(7));
        assert_eq!(rx.pop().await, None);
    }
}
