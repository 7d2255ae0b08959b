//! Block traits.
//!
//! A host runtime drives a block with `start()`, repeated `work(..)` calls and
//! a final `stop()`, all from one task. Work calls move raw little-endian
//! items; a slice passed to `work` always holds a whole number of items.

use async_trait::async_trait;

/// Outcome of a source work call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// `n` items were written to the output (may be zero).
    Produced(usize),
    /// The stream is exhausted; no further items will come.
    Done,
}

impl WorkStatus {
    pub fn items(&self) -> usize {
        match self {
            WorkStatus::Produced(n) => *n,
            WorkStatus::Done => 0,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, WorkStatus::Done)
    }
}

/// A block that consumes a sample stream.
#[async_trait]
pub trait SinkBlock: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Consume items from `input`. Returns how many items were taken; the
    /// host re-offers the rest on the next call.
    async fn work(&mut self, input: &[u8]) -> Result<usize, Self::Error>;

    /// Flush everything still buffered and release the destination.
    async fn stop(&mut self) -> Result<(), Self::Error>;

    fn name(&self) -> &str;

    /// Bytes per item.
    fn item_size(&self) -> usize;
}

/// A block that produces a sample stream.
#[async_trait]
pub trait SourceBlock: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Fill `output` with up to `output.len() / item_size` items.
    async fn work(&mut self, output: &mut [u8]) -> Result<WorkStatus, Self::Error>;

    async fn stop(&mut self) -> Result<(), Self::Error>;

    fn name(&self) -> &str;

    fn item_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};

    struct NullSink;

    #[async_trait]
    impl SinkBlock for NullSink {
        type Error = Error;

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn work(&mut self, input: &[u8]) -> Result<usize> {
            Ok(input.len() / 4)
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "null-sink"
        }
        fn item_size(&self) -> usize {
            4
        }
    }

    #[test]
    fn test_work_status_items() {
        assert_eq!(WorkStatus::Produced(5).items(), 5);
        assert_eq!(WorkStatus::Done.items(), 0);
        assert!(WorkStatus::Done.is_done());
        assert!(!WorkStatus::Produced(0).is_done());
    }

    #[test]
    fn test_sink_block_object_safety() {
        let sink = NullSink;
        let _: &dyn SinkBlock<Error = Error> = &sink;
    }

    #[tokio::test]
    async fn test_null_sink_lifecycle() {
        let mut sink = NullSink;
        sink.start().await.unwrap();
        assert_eq!(sink.work(&[0u8; 12]).await.unwrap(), 3);
        sink.stop().await.unwrap();
        assert_eq!(sink.name(), "null-sink");
    }
}
