//! Download prefetcher.
//!
//! Pulls chunks off a blob download, reassembles them into whole items and
//! keeps up to `queue_size` item arrays ready for the source's read buffer.
//! Network waits happen only inside [`Prefetcher::prefetch`].

use bytes::Bytes;
use cloudradio_core::{bounded, ChunkReassembler, QueueReceiver, QueueSender, TryPush};
use cloudradio_observability::metrics::{BLOB_BYTES_DOWNLOADED_TOTAL, BLOB_CHUNKS_DOWNLOADED_TOTAL};
use futures::StreamExt;

use crate::client::ChunkStream;
use crate::error::{BlobError, Result};

pub struct Prefetcher {
    container: String,
    stream: Option<ChunkStream>,
    reassembler: ChunkReassembler,
    tx: QueueSender<Bytes>,
    rx: QueueReceiver<Bytes>,
    complete: bool,
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("container", &self.container)
            .field("queued", &self.rx.len())
            .field("residue", &self.reassembler.residue().len())
            .field("complete", &self.complete)
            .finish()
    }
}

impl Prefetcher {
    pub fn new(container: &str, stream: ChunkStream, item_size: usize, queue_size: usize) -> Result<Self> {
        let (tx, rx) = bounded(queue_size)?;
        Ok(Self {
            container: container.to_string(),
            stream: Some(stream),
            reassembler: ChunkReassembler::new(item_size),
            tx,
            rx,
            complete: false,
        })
    }

    /// Fill the queue: pull chunks while it has room and the download is not
    /// exhausted. Returns the number of item arrays enqueued.
    pub async fn prefetch(&mut self) -> Result<usize> {
        let mut enqueued = 0;

        while !self.complete && !self.tx.is_full() {
            let Some(stream) = self.stream.as_mut() else {
                self.complete = true;
                break;
            };

            match stream.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    BLOB_CHUNKS_DOWNLOADED_TOTAL
                        .with_label_values(&[self.container.as_str()])
                        .inc();
                    BLOB_BYTES_DOWNLOADED_TOTAL
                        .with_label_values(&[self.container.as_str()])
                        .inc_by(chunk.len() as u64);

                    let items = self.reassembler.push(chunk);
                    if items.is_empty() {
                        continue;
                    }
                    self.enqueue(items)?;
                    enqueued += 1;
                }
                None => {
                    self.complete = true;
                    self.stream = None;
                    let residue = self.reassembler.residue().len();
                    if residue > 0 {
                        tracing::warn!(
                            container = %self.container,
                            residue,
                            "download ended inside an item; trailing bytes dropped"
                        );
                    }
                }
            }
        }

        Ok(enqueued)
    }

    /// Callers check for room first; a refusal is an internal fault.
    fn enqueue(&mut self, items: Bytes) -> Result<()> {
        match self.tx.try_push(items)? {
            TryPush::Pushed => Ok(()),
            TryPush::Full(_) => Err(BlobError::Worker(
                "prefetch queue filled while it was being checked".to_string(),
            )),
        }
    }

    /// Next item array, if one is queued.
    pub fn next_array(&mut self) -> Option<Bytes> {
        self.rx.try_pop()
    }

    /// Download exhausted (more arrays may still be queued).
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Download exhausted and every array handed out.
    pub fn is_drained(&self) -> bool {
        self.complete && self.rx.is_empty()
    }

    pub fn residue_len(&self) -> usize {
        self.reassembler.residue().len()
    }

    /// Start over on a fresh download of the same blob.
    pub fn restart(&mut self, stream: ChunkStream) {
        while self.rx.try_pop().is_some() {}
        self.reassembler.reset();
        self.stream = Some(stream);
        self.complete = false;
    }

    /// Drop the download and mark the stream complete.
    pub fn stop(&mut self) {
        self.stream = None;
        self.complete = true;
        while self.rx.try_pop().is_some() {}
    }
}
