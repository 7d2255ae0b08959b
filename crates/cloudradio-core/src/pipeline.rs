//! Pipeline driver.
//!
//! Drives a single block the way a host scheduler would: fixed-size work
//! calls from one task, unconsumed input re-offered on the next call, and a
//! `stop()` once the stream ends. Used by the CLI and the integration tests.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::block::{SinkBlock, SourceBlock, WorkStatus};
use crate::error::Error;

/// Counters collected while driving a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Items moved through the block.
    pub items: u64,
    pub work_calls: u64,
    /// Work calls that moved zero items.
    pub idle_calls: u64,
}

/// Read whole items from `reader` and feed them to `block` in calls of at
/// most `items_per_call` items.
///
/// A trailing partial item at end of input is an error.
pub async fn drive_sink<B, R>(
    block: &mut B,
    mut reader: R,
    items_per_call: usize,
) -> Result<PipelineStats, B::Error>
where
    B: SinkBlock,
    B::Error: From<Error>,
    R: AsyncRead + Unpin + Send,
{
    let item_size = block.item_size();
    let mut buf = vec![0u8; items_per_call.max(1) * item_size];
    let mut stats = PipelineStats::default();

    block.start().await?;

    loop {
        let len = read_full(&mut reader, &mut buf).await.map_err(Error::from)?;
        if len == 0 {
            break;
        }
        if len % item_size != 0 {
            return Err(Error::PartialItem { len, item_size }.into());
        }

        let mut offset = 0;
        while offset < len {
            let consumed = block.work(&buf[offset..len]).await?;
            stats.work_calls += 1;
            if consumed == 0 {
                stats.idle_calls += 1;
                tokio::task::yield_now().await;
            }
            offset += consumed * item_size;
            stats.items += consumed as u64;
        }

        if len < buf.len() {
            break;
        }
    }

    block.stop().await?;

    tracing::info!(
        block = %block.name(),
        items = stats.items,
        work_calls = stats.work_calls,
        idle_calls = stats.idle_calls,
        "sink pipeline finished"
    );

    Ok(stats)
}

/// Pull items from `block` and write them to `writer` until the block reports
/// end of stream, or until `limit` items have been written.
pub async fn drive_source<B, W>(
    block: &mut B,
    mut writer: W,
    items_per_call: usize,
    limit: Option<u64>,
) -> Result<PipelineStats, B::Error>
where
    B: SourceBlock,
    B::Error: From<Error>,
    W: AsyncWrite + Unpin + Send,
{
    let item_size = block.item_size();
    let mut buf = vec![0u8; items_per_call.max(1) * item_size];
    let mut stats = PipelineStats::default();

    block.start().await?;

    loop {
        if limit.is_some_and(|l| stats.items >= l) {
            break;
        }

        let status = block.work(&mut buf).await?;
        stats.work_calls += 1;

        let n = match status {
            WorkStatus::Done => break,
            WorkStatus::Produced(0) => {
                stats.idle_calls += 1;
                tokio::task::yield_now().await;
                continue;
            }
            WorkStatus::Produced(n) => n as u64,
        };

        let take = match limit {
            Some(l) => n.min(l - stats.items),
            None => n,
        };
        writer
            .write_all(&buf[..take as usize * item_size])
            .await
            .map_err(Error::from)?;
        stats.items += take;
    }

    writer.flush().await.map_err(Error::from)?;
    block.stop().await?;

    tracing::info!(
        block = %block.name(),
        items = stats.items,
        work_calls = stats.work_calls,
        idle_calls = stats.idle_calls,
        "source pipeline finished"
    );

    Ok(stats)
}

/// Read until `buf` is full or the reader hits EOF.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
