//! Live result producers for the multi-shot `stream` operations.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::DuckDbResult;
use crate::types::{RecordBatch, Row};

/// Default number of items buffered between the engine and the consumer.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// A stream of results pushed by the engine as they are produced.
///
/// Dropping the stream tells the producer to stop.
pub struct ResultStream<T> {
    rx: mpsc::Receiver<DuckDbResult<T>>,
}

/// Rows produced one at a time.
pub type RowStream = ResultStream<Row>;

/// Columnar batches produced one at a time.
pub type BatchStream = ResultStream<RecordBatch>;

impl<T> ResultStream<T> {
    /// Create a producer/consumer pair with the given buffer size.
    pub fn channel(capacity: usize) -> (mpsc::Sender<DuckDbResult<T>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Receive the next item, or `None` once the producer is done.
    pub async fn next_item(&mut self) -> Option<DuckDbResult<T>> {
        self.rx.recv().await
    }
}

impl<T> Stream for ResultStream<T> {
    type Item = DuckDbResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for ResultStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream").finish_non_exhaustive()
    }
}
