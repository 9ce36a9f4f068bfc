use crate::split::Split;
use sluice_bridge::registry::{BufferRegistry, Polled};
use sluice_bridge::token::TokenStore;
use sluice_bridge::IngestError;
use sluice_wire::batch::Batch;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A batch dressed up as an engine page.
#[derive(Debug, Clone)]
pub struct Page {
    pub batch: Arc<Batch>,
    /// Per-column byte sizes, for the engine's memory accounting.
    pub sizes: Vec<usize>,
}

impl Page {
    pub fn new(batch: Arc<Batch>) -> Self {
        let sizes = batch.columns.iter().map(|column| column.byte_size()).collect();
        Self { batch, sizes }
    }

    pub fn row_count(&self) -> usize {
        self.batch.row_count
    }

    pub fn byte_size(&self) -> usize {
        self.sizes.iter().sum()
    }
}

#[derive(Debug)]
pub enum PagePoll {
    Page(Page),
    /// Nothing available within the poll timeout; call again. Keeps the
    /// consumer responsive to engine-side cancellation.
    Pending,
    Finished,
}

/// Drains one query's buffer on the worker this split was pinned to.
///
/// The source never owns the buffer; it reaches it through the registry by
/// query id. Creating the source registers the split's token with the local
/// bridge so producer connections can authenticate, and consuming the
/// end-of-stream sentinel (or dropping the source early) releases both.
pub struct PageSource {
    registry: Arc<BufferRegistry>,
    tokens: Arc<TokenStore>,
    query_id: String,
    poll_timeout: Duration,
    finished: bool,
    closed: bool,
    rows_read: u64,
}

impl PageSource {
    pub fn new(
        registry: Arc<BufferRegistry>,
        tokens: Arc<TokenStore>,
        split: &Split,
        poll_timeout: Duration,
    ) -> Self {
        registry.register_query(&split.query_id);
        tokens.register(&split.query_id, split.token.clone());
        Self {
            registry,
            tokens,
            query_id: split.query_id.clone(),
            poll_timeout,
            finished: false,
            closed: false,
            rows_read: 0,
        }
    }

    pub async fn next_page(&mut self) -> Result<PagePoll, IngestError> {
        if self.finished {
            return Ok(PagePoll::Finished);
        }
        match self.registry.poll(&self.query_id, self.poll_timeout).await? {
            Polled::Batch(batch) => {
                self.rows_read += batch.row_count as u64;
                Ok(PagePoll::Page(Page::new(batch)))
            }
            Polled::EndOfStream => {
                debug!(
                    "query {} drained after {} rows",
                    self.query_id, self.rows_read
                );
                self.finished = true;
                self.close();
                Ok(PagePoll::Finished)
            }
            Polled::Pending => Ok(PagePoll::Pending),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Releases the buffer and the query's token. Idempotent; also the
    /// cancellation path when the engine drops the source mid-stream.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.finished = true;
        self.tokens.invalidate(&self.query_id);
        self.registry.deregister_query(&self.query_id);
    }
}

impl Drop for PageSource {
    fn drop(&mut self) {
        self.close();
    }
}
