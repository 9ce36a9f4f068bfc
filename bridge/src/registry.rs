use crate::error::IngestError;
use sluice_wire::batch::Batch;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

/// Result of a timed buffer poll.
#[derive(Debug, Clone)]
pub enum Polled {
    Batch(Arc<Batch>),
    /// The stream is complete; no further batches will ever arrive.
    EndOfStream,
    /// The timeout elapsed with nothing to hand out.
    Pending,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Maximum queued batches per query before pushers block.
    pub queue_capacity: usize,
    /// How long a query must stay quiet, with no active connections and the
    /// producer finished, before end-of-stream is signalled.
    pub eos_idle_window: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            eos_idle_window: Duration::from_millis(500),
        }
    }
}

enum QueueItem {
    Batch(Arc<Batch>),
    EndOfStream,
}

struct BufferState {
    queue: VecDeque<QueueItem>,
    active_connections: usize,
    jdbc_finished: bool,
    eos_signalled: bool,
    eos_recheck_scheduled: bool,
    closed: bool,
    last_activity: Instant,
    error: Option<IngestError>,
}

struct QueryBuffer {
    state: Mutex<BufferState>,
    not_empty: Notify,
    not_full: Notify,
}

impl QueryBuffer {
    fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::new(),
                active_connections: 0,
                jdbc_finished: false,
                eos_signalled: false,
                eos_recheck_scheduled: false,
                closed: false,
                last_activity: Instant::now(),
                error: None,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }
}

/// Process-wide registry of per-query batch buffers.
///
/// Connections and page sources reference buffers by query id only; the
/// registry is the sole owner. All per-buffer mutation happens under the
/// buffer's own mutex, which is never held across an await point.
pub struct BufferRegistry {
    buffers: Mutex<HashMap<String, Arc<QueryBuffer>>>,
    /// Recently deregistered query ids. A straggling connection pushing into
    /// a retired query must not resurrect its buffer.
    retired: Mutex<HashMap<String, Instant>>,
    settings: RegistrySettings,
}

const RETIRED_TTL: Duration = Duration::from_secs(300);

impl BufferRegistry {
    pub fn new(settings: RegistrySettings) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashMap::new()),
            settings,
        })
    }

    fn buffer(&self, query_id: &str) -> Option<Arc<QueryBuffer>> {
        self.buffers.lock().unwrap().get(query_id).cloned()
    }

    fn get_or_create(&self, query_id: &str) -> Arc<QueryBuffer> {
        let mut buffers = self.buffers.lock().unwrap();
        if let Some(buffer) = buffers.get(query_id) {
            return buffer.clone();
        }
        if self.retired.lock().unwrap().contains_key(query_id) {
            // detached closed buffer: pushes drop, polls see end-of-stream
            let buffer = QueryBuffer::new();
            buffer.state.lock().unwrap().closed = true;
            return Arc::new(buffer);
        }
        debug!("creating buffer for query {query_id}");
        let buffer = Arc::new(QueryBuffer::new());
        buffers.insert(query_id.to_string(), buffer.clone());
        buffer
    }

    /// Ensures a buffer exists for the query. Idempotent.
    pub fn register_query(&self, query_id: &str) {
        self.retired.lock().unwrap().remove(query_id);
        let _ = self.get_or_create(query_id);
    }

    pub fn is_registered(&self, query_id: &str) -> bool {
        self.buffers.lock().unwrap().contains_key(query_id)
    }

    /// Removes the query's buffer, releasing any batches still queued.
    /// Blocked pushers and pollers wake up and observe the closure.
    pub fn deregister_query(&self, query_id: &str) {
        {
            let mut retired = self.retired.lock().unwrap();
            retired.retain(|_, at| at.elapsed() < RETIRED_TTL);
            retired.insert(query_id.to_string(), Instant::now());
        }
        let removed = self.buffers.lock().unwrap().remove(query_id);
        if let Some(buffer) = removed {
            let mut state = buffer.state.lock().unwrap();
            state.closed = true;
            state.queue.clear();
            drop(state);
            // notify_waiters misses a future that has not been polled yet;
            // the extra notify_one leaves a permit for that window
            buffer.not_empty.notify_waiters();
            buffer.not_empty.notify_one();
            buffer.not_full.notify_waiters();
            buffer.not_full.notify_one();
            debug!("deregistered query {query_id}");
        }
    }

    /// Enqueues a batch, blocking while the buffer is at capacity.
    ///
    /// Auto-registers the buffer: data may arrive before the consumer does.
    /// Returns false when the batch was dropped because the query is gone or
    /// its end-of-stream was already signalled.
    pub async fn push_data(&self, query_id: &str, batch: Arc<Batch>) -> bool {
        let buffer = self.get_or_create(query_id);
        loop {
            let not_full = buffer.not_full.notified();
            {
                let mut state = buffer.state.lock().unwrap();
                if state.closed || state.eos_signalled {
                    return false;
                }
                if state.queue.len() < self.settings.queue_capacity {
                    state.queue.push_back(QueueItem::Batch(Arc::clone(&batch)));
                    state.last_activity = Instant::now();
                    drop(state);
                    buffer.not_empty.notify_one();
                    return true;
                }
                state.last_activity = Instant::now();
            }
            not_full.await;
        }
    }

    /// Returns the next batch, end-of-stream, or `Pending` once the timeout
    /// elapses. A recorded query error takes precedence over queued data.
    pub async fn poll(&self, query_id: &str, timeout: Duration) -> Result<Polled, IngestError> {
        let buffer = self.get_or_create(query_id);
        let deadline = Instant::now() + timeout;
        loop {
            let not_empty = buffer.not_empty.notified();
            {
                let mut state = buffer.state.lock().unwrap();
                if let Some(error) = &state.error {
                    return Err(error.clone());
                }
                if matches!(state.queue.front(), Some(QueueItem::EndOfStream)) {
                    // the sentinel stays queued so every later poll sees it
                    return Ok(Polled::EndOfStream);
                }
                if let Some(QueueItem::Batch(batch)) = state.queue.pop_front() {
                    drop(state);
                    buffer.not_full.notify_one();
                    return Ok(Polled::Batch(batch));
                }
                if state.closed {
                    return Ok(Polled::EndOfStream);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Polled::Pending);
            }
            if tokio::time::timeout(remaining, not_empty).await.is_err() {
                return Ok(Polled::Pending);
            }
        }
    }

    pub fn increment_connections(&self, query_id: &str) {
        let buffer = self.get_or_create(query_id);
        let mut state = buffer.state.lock().unwrap();
        state.active_connections += 1;
        state.last_activity = Instant::now();
    }

    pub fn decrement_connections(self: &Arc<Self>, query_id: &str) {
        if let Some(buffer) = self.buffer(query_id) {
            let mut state = buffer.state.lock().unwrap();
            state.active_connections = state.active_connections.saturating_sub(1);
            state.last_activity = Instant::now();
            drop(state);
            self.check_and_signal_eos(query_id);
        }
    }

    /// Records that the producer-side query completed: no further
    /// connections will ever be opened for this query.
    pub fn signal_jdbc_finished(self: &Arc<Self>, query_id: &str) {
        let buffer = self.get_or_create(query_id);
        buffer.state.lock().unwrap().jdbc_finished = true;
        self.check_and_signal_eos(query_id);
    }

    /// Records the first per-query error; later ones are dropped.
    pub fn set_error(&self, query_id: &str, error: IngestError) {
        let buffer = self.get_or_create(query_id);
        let mut state = buffer.state.lock().unwrap();
        if state.error.is_none() {
            state.error = Some(error);
        }
        drop(state);
        buffer.not_empty.notify_waiters();
        buffer.not_empty.notify_one();
    }

    /// Hybrid end-of-stream rule. The sentinel is enqueued exactly once,
    /// and only when the producer reported completion, no connection is
    /// active, and the buffer has been quiet for the idle window. When only
    /// the idle window is missing, a single delayed re-check is scheduled.
    fn check_and_signal_eos(self: &Arc<Self>, query_id: &str) {
        let Some(buffer) = self.buffer(query_id) else {
            return;
        };
        let mut state = buffer.state.lock().unwrap();
        if state.eos_signalled || state.closed {
            return;
        }
        if !state.jdbc_finished || state.active_connections > 0 {
            return;
        }
        if state.last_activity.elapsed() >= self.settings.eos_idle_window {
            state.queue.push_back(QueueItem::EndOfStream);
            state.eos_signalled = true;
            drop(state);
            buffer.not_empty.notify_waiters();
            buffer.not_empty.notify_one();
            debug!("end-of-stream signalled for query {query_id}");
        } else if !state.eos_recheck_scheduled {
            state.eos_recheck_scheduled = true;
            drop(state);
            let registry = Arc::clone(self);
            let query_id = query_id.to_string();
            let delay = self.settings.eos_idle_window;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(buffer) = registry.buffer(&query_id) {
                    buffer.state.lock().unwrap().eos_recheck_scheduled = false;
                }
                registry.check_and_signal_eos(&query_id);
            });
        }
    }
}
