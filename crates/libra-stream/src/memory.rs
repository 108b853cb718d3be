//! In-memory implementation of the stream store.
//!
//! Exists for tests, local development, and non-durable deployments; a
//! durable backend implements the same [`StreamStore`] trait against its
//! native stream primitives. State is a map of stream key to log plus
//! per-group cursors, guarded by one mutex with short critical sections.
//! Blocked readers park on a shared [`Notify`] and re-check after every
//! append; a wakeup is a hint, not a guarantee of data for that reader.
use crate::{AddOptions, MessageId, Result, StreamEntry, StreamError, StreamStore};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    // Highest id ever handed out to this group via a new-message read.
    last_delivered: MessageId,
    // Delivered but unacked, keyed by entry id.
    pending: HashMap<MessageId, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: VecDeque<StreamEntry>,
    // Monotonicity floor for id assignment; survives trimming.
    last_id: MessageId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&mut self, now_ms: u64) -> MessageId {
        let id = if now_ms > self.last_id.ms {
            MessageId::new(now_ms, 0)
        } else {
            self.last_id.next()
        };
        self.last_id = id;
        id
    }

    fn range_after(&self, after: MessageId, count: usize) -> Vec<StreamEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.id > after)
            .take(count)
            .cloned()
            .collect()
    }

    fn trim(&mut self, opts: &AddOptions) {
        if let Some(max_len) = opts.max_len {
            while self.entries.len() as u64 > max_len {
                self.entries.pop_front();
            }
        }
        if let Some(min_id) = opts.min_id {
            while self
                .entries
                .front()
                .is_some_and(|entry| entry.id < min_id)
            {
                self.entries.pop_front();
            }
        }
    }
}

/// In-process stream store.
///
/// ```
/// use bytes::Bytes;
/// use libra_stream::{AddOptions, MemoryStreamStore, MessageId, StreamStore};
/// use tokio_util::sync::CancellationToken;
///
/// let store = MemoryStreamStore::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let opts = AddOptions { mkstream: true, ..Default::default() };
///     store
///         .add("app:topic", Bytes::from_static(b"payload"), &opts)
///         .await
///         .expect("add");
///     let cancel = CancellationToken::new();
///     let batch = store
///         .read("app:topic", MessageId::ZERO, 10, &cancel)
///         .await
///         .expect("read");
///     assert_eq!(batch.len(), 1);
/// });
/// ```
#[derive(Debug, Default)]
pub struct MemoryStreamStore {
    inner: Mutex<HashMap<String, StreamState>>,
    // Single wakeup channel for all streams; parked readers re-check state.
    notify: Notify,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn add(&self, stream: &str, payload: Bytes, opts: &AddOptions) -> Result<MessageId> {
        let id = {
            let mut inner = self.inner.lock();
            if !opts.mkstream && !inner.contains_key(stream) {
                return Err(StreamError::StreamNotFound(stream.to_string()));
            }
            let state = inner.entry(stream.to_string()).or_default();
            let id = state.next_id(Self::now_ms());
            state.entries.push_back(StreamEntry { id, payload });
            state.trim(opts);
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn read(
        &self,
        stream: &str,
        after: MessageId,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamEntry>> {
        loop {
            // Register for wakeups before inspecting state so an append
            // between the check and the await cannot be missed.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let inner = self.inner.lock();
                // An absent stream blocks like an empty one: it may be
                // created by the first publish after we subscribed.
                if let Some(state) = inner.get(stream) {
                    let batch = state.range_after(after, count);
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                _ = notified => {}
            }
        }
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner.entry(stream.to_string()).or_default();
        if state.groups.contains_key(group) {
            return Err(StreamError::BusyGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }
        state.groups.insert(group.to_string(), GroupState::default());
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock();
                let state = inner.get_mut(stream).ok_or_else(|| StreamError::NoGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })?;
                let StreamState {
                    entries, groups, ..
                } = state;
                let group_state = groups.get_mut(group).ok_or_else(|| StreamError::NoGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })?;
                let batch: Vec<StreamEntry> = entries
                    .iter()
                    .filter(|entry| entry.id > group_state.last_delivered)
                    .take(count)
                    .cloned()
                    .collect();
                if !batch.is_empty() {
                    for entry in &batch {
                        group_state.pending.insert(
                            entry.id,
                            PendingEntry {
                                consumer: consumer.to_string(),
                                delivered_at: Instant::now(),
                                delivery_count: 1,
                            },
                        );
                    }
                    group_state.last_delivered = batch[batch.len() - 1].id;
                    return Ok(batch);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
                _ = notified => {}
            }
        }
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: MessageId,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut inner = self.inner.lock();
        let state = inner.get_mut(stream).ok_or_else(|| StreamError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        })?;
        let StreamState {
            entries, groups, ..
        } = state;
        let group_state = groups.get_mut(group).ok_or_else(|| StreamError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        })?;

        let mut stale: Vec<MessageId> = group_state
            .pending
            .iter()
            .filter(|(id, pending)| **id >= start && pending.delivered_at.elapsed() >= min_idle)
            .map(|(id, _)| *id)
            .collect();
        stale.sort();

        let mut claimed = Vec::new();
        for id in stale {
            if claimed.len() >= count {
                break;
            }
            match entries.iter().find(|entry| entry.id == id) {
                Some(entry) => {
                    let pending = group_state.pending.get_mut(&id).expect("pending entry");
                    pending.consumer = consumer.to_string();
                    pending.delivered_at = Instant::now();
                    pending.delivery_count += 1;
                    claimed.push(entry.clone());
                }
                // The underlying entry was trimmed away; drop the orphaned
                // pending record instead of claiming it.
                None => {
                    group_state.pending.remove(&id);
                }
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[MessageId]) -> Result<u64> {
        let mut inner = self.inner.lock();
        let Some(state) = inner.get_mut(stream) else {
            return Ok(0);
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in ids {
            if group_state.pending.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
