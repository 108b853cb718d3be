// Topic-scoped stream log with consumer groups.
// The engine models an append-only log per stream key: entries carry
// time-based ids, tail readers block until data arrives, and consumer
// groups track a delivery cursor plus unacked pending entries that become
// claimable after an idle timeout.
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod memory;

pub use memory::MemoryStreamStore;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("stream not found: {0}")]
    StreamNotFound(String),
    #[error("no such group: stream={stream} group={group}")]
    NoGroup { stream: String, group: String },
    #[error("group already exists: stream={stream} group={group}")]
    BusyGroup { stream: String, group: String },
    #[error("invalid message id: {0}")]
    InvalidId(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// Entry id: milliseconds since the epoch plus a per-millisecond sequence,
/// rendered as `"{ms}-{seq}"`. Ids are strictly increasing within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MessageId {
    pub ms: u64,
    pub seq: u64,
}

impl MessageId {
    pub const ZERO: MessageId = MessageId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Smallest id strictly greater than `self`.
    pub fn next(self) -> Self {
        Self {
            ms: self.ms,
            seq: self.seq + 1,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for MessageId {
    type Err = StreamError;

    // Accepts `"ms-seq"` or a bare `"ms"` (seq defaults to 0).
    fn from_str(s: &str) -> Result<Self> {
        let bad = || StreamError::InvalidId(s.to_string());
        match s.split_once('-') {
            Some((ms, seq)) => Ok(Self {
                ms: ms.parse().map_err(|_| bad())?,
                seq: seq.parse().map_err(|_| bad())?,
            }),
            None => Ok(Self {
                ms: s.parse().map_err(|_| bad())?,
                seq: 0,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: MessageId,
    pub payload: Bytes,
}

/// Append options, mirroring the knobs publishers are given: lazy stream
/// creation, an approximate length cap, and a minimum-id trim.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Create the stream if it does not exist yet.
    pub mkstream: bool,
    /// Drop oldest entries beyond this count after the append.
    pub max_len: Option<u64>,
    /// Drop entries with ids strictly below this one after the append.
    pub min_id: Option<MessageId>,
}

/// Contract for a stream-log backend.
///
/// Blocking reads must observe `cancel` and fail with
/// [`StreamError::Cancelled`] promptly once it fires. Implementations
/// backed by a remote store map their native errors onto [`StreamError`];
/// notably group-missing conditions onto `NoGroup` and concurrent group
/// creation onto `BusyGroup`.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Append one entry, assigning the next id.
    async fn add(&self, stream: &str, payload: Bytes, opts: &AddOptions) -> Result<MessageId>;

    /// Read up to `count` entries with ids strictly after `after`, blocking
    /// until at least one entry is available or `cancel` fires.
    async fn read(
        &self,
        stream: &str,
        after: MessageId,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamEntry>>;

    /// Create a consumer group with its cursor at the start of the stream,
    /// creating the stream itself when absent.
    async fn create_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Deliver up to `count` never-delivered entries to `consumer`, blocking
    /// up to `block` for new data. An elapsed block returns an empty vec.
    /// Delivered entries become pending until acked.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamEntry>>;

    /// Re-deliver up to `count` pending entries, starting at `start`, whose
    /// idle time exceeds `min_idle`, reassigning them to `consumer`.
    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: MessageId,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Drop the given ids from the group's pending set. Unknown ids are
    /// ignored; returns the number actually removed.
    async fn ack(&self, stream: &str, group: &str, ids: &[MessageId]) -> Result<u64>;
}
