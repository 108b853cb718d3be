//! Tenant-scoped pub/sub over the stream store.
//!
//! Stream keys are `"{app_id}:{topic}"`; the tenant prefix is injected and
//! stripped at this boundary so handlers below never see another tenant's
//! streams. Subscribe fans one reader task out per subscription and funnels
//! every batch through a single bounded channel into the response stream.
//! Consume runs one worker per consumption with first-wins cancellation:
//! the call returns as soon as any consumption has messages or all fail.
use crate::api::types::{
    ConsumeRequest, ConsumeResponse, ErrorResponse, PublishRequest, PublishResponse,
    PubSubMessage, SubscribeRequest, SubscribeResponse,
};
use crate::app::AppState;
use crate::auth;
use crate::auth::Trust;
use crate::error::{Error, Result};
use anyhow::Context;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Extension, Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use libra_stream::{AddOptions, MessageId, StreamEntry, StreamError, StreamStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

fn to_stream(app_id: &str, topic: &str) -> Result<String> {
    if app_id.contains(':') {
        return Err(Error::invalid_argument("invalid app id"));
    }
    Ok(format!("{app_id}:{topic}"))
}

fn store_err(err: StreamError) -> Error {
    match err {
        StreamError::StreamNotFound(_) => Error::invalid_argument("no such topic"),
        _ => Error::DatabaseUnavailable,
    }
}

// Stored values are the base64 text of the payload; delivery hands the text
// back after checking it still decodes.
fn parse_entry(entry: &StreamEntry, topic: &str) -> anyhow::Result<PubSubMessage> {
    let text = std::str::from_utf8(&entry.payload).context("pubsub payload is not utf-8")?;
    BASE64.decode(text).context("decode pubsub message")?;
    Ok(PubSubMessage {
        topic: topic.to_string(),
        id: entry.id.to_string(),
        payload: text.to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/v1/pubsub/publish",
    tag = "pubsub",
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Messages appended", body = PublishResponse),
        (status = 400, description = "Undecodable payload or unknown topic", body = ErrorResponse)
    )
)]
pub(crate) async fn publish(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<PublishResponse>> {
    let app_id = auth::require_secret(&trust)?;
    let opts = match &req.opts {
        None => AddOptions {
            mkstream: true,
            ..Default::default()
        },
        Some(opts) => AddOptions {
            mkstream: opts.create_topic,
            max_len: opts.max_len,
            min_id: match opts.min_id.as_deref() {
                Some(raw) if !raw.is_empty() => Some(
                    raw.parse()
                        .map_err(|_| Error::invalid_argument("invalid min id"))?,
                ),
                _ => None,
            },
        },
    };
    for msg in &req.msgs {
        if BASE64.decode(&msg.payload).is_err() {
            return Err(Error::invalid_argument("bad msg"));
        }
        let stream_key = to_stream(&app_id, &msg.topic)?;
        state
            .streams
            .add(&stream_key, Bytes::from(msg.payload.clone().into_bytes()), &opts)
            .await
            .map_err(store_err)?;
    }
    metrics::counter!("registry_pubsub_published_total").increment(req.msgs.len() as u64);
    Ok(Json(PublishResponse {}))
}

/// Non-durable tail subscription, delivered as a server-sent event stream of
/// [`SubscribeResponse`] batches. One reader per subscription; readers stop
/// when the client goes away. Re-subscription passes `after_id` to resume;
/// nothing is acked on this path.
pub(crate) async fn subscribe(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let app_id = auth::require_secret(&trust)?;
    let mut readers = Vec::with_capacity(req.subscriptions.len());
    for sub in &req.subscriptions {
        let stream_key = to_stream(&app_id, &sub.topic)?;
        let mut start = MessageId::new(sub.since_milli_timestamp, 0);
        if !sub.after_id.is_empty() {
            let after: MessageId = sub.after_id.parse().map_err(|_| {
                Error::invalid_argument(format!("invalid subscription after id: {}", sub.after_id))
            })?;
            // Resume from the cursor only when it is past the time floor.
            if after.ms >= sub.since_milli_timestamp {
                start = after;
            }
        }
        let count = if sub.batch_size == 0 {
            usize::MAX
        } else {
            sub.batch_size as usize
        };
        readers.push((stream_key, sub.topic.clone(), start, count));
    }

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel::<SubscribeResponse>(16);
    for (stream_key, topic, start, count) in readers {
        tokio::spawn(subscribe_reader(
            state.streams.clone(),
            stream_key,
            topic,
            start,
            count,
            tx.clone(),
            cancel.clone(),
        ));
    }
    drop(tx);

    // Dropping the response stream cancels every reader.
    let guard = cancel.drop_guard();
    let stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|resp| (resp, (rx, guard)))
    })
    .map(|resp| Event::default().json_data(&resp));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn subscribe_reader(
    streams: Arc<dyn StreamStore>,
    stream_key: String,
    topic: String,
    mut cursor: MessageId,
    count: usize,
    tx: mpsc::Sender<SubscribeResponse>,
    cancel: CancellationToken,
) {
    loop {
        let entries = match streams.read(&stream_key, cursor, count, &cancel).await {
            Ok(entries) => entries,
            Err(StreamError::Cancelled) => {
                tracing::debug!(stream = %stream_key, "subscribe reader cancelled");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to read pubsub message");
                return;
            }
        };
        let mut msgs = Vec::with_capacity(entries.len());
        for entry in &entries {
            cursor = entry.id;
            match parse_entry(entry, &topic) {
                Ok(msg) => msgs.push(msg),
                Err(err) => tracing::warn!(error = %err, "failed to parse message"),
            }
        }
        if msgs.is_empty() {
            continue;
        }
        if tx.send(SubscribeResponse { msgs }).await.is_err() {
            // Client went away; the shared channel is closed.
            return;
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/pubsub/consume",
    tag = "pubsub",
    request_body = ConsumeRequest,
    responses(
        (status = 200, description = "At-least-once delivery batch", body = ConsumeResponse)
    )
)]
pub(crate) async fn consume(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>> {
    let app_id = auth::require_secret(&trust)?;

    // Ack phase first, so a combined ack+read call settles the previous
    // batch before blocking on the next one.
    for ack in &req.acks {
        let stream_key = to_stream(&app_id, &ack.topic)?;
        let group = ack.group_id.to_string();
        let mut ids = Vec::with_capacity(ack.msg_ids.len());
        for raw in &ack.msg_ids {
            ids.push(
                raw.parse::<MessageId>()
                    .map_err(|_| Error::invalid_argument(format!("invalid msg id: {raw}")))?,
            );
        }
        state
            .streams
            .ack(&stream_key, &group, &ids)
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "failed to ack");
                Error::DatabaseUnavailable
            })?;
    }

    let mut workers = Vec::with_capacity(req.consumptions.len());
    for con in &req.consumptions {
        if con.ack_timeout_milli == 0 {
            return Err(Error::invalid_argument("ack timeout required"));
        }
        workers.push((
            to_stream(&app_id, &con.topic)?,
            con.group_id.to_string(),
            con.topic.clone(),
            Duration::from_millis(con.ack_timeout_milli),
        ));
    }

    let collected = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let mut join_set = JoinSet::new();
    for (stream_key, group, topic, timeout) in workers {
        let streams = state.streams.clone();
        let collected = collected.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let result = consume_worker(streams, stream_key, group, topic, timeout, &cancel).await;
            if let Some(msgs) = result {
                collected.lock().extend(msgs);
            }
            // First worker back, successful or not, releases the siblings.
            cancel.cancel();
        });
    }
    while join_set.join_next().await.is_some() {}

    let msgs = std::mem::take(&mut *collected.lock());
    metrics::counter!("registry_pubsub_consumed_total").increment(msgs.len() as u64);
    Ok(Json(ConsumeResponse { msgs }))
}

// Loop claim-then-read until at least one message lands, mirroring the
// consumer-group state machine: stale pending entries are claimed first,
// otherwise a blocking group read waits out the ack timeout.
async fn consume_worker(
    streams: Arc<dyn StreamStore>,
    stream_key: String,
    group: String,
    topic: String,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Option<Vec<PubSubMessage>> {
    let mut msgs = Vec::new();
    while msgs.is_empty() {
        let claimed = loop {
            match streams
                .auto_claim(&stream_key, &group, &group, timeout, MessageId::ZERO, 1)
                .await
            {
                Ok(claimed) => break claimed,
                Err(StreamError::NoGroup { .. }) => {
                    if !ensure_group(streams.as_ref(), &stream_key, &group).await {
                        return None;
                    }
                }
                Err(StreamError::Cancelled) => {
                    tracing::debug!(stream = %stream_key, "consume claim cancelled");
                    return None;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to claim");
                    return None;
                }
            }
        };

        let entries = if claimed.is_empty() {
            match streams
                .read_group(&stream_key, &group, &group, 1, timeout, cancel)
                .await
            {
                Ok(entries) => entries,
                Err(StreamError::NoGroup { .. }) => {
                    if !ensure_group(streams.as_ref(), &stream_key, &group).await {
                        return None;
                    }
                    continue;
                }
                Err(StreamError::Cancelled) => {
                    tracing::debug!(stream = %stream_key, "consume read cancelled");
                    return None;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read group");
                    return None;
                }
            }
        } else {
            claimed
        };

        for entry in &entries {
            match parse_entry(entry, &topic) {
                Ok(msg) => msgs.push(msg),
                Err(err) => tracing::warn!(error = %err, "failed to parse message"),
            }
        }
    }
    Some(msgs)
}

async fn ensure_group(streams: &dyn StreamStore, stream_key: &str, group: &str) -> bool {
    match streams.create_group(stream_key, group).await {
        Ok(()) => true,
        // Lost the creation race to a sibling consumer; that is success.
        Err(StreamError::BusyGroup { .. }) => true,
        Err(err) => {
            tracing::warn!(error = %err, "failed to create group");
            false
        }
    }
}
