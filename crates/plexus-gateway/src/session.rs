//! WebSocket bus sessions.
//!
//! One session multiplexes many topics over a single connection: a read
//! pump that publishes inbound envelopes to their topics, and a write pump
//! that drains the session's subscriber queue, coalescing backlog into
//! newline-separated frames. If either pump exits the other is torn down,
//! the socket closes once, and the session leaves every topic it joined.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use plexus_bus::{Subscriber, SubscriberFeed, TopicHandle};
use plexus_core::{new_id, Envelope, Principal, SessionConfig};

use crate::state::AppState;

/// Every topic a newly upgraded client is subscribed to: the response and
/// error side of each request family, the agent and vm lifecycles, and the
/// telemetry feed. This list is the canonical one; nothing else subscribes
/// clients to topics.
pub const RESPONSE_TOPICS: &[&str] = &[
    "ai:generate:resp",
    "ai:generate:error",
    "ai:agent:error",
    "vfs:read:result",
    "vfs:read:error",
    "vfs:write:result",
    "vfs:write:error",
    "vfs:list:result",
    "vfs:list:error",
    "vfs:delete:result",
    "vfs:delete:error",
    "vfs:create:folder:result",
    "vfs:create:folder:error",
    "vm.started",
    "vm.stdout",
    "vm.stderr",
    "vm.exited",
    "vm.killed",
    "vm.crashed",
    "vm:create:error",
    "vm:kill:error",
    "vm:stdin:error",
    "telemetry.vfs",
    "agent.taskgraph.created",
    "agent.taskgraph.started",
    "agent.taskgraph.completed",
    "agent.taskgraph.failed",
    "agent.tasknode.started",
    "agent.tasknode.completed",
    "agent.tasknode.failed",
];

/// Drive one upgraded connection until either pump exits.
pub async fn run(socket: WebSocket, state: AppState, principal: Principal) {
    let (sink, stream) = socket.split();
    let (handle, feed) = Subscriber::channel(state.broker.queue_capacity());

    let mut joined: Vec<TopicHandle> = Vec::with_capacity(RESPONSE_TOPICS.len());
    for name in RESPONSE_TOPICS {
        match state.broker.topic(name).await {
            Ok(topic) => {
                if topic.subscribe(handle.clone()).await.is_ok() {
                    joined.push(topic);
                }
            }
            Err(err) => warn!(topic = %name, error = %err, "could not join topic"),
        }
    }
    info!(principal = %principal.subject, topics = joined.len(), "bus session opened");

    let session = state.config.session.clone();
    let mut write_task = tokio::spawn(write_pump(sink, feed, session.clone()));
    let mut read_task = tokio::spawn(read_pump(stream, state.clone(), principal.clone(), session));

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    handle.close();
    for topic in joined {
        let _ = topic.unsubscribe(handle.id().clone()).await;
    }
    info!(principal = %principal.subject, "bus session closed");
}

/// Read envelopes off the socket and publish them to their topics. The
/// deadline is refreshed by every inbound frame, pongs included.
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    state: AppState,
    principal: Principal,
    config: SessionConfig,
) {
    let idle = Duration::from_secs(config.pong_timeout_secs);
    loop {
        let frame = match tokio::time::timeout(idle, stream.next()).await {
            Err(_) => {
                info!(principal = %principal.subject, "read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(error = %err, "websocket read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };
        match frame {
            Message::Text(text) => publish_frame(&state, &principal, text.as_bytes()).await,
            Message::Binary(bytes) => publish_frame(&state, &principal, &bytes).await,
            Message::Close(_) => break,
            // pings are answered by the protocol stack
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// Unreadable frames log and drop without closing the session.
async fn publish_frame(state: &AppState, principal: &Principal, bytes: &[u8]) {
    let mut envelope = match Envelope::from_slice(bytes) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "dropping malformed envelope");
            return;
        }
    };
    if envelope.id.is_empty() {
        envelope.id = new_id();
    }
    // The identity bound at upgrade time wins over whatever the client put
    // in its meta.
    let mut meta = envelope.meta_view();
    meta.app_id = Some(principal.subject.clone());
    envelope.meta = meta.merged_into(&envelope.meta);

    if let Err(err) = state.broker.publish(envelope).await {
        warn!(error = %err, "dropping envelope");
    }
}

/// Drain the subscriber queue onto the socket, pinging on the configured
/// interval. Backlogged envelopes are coalesced into one frame separated by
/// newlines.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut feed: SubscriberFeed,
    config: SessionConfig,
) {
    let write_timeout = Duration::from_secs(config.write_timeout_secs);
    let period = Duration::from_secs(config.ping_interval_secs);
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            envelope = feed.next() => match envelope {
                Some(envelope) => {
                    let Some(frame) = coalesce(envelope, &mut feed) else { continue };
                    if !send_within(&mut sink, Message::Text(frame.into()), write_timeout).await {
                        break;
                    }
                }
                None => {
                    // the queue was closed (slow consumer or shutdown)
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if !send_within(&mut sink, Message::Ping(Bytes::new()), write_timeout).await {
                    break;
                }
            }
        }
    }
}

async fn send_within(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    deadline: Duration,
) -> bool {
    match tokio::time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(error = %err, "websocket write error");
            false
        }
        Err(_) => {
            debug!("websocket write deadline expired");
            false
        }
    }
}

fn coalesce(first: Envelope, feed: &mut SubscriberFeed) -> Option<String> {
    let mut frame = match serde_json::to_string(&first) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "dropping unserializable envelope");
            return None;
        }
    };
    while let Some(envelope) = feed.try_next() {
        match serde_json::to_string(&envelope) {
            Ok(json) => {
                frame.push('\n');
                frame.push_str(&json);
            }
            Err(err) => warn!(error = %err, "dropping unserializable envelope"),
        }
    }
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_topic_list_covers_every_family() {
        assert!(RESPONSE_TOPICS.iter().all(|t| {
            t.ends_with(":resp")
                || t.ends_with(":result")
                || t.ends_with(":error")
                || t.starts_with("agent.")
                || t.starts_with("vm.")
                || *t == "telemetry.vfs"
        }));
        // request topics must never be in the auto-subscribe set
        for request in ["ai:generate", "vfs:read", "vfs:write", "vm:create", "agent:execute:node"] {
            assert!(!RESPONSE_TOPICS.contains(&request));
        }
    }

    #[tokio::test]
    async fn coalesce_joins_backlog_with_newlines() {
        let (handle, mut feed) = Subscriber::channel(8);
        let first = Envelope::new("t", "test");
        handle.push(Envelope::new("t", "test")).unwrap();
        handle.push(Envelope::new("t", "test")).unwrap();

        let frame = coalesce(first, &mut feed).unwrap();
        assert_eq!(frame.lines().count(), 3);
        for line in frame.lines() {
            assert!(Envelope::from_slice(line.as_bytes()).is_ok());
        }
        // the backlog was fully drained
        assert!(feed.try_next().is_none());
    }
}
