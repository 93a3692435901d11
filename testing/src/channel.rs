//! Recording in-memory [`MessageChannel`].

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_stream::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use warehouse_sync_core::channel::ChannelFuture;
use warehouse_sync_core::{AckHandle, ChannelError, Delivery, MessageChannel, MessageStream};

type Subscriber = (Vec<String>, mpsc::UnboundedSender<Result<Delivery, ChannelError>>);

/// One call to [`MessageChannel::publish`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishAttempt {
    /// Target topic.
    pub topic: String,
    /// Message key.
    pub key: String,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// When the attempt was made, on the tokio clock.
    pub at: Instant,
    /// Error returned to the caller, if the attempt was scripted to fail.
    pub error: Option<ChannelError>,
}

impl PublishAttempt {
    /// Whether the attempt was accepted.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Default)]
struct Inner {
    attempts: Vec<PublishAttempt>,
    log: Vec<Delivery>,
    offsets: HashMap<String, i64>,
    committed: HashMap<String, i64>,
    acks: Vec<(String, i64)>,
    publish_failures: VecDeque<ChannelError>,
    subscribe_failures: VecDeque<ChannelError>,
    subscribers: Vec<Subscriber>,
    subscriptions: usize,
}

/// In-memory broker for tests.
///
/// - every publish attempt is recorded with its tokio [`Instant`], so backoff
///   can be measured under a paused clock
/// - failures can be scripted for the next publishes or subscriptions
/// - subscribers first receive the retained log of their topics, then live
///   messages, in publish order
/// - acknowledged deliveries commit their offset like a single consumer
///   group; a new subscription resumes after the last committed offset
///
/// Cloning shares state.
///
/// # Example
///
/// ```
/// use warehouse_sync_testing::InMemoryChannel;
/// use warehouse_sync_core::{ChannelError, MessageChannel};
///
/// # async fn example() {
/// let channel = InMemoryChannel::new();
/// channel.fail_next(2, ChannelError::Timeout { topic: "SHIPMENT".into() });
///
/// assert!(channel.publish("SHIPMENT", "k", b"{}").await.is_err());
/// assert!(channel.publish("SHIPMENT", "k", b"{}").await.is_err());
/// assert!(channel.publish("SHIPMENT", "k", b"{}").await.is_ok());
/// assert_eq!(channel.attempt_count(), 3);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` publishes with `error`.
    pub fn fail_next(&self, times: usize, error: ChannelError) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .publish_failures
            .extend(std::iter::repeat_n(error, times));
    }

    /// Fail the next publishes with the given errors, in order.
    pub fn fail_with(&self, errors: impl IntoIterator<Item = ChannelError>) {
        self.inner.lock().unwrap().publish_failures.extend(errors);
    }

    /// Fail the next subscription with `error`.
    pub fn fail_next_subscribe(&self, error: ChannelError) {
        self.inner
            .lock()
            .unwrap()
            .subscribe_failures
            .push_back(error);
    }

    /// Every publish attempt so far, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> Vec<PublishAttempt> {
        self.inner.lock().unwrap().attempts.clone()
    }

    /// Number of publish attempts so far.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.inner.lock().unwrap().attempts.len()
    }

    /// Time between consecutive publish attempts.
    #[must_use]
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        let inner = self.inner.lock().unwrap();
        inner
            .attempts
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }

    /// Accepted messages, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<Delivery> {
        self.inner.lock().unwrap().log.clone()
    }

    /// Accepted messages on one topic.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<Delivery> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|d| d.topic == topic)
            .cloned()
            .collect()
    }

    /// Successful subscriptions so far.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().unwrap().subscriptions
    }

    /// Acknowledged `(topic, offset)` pairs, in acknowledgement order.
    #[must_use]
    pub fn acknowledged(&self) -> Vec<(String, i64)> {
        self.inner.lock().unwrap().acks.clone()
    }

    /// Next offset a new subscription reads from `topic`.
    #[must_use]
    pub fn committed_offset(&self, topic: &str) -> i64 {
        self.inner
            .lock()
            .unwrap()
            .committed
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Push a receive error to every live subscriber.
    pub fn inject_transport_error(&self, error: ChannelError) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(Err(error.clone())).is_ok());
    }

    /// End every live subscription stream.
    pub fn close_subscriptions(&self) {
        self.inner.lock().unwrap().subscribers.clear();
    }

    /// Forget all recorded attempts, messages and scripted failures.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts.clear();
        inner.log.clear();
        inner.offsets.clear();
        inner.committed.clear();
        inner.acks.clear();
        inner.publish_failures.clear();
        inner.subscribe_failures.clear();
    }
}

/// Copy of `delivery` whose acknowledgement commits its offset.
fn tracked(inner: Weak<Mutex<Inner>>, delivery: &Delivery) -> Delivery {
    let topic = delivery.topic.clone();
    let offset = delivery.offset;

    Delivery {
        ack: AckHandle::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut inner = inner.lock().unwrap();
            let next = inner.committed.entry(topic.clone()).or_insert(0);
            *next = (*next).max(offset + 1);
            inner.acks.push((topic.clone(), offset));
        }),
        ..delivery.clone()
    }
}

impl MessageChannel for InMemoryChannel {
    fn publish<'a>(&'a self, topic: &'a str, key: &'a str, payload: &'a [u8]) -> ChannelFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            let error = inner.publish_failures.pop_front();

            inner.attempts.push(PublishAttempt {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.to_vec(),
                at: Instant::now(),
                error: error.clone(),
            });

            if let Some(error) = error {
                return Err(error);
            }

            let offset = inner.offsets.entry(topic.to_string()).or_insert(0);
            let delivery = Delivery {
                topic: topic.to_string(),
                key: Some(key.to_string()),
                payload: payload.to_vec(),
                partition: 0,
                offset: *offset,
                ack: AckHandle::default(),
            };
            *offset += 1;

            let weak = Arc::downgrade(&self.inner);
            inner.subscribers.retain(|(topics, tx)| {
                !topics.iter().any(|t| t == topic)
                    || tx.send(Ok(tracked(weak.clone(), &delivery))).is_ok()
            });
            inner.log.push(delivery);

            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topics: &'a [&'a str]) -> ChannelFuture<'a, MessageStream> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();

            if let Some(error) = inner.subscribe_failures.pop_front() {
                return Err(error);
            }

            let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
            let (tx, mut rx) = mpsc::unbounded_channel();

            let weak = Arc::downgrade(&self.inner);
            let backlog = inner.log.iter().filter(|d| {
                topics.contains(&d.topic)
                    && d.offset >= inner.committed.get(&d.topic).copied().unwrap_or(0)
            });
            for delivery in backlog {
                let _ = tx.send(Ok(tracked(weak.clone(), delivery)));
            }
            inner.subscribers.push((topics, tx));
            inner.subscriptions += 1;

            let stream: MessageStream = Box::pin(stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            });
            Ok(stream)
        })
    }
}
