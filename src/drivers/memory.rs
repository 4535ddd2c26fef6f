//! In-process broker: one single-partition log per topic and a durable
//! acknowledgment record per subscription. Clones share the same state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;

use crate::drivers::acks::AckState;
use crate::drivers::{Connection, Cursor};
use crate::error::{Error, Result};
use crate::models::{
    validate_topic, InitialPosition, MessageId, OutgoingMessage, RawMessage, Subscription,
};

const PARTITION: i32 = 0;

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    // keyed by (topic, subscription name)
    subscriptions: HashMap<(String, String), AckState>,
    open_cursors: HashMap<(String, String), usize>,
}

struct TopicLog {
    entries: Vec<RawMessage>,
    published: watch::Sender<usize>,
}

impl TopicLog {
    fn new() -> Self {
        let (published, _) = watch::channel(0);
        Self {
            entries: Vec::new(),
            published,
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of messages ever published to `topic`.
    pub fn published(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map_or(0, |log| log.entries.len())
    }

    /// Messages of `topic` not yet acknowledged by `subscription`, or `None`
    /// if the subscription does not exist.
    pub fn backlog(&self, topic: &str, subscription: &str) -> Option<usize> {
        let state = self.lock();
        let acks = state
            .subscriptions
            .get(&(topic.to_owned(), subscription.to_owned()))?;
        let len = state.topics.get(topic).map_or(0, |log| log.entries.len());
        Some(len.saturating_sub(acks.watermark() as usize) - acks.pending())
    }

    /// Cursors of `subscription` that are neither closed nor dropped.
    pub fn open_cursors(&self, topic: &str, subscription: &str) -> usize {
        self.lock()
            .open_cursors
            .get(&(topic.to_owned(), subscription.to_owned()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connection for MemoryBroker {
    async fn subscribe(&self, subscription: &Subscription) -> Result<Box<dyn Cursor>> {
        let mut state = self.lock();
        let state = &mut *state;
        let log = state
            .topics
            .entry(subscription.topic().to_owned())
            .or_insert_with(TopicLog::new);
        let head = log.entries.len();
        let published = log.published.subscribe();

        let key = (subscription.topic().to_owned(), subscription.name().to_owned());
        let acks = state
            .subscriptions
            .entry(key.clone())
            .or_insert_with(|| match subscription.initial_position() {
                InitialPosition::Earliest => AckState::starting_at(0),
                InitialPosition::Latest => AckState::starting_at(head as i64),
            });
        let position = acks.watermark() as usize;
        *state.open_cursors.entry(key).or_default() += 1;
        debug!(
            topic = subscription.topic(),
            subscription = subscription.name(),
            position,
            "memory cursor opened"
        );

        Ok(Box::new(MemoryCursor {
            broker: self.clone(),
            topic: subscription.topic().to_owned(),
            subscription: subscription.name().to_owned(),
            position: Mutex::new(position),
            published,
            closed: watch::channel(false).0,
        }))
    }

    async fn send(&self, topic: &str, message: OutgoingMessage) -> Result<MessageId> {
        validate_topic(topic)?;
        let mut state = self.lock();
        let log = state
            .topics
            .entry(topic.to_owned())
            .or_insert_with(TopicLog::new);
        let offset = log.entries.len();
        let id = MessageId::new(PARTITION, offset as i64);
        log.entries.push(RawMessage {
            topic: topic.to_owned(),
            id,
            key: message.key,
            publish_time: Some(Utc::now()),
            payload: message.payload,
        });
        log.published.send_replace(log.entries.len());
        Ok(id)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct MemoryCursor {
    broker: MemoryBroker,
    topic: String,
    subscription: String,
    position: Mutex<usize>,
    published: watch::Receiver<usize>,
    closed: watch::Sender<bool>,
}

impl MemoryCursor {
    fn sub_key(&self) -> (String, String) {
        (self.topic.clone(), self.subscription.clone())
    }

    /// Mark the cursor closed, waking a pending `next`. Returns false if it
    /// already was.
    fn shut(&self) -> bool {
        if self.closed.send_replace(true) {
            return false;
        }
        let mut state = self.broker.lock();
        if let Some(open) = state.open_cursors.get_mut(&self.sub_key()) {
            *open = open.saturating_sub(1);
        }
        true
    }

    /// Take the next unacknowledged entry, advancing the cursor past it.
    /// Returns the position to wait on when the log is exhausted.
    fn poll(&self) -> std::result::Result<RawMessage, usize> {
        let state = self.broker.lock();
        let mut position = self.position.lock().unwrap_or_else(|p| p.into_inner());
        let (Some(log), Some(acks)) = (
            state.topics.get(&self.topic),
            state.subscriptions.get(&self.sub_key()),
        ) else {
            return Err(*position);
        };
        while let Some(entry) = log.entries.get(*position) {
            *position += 1;
            if !acks.is_acked(*position as i64 - 1) {
                return Ok(entry.clone());
            }
        }
        Err(*position)
    }
}

#[async_trait]
impl Cursor for MemoryCursor {
    async fn next(&self) -> Result<RawMessage> {
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return Err(Error::Closed);
            }
            let position = match self.poll() {
                Ok(message) => return Ok(message),
                Err(position) => position,
            };
            let mut published = self.published.clone();
            tokio::select! {
                more = async { published.wait_for(|len| *len > position).await.is_ok() } => {
                    if !more {
                        return Err(Error::Closed);
                    }
                }
                _ = async { closed.wait_for(|closed| *closed).await.is_ok() } => {
                    return Err(Error::Closed);
                }
            }
        }
    }

    async fn ack(&self, id: MessageId) -> Result<()> {
        let offset = usize::try_from(id.offset)
            .map_err(|_| Error::Connection(format!("no message at {id}")))?;
        let mut state = self.broker.lock();
        let published = state
            .topics
            .get(&self.topic)
            .map_or(0, |log| log.entries.len());
        if id.partition != PARTITION || offset >= published {
            return Err(Error::Connection(format!(
                "no message at {id} in topic {}",
                self.topic
            )));
        }
        if let Some(acks) = state.subscriptions.get_mut(&self.sub_key()) {
            acks.ack(offset as i64);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.shut() {
            debug!(topic = %self.topic, subscription = %self.subscription, "memory cursor closed");
        }
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.shut();
    }
}
