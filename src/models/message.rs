use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::schema::Schema;

/// Position of a message within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    pub partition: i32,
    pub offset: i64,
}

impl MessageId {
    pub fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.offset)
    }
}

/// A message as delivered by a transport, payload still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub id: MessageId,
    pub key: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub payload: Vec<u8>,
}

/// An encoded message on its way to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// A received message together with the schema needed to decode it.
///
/// The payload is decoded on demand by [`Message::value`], so a payload
/// that fails to decode can still be acknowledged and skipped.
pub struct Message<T> {
    raw: RawMessage,
    schema: Arc<dyn Schema<T>>,
    consumer_id: Uuid,
    acked: AtomicBool,
}

impl<T> Message<T> {
    pub(crate) fn new(raw: RawMessage, schema: Arc<dyn Schema<T>>, consumer_id: Uuid) -> Self {
        Self {
            raw,
            schema,
            consumer_id,
            acked: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.raw.topic
    }

    pub fn id(&self) -> MessageId {
        self.raw.id
    }

    pub fn key(&self) -> Option<&str> {
        self.raw.key.as_deref()
    }

    pub fn publish_time(&self) -> Option<DateTime<Utc>> {
        self.raw.publish_time
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw.payload
    }

    /// Decode the payload with the consumer's schema.
    pub fn value(&self) -> Result<T> {
        self.schema.decode(&self.raw.payload)
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    pub(crate) fn consumer_id(&self) -> Uuid {
        self.consumer_id
    }

    /// Returns true only for the first caller.
    pub(crate) fn mark_acknowledged(&self) -> bool {
        !self.acked.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_acknowledged(&self) {
        self.acked.store(false, Ordering::Release);
    }
}

impl<T> fmt::Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.raw.topic)
            .field("id", &self.raw.id)
            .field("key", &self.raw.key)
            .field("publish_time", &self.raw.publish_time)
            .field("payload_len", &self.raw.payload.len())
            .field("schema", &self.schema.info().name)
            .field("acked", &self.is_acknowledged())
            .finish()
    }
}
