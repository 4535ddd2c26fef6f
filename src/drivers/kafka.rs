//! Kafka transport. A subscription maps to a consumer group named after
//! it. Acknowledging commits the first unacknowledged offset of the
//! message's partition, so a restarted group resumes at the oldest message
//! still owed an ack.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::stream_consumer::StreamConsumer;
use rdkafka::consumer::{CommitMode, Consumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, info, warn};

use crate::drivers::acks::AckState;
use crate::drivers::{Connection, Cursor};
use crate::error::{Error, Result};
use crate::models::{validate_topic, MessageId, OutgoingMessage, RawMessage, Subscription};

pub struct KafkaConnection {
    config: ClientConfig,
    producer: FutureProducer,
    operation_timeout: Duration,
}

impl KafkaConnection {
    /// Create the client and verify the cluster answers a metadata request
    /// within `operation_timeout`.
    pub async fn connect(
        bootstrap_servers: &str,
        properties: &[(String, String)],
        operation_timeout: Duration,
    ) -> Result<Self> {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", bootstrap_servers);
        for (key, value) in properties {
            config.set(key, value);
        }

        let producer: FutureProducer = config
            .clone()
            .set(
                "message.timeout.ms",
                operation_timeout.as_millis().to_string(),
            )
            .create()?;

        let handle = producer.clone();
        let (brokers, topics) = task::spawn_blocking(move || {
            handle
                .client()
                .fetch_metadata(None, operation_timeout)
                .map(|metadata| (metadata.brokers().len(), metadata.topics().len()))
        })
        .await
        .map_err(|e| Error::Connection(format!("metadata request aborted: {e}")))?
        .map_err(|e| Error::Connection(format!("cannot reach {bootstrap_servers}: {e}")))?;
        info!(bootstrap_servers, brokers, topics, "connected to kafka");

        Ok(Self {
            config,
            producer,
            operation_timeout,
        })
    }
}

#[async_trait]
impl Connection for KafkaConnection {
    async fn subscribe(&self, subscription: &Subscription) -> Result<Box<dyn Cursor>> {
        let consumer: StreamConsumer = self
            .config
            .clone()
            .set("group.id", subscription.name())
            .set(
                "auto.offset.reset",
                subscription.initial_position().as_offset_reset(),
            )
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()?;
        consumer.subscribe(&[subscription.topic()])?;

        Ok(Box::new(KafkaCursor {
            topic: subscription.topic().to_owned(),
            consumer: Arc::new(consumer),
            offsets: Mutex::new(CommitTracker::default()),
            commit_gate: tokio::sync::Mutex::new(()),
            closed: watch::channel(false).0,
        }))
    }

    async fn send(&self, topic: &str, message: OutgoingMessage) -> Result<MessageId> {
        validate_topic(topic)?;
        let record: FutureRecord<'_, str, Vec<u8>> =
            FutureRecord::to(topic).payload(&message.payload);
        let record = match &message.key {
            Some(key) => record.key(key.as_str()),
            None => record,
        };
        let (partition, offset) = self
            .producer
            .send(record, self.operation_timeout)
            .await
            .map_err(|(e, _)| Error::from(e))?;
        Ok(MessageId::new(partition, offset))
    }

    async fn close(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.operation_timeout;
        task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::Connection(format!("flush aborted: {e}")))??;
        Ok(())
    }
}

struct KafkaCursor {
    topic: String,
    consumer: Arc<StreamConsumer>,
    offsets: Mutex<CommitTracker>,
    // held across a commit so committed offsets only ever grow
    commit_gate: tokio::sync::Mutex<()>,
    closed: watch::Sender<bool>,
}

impl KafkaCursor {
    fn offsets(&self) -> MutexGuard<'_, CommitTracker> {
        self.offsets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Cursor for KafkaCursor {
    async fn next(&self) -> Result<RawMessage> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(Error::Closed);
        }
        let raw = tokio::select! {
            msg = self.consumer.recv() => raw_message(&msg?),
            _ = async { closed.wait_for(|closed| *closed).await.is_ok() } => {
                return Err(Error::Closed);
            }
        };
        self.offsets().delivered(raw.id);
        Ok(raw)
    }

    async fn ack(&self, id: MessageId) -> Result<()> {
        let _gate = self.commit_gate.lock().await;
        let Some(offset) = self.offsets().ack(id)? else {
            debug!(topic = %self.topic, %id, "ack recorded behind an unacknowledged message");
            return Ok(());
        };

        let consumer = Arc::clone(&self.consumer);
        let topic = self.topic.clone();
        task::spawn_blocking(move || {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&topic, id.partition, Offset::Offset(offset))?;
            consumer.commit(&tpl, CommitMode::Sync)
        })
        .await
        .map_err(|e| Error::Connection(format!("commit aborted: {e}")))??;
        self.offsets().committed(id.partition, offset);
        debug!(topic = %self.topic, %id, offset, "committed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.send_replace(true) {
            self.consumer.unsubscribe();
            debug!(topic = %self.topic, "kafka cursor closed");
        }
        Ok(())
    }
}

/// Commit bookkeeping of one cursor, per partition.
///
/// A partition's first delivered offset is where the group resumed, so it
/// seeds the ack watermark. Only the watermark is ever committed.
#[derive(Debug, Default)]
struct CommitTracker {
    partitions: HashMap<i32, PartitionOffsets>,
}

#[derive(Debug)]
struct PartitionOffsets {
    acks: AckState,
    // one past the highest delivered offset
    delivered: i64,
    committed: i64,
}

impl CommitTracker {
    fn delivered(&mut self, id: MessageId) {
        let partition = self
            .partitions
            .entry(id.partition)
            .or_insert_with(|| PartitionOffsets {
                acks: AckState::starting_at(id.offset),
                delivered: id.offset,
                committed: id.offset,
            });
        partition.delivered = partition.delivered.max(id.offset + 1);
    }

    /// Record an ack. Returns the offset to commit when the first
    /// unacknowledged offset moved past the committed one.
    fn ack(&mut self, id: MessageId) -> Result<Option<i64>> {
        let partition = self
            .partitions
            .get_mut(&id.partition)
            .filter(|partition| id.offset < partition.delivered)
            .ok_or_else(|| Error::Connection(format!("message {id} was not delivered here")))?;
        partition.acks.ack(id.offset);
        let watermark = partition.acks.watermark();
        Ok((watermark > partition.committed).then_some(watermark))
    }

    fn committed(&mut self, partition: i32, offset: i64) {
        if let Some(partition) = self.partitions.get_mut(&partition) {
            partition.committed = partition.committed.max(offset);
        }
    }
}

fn raw_message<M: rdkafka::Message>(msg: &M) -> RawMessage {
    RawMessage {
        topic: msg.topic().to_owned(),
        id: MessageId::new(msg.partition(), msg.offset()),
        key: message_key(msg),
        publish_time: publish_time(msg),
        payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

fn message_key<M: rdkafka::Message>(msg: &M) -> Option<String> {
    let key = msg.key()?;
    match String::from_utf8(key.to_owned()) {
        Ok(key) => Some(key),
        Err(_) => {
            warn!(partition = msg.partition(), offset = msg.offset(), "dropping non-utf8 key");
            None
        }
    }
}

fn publish_time<M: rdkafka::Message>(msg: &M) -> Option<DateTime<Utc>> {
    let millis = msg.timestamp().to_millis()?;
    Utc.timestamp_millis_opt(millis).single()
}
