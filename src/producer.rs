use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::Client;
use crate::drivers::Connection;
use crate::error::{Error, Result};
use crate::models::{validate_topic, MessageId, OutgoingMessage};
use crate::schema::Schema;

pub struct ProducerBuilder<'a, T> {
    client: &'a Client,
    schema: Arc<dyn Schema<T>>,
    topic: Option<String>,
    producer_name: Option<String>,
}

impl<'a, T> ProducerBuilder<'a, T> {
    pub(crate) fn new(client: &'a Client, schema: Arc<dyn Schema<T>>) -> Self {
        Self {
            client,
            schema,
            topic: None,
            producer_name: None,
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn producer_name(mut self, name: impl Into<String>) -> Self {
        self.producer_name = Some(name.into());
        self
    }

    pub async fn create(self) -> Result<Producer<T>> {
        let shutdown = self.client.shutdown_signal()?;
        let topic = self
            .topic
            .ok_or_else(|| Error::Config("producer topic is not set".to_owned()))?;
        validate_topic(&topic)?;
        let name = self
            .producer_name
            .unwrap_or_else(|| format!("producer-{}", Uuid::new_v4().simple()));
        info!(producer = %name, %topic, schema = %self.schema.info().name, "producer created");
        Ok(Producer {
            name,
            topic,
            schema: self.schema,
            connection: Arc::clone(self.client.connection()),
            shutdown,
        })
    }
}

/// Encodes values with a schema and publishes them to one topic.
pub struct Producer<T> {
    name: String,
    topic: String,
    schema: Arc<dyn Schema<T>>,
    connection: Arc<dyn Connection>,
    shutdown: watch::Receiver<bool>,
}

impl<T> Producer<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn send(&self, value: &T) -> Result<MessageId> {
        self.publish(None, value).await
    }

    pub async fn send_with_key(&self, key: impl Into<String>, value: &T) -> Result<MessageId> {
        self.publish(Some(key.into()), value).await
    }

    async fn publish(&self, key: Option<String>, value: &T) -> Result<MessageId> {
        if *self.shutdown.borrow() {
            return Err(Error::Closed);
        }
        let payload = self.schema.encode(value)?;
        let id = self
            .connection
            .send(&self.topic, OutgoingMessage { key, payload })
            .await?;
        debug!(producer = %self.name, topic = %self.topic, %id, "sent");
        Ok(id)
    }
}
