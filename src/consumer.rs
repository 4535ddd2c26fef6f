use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::Client;
use crate::drivers::Cursor;
use crate::error::{Error, Result};
use crate::models::{InitialPosition, Message, RawMessage, Subscription};
use crate::schema::Schema;

/// Lifecycle of a client connection and the consumer sessions on it.
///
/// `Disconnected -> Connected -> Subscribed -> [Receiving <-> Idle] -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Subscribed,
    Receiving,
    Idle,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Subscribed => "subscribed",
            SessionState::Receiving => "receiving",
            SessionState::Idle => "idle",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub struct ConsumerBuilder<'a, T> {
    client: &'a Client,
    schema: Arc<dyn Schema<T>>,
    topic: Option<String>,
    subscription_name: Option<String>,
    initial_position: InitialPosition,
    consumer_name: Option<String>,
}

impl<'a, T> ConsumerBuilder<'a, T> {
    pub(crate) fn new(client: &'a Client, schema: Arc<dyn Schema<T>>) -> Self {
        Self {
            client,
            schema,
            topic: None,
            subscription_name: None,
            initial_position: InitialPosition::default(),
            consumer_name: None,
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn subscription_name(mut self, name: impl Into<String>) -> Self {
        self.subscription_name = Some(name.into());
        self
    }

    pub fn subscription_initial_position(mut self, position: InitialPosition) -> Self {
        self.initial_position = position;
        self
    }

    /// Name used in logs; a random one is generated when unset.
    pub fn consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }

    pub async fn subscribe(self) -> Result<Consumer<T>> {
        let shutdown = self.client.shutdown_signal()?;
        let topic = self
            .topic
            .ok_or_else(|| Error::Config("consumer topic is not set".to_owned()))?;
        let name = self
            .subscription_name
            .ok_or_else(|| Error::Config("subscription name is not set".to_owned()))?;
        let subscription = Subscription::new(topic, name, self.initial_position)?;

        let cursor: Arc<dyn Cursor> =
            Arc::from(self.client.connection().subscribe(&subscription).await?);
        if let Err(e) = self.client.track(&cursor) {
            cursor.close().await?;
            return Err(e);
        }
        let id = Uuid::new_v4();
        let name = self
            .consumer_name
            .unwrap_or_else(|| format!("consumer-{}", id.simple()));
        info!(
            consumer = %name,
            topic = subscription.topic(),
            subscription = subscription.name(),
            position = %subscription.initial_position(),
            schema = %self.schema.info().name,
            "subscribed"
        );

        let (state, _) = watch::channel(SessionState::Subscribed);
        Ok(Consumer {
            id,
            name,
            subscription,
            schema: self.schema,
            cursor,
            state,
            shutdown,
        })
    }
}

/// A session on one subscription.
///
/// All methods take `&self`, so a consumer shared through an `Arc` can be
/// closed from another task while a receive is pending.
pub struct Consumer<T> {
    id: Uuid,
    name: String,
    subscription: Subscription,
    schema: Arc<dyn Schema<T>>,
    cursor: Arc<dyn Cursor>,
    state: watch::Sender<SessionState>,
    // flips to true when the owning client closes
    shutdown: watch::Receiver<bool>,
}

impl<T> Consumer<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn state(&self) -> SessionState {
        if *self.shutdown.borrow() {
            return SessionState::Closed;
        }
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// Fails with [`Error::Timeout`] if nothing arrives in time, and with
    /// [`Error::Closed`] if the consumer is or becomes closed.
    pub async fn receive(&self, timeout: Duration) -> Result<Message<T>> {
        self.receive_with(async {
            match time::timeout(timeout, self.cursor.next()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(timeout)),
            }
        })
        .await
    }

    /// Wait without a deadline for the next message.
    pub async fn recv(&self) -> Result<Message<T>> {
        self.receive_with(self.cursor.next()).await
    }

    /// Messages in delivery order until the consumer closes. Transport
    /// errors are yielded and do not end the stream.
    pub fn stream(&self) -> impl Stream<Item = Result<Message<T>>> + '_ {
        futures::stream::unfold(self, |consumer| async move {
            match consumer.recv().await {
                Err(Error::Closed) => None,
                result => Some((result, consumer)),
            }
        })
    }

    async fn receive_with<F>(&self, next: F) -> Result<Message<T>>
    where
        F: Future<Output = Result<RawMessage>>,
    {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.transition(SessionState::Receiving);
        let result = tokio::select! {
            biased;
            _ = self.closed() => Err(Error::Closed),
            raw = next => raw,
        };
        self.transition(SessionState::Idle);

        let raw = result?;
        debug!(consumer = %self.name, topic = %raw.topic, id = %raw.id, "received");
        Ok(Message::new(raw, Arc::clone(&self.schema), self.id))
    }

    /// Mark a message as consumed. Acknowledging a message twice is a no-op.
    pub async fn acknowledge(&self, message: &Message<T>) -> Result<()> {
        if message.consumer_id() != self.id {
            return Err(Error::ForeignMessage(message.id().to_string()));
        }
        if message.is_acknowledged() {
            return Ok(());
        }
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if !message.mark_acknowledged() {
            return Ok(());
        }
        if let Err(e) = self.cursor.ack(message.id()).await {
            message.clear_acknowledged();
            return Err(e);
        }
        debug!(consumer = %self.name, id = %message.id(), "acknowledged");
        Ok(())
    }

    /// Release the subscription. Pending and later receives fail with
    /// [`Error::Closed`]. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let first = self.state.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        if !first {
            return Ok(());
        }
        info!(consumer = %self.name, subscription = self.subscription.name(), "closing");
        self.cursor.close().await
    }

    fn transition(&self, to: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Closed || *state == to {
                false
            } else {
                *state = to;
                true
            }
        });
    }

    /// Resolves once this consumer or its client is closed.
    async fn closed(&self) {
        let mut state = self.state.subscribe();
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = state.wait_for(|s| *s == SessionState::Closed) => {}
            _ = shutdown.wait_for(|closed| *closed) => {}
        }
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        let was_open = !self.is_closed();
        self.state.send_replace(SessionState::Closed);
        if was_open {
            // The cursor releases its broker resources when dropped.
            debug!(consumer = %self.name, "consumer dropped without close");
        }
    }
}
