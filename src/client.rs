use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ServiceUrl};
use crate::consumer::{ConsumerBuilder, SessionState};
use crate::drivers::kafka::KafkaConnection;
use crate::drivers::{Connection, Cursor};
use crate::error::{Error, Result};
use crate::producer::ProducerBuilder;
use crate::schema::Schema;

#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.config.service_url = Some(url.into());
        self
    }

    /// Bound on connection checks, sends and flushes.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Set a transport property, e.g. `security.protocol`.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.properties.push((key.into(), value.into()));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the configured service URL.
    pub async fn build(self) -> Result<Client> {
        let url = self
            .config
            .service_url
            .as_deref()
            .ok_or_else(|| Error::Config("service url is not set".to_owned()))?
            .parse::<ServiceUrl>()?;
        debug!(%url, from = %SessionState::Disconnected, "connecting");
        let connection = match &url {
            ServiceUrl::Kafka { bootstrap_servers } => {
                KafkaConnection::connect(
                    bootstrap_servers,
                    &self.config.properties,
                    self.config.operation_timeout,
                )
                .await?
            }
        };
        info!(%url, "client connected");
        Ok(Client::with_connection(Arc::new(connection)))
    }
}

/// Owns a broker connection. Consumers and producers created from a client
/// stop working once it is closed or dropped.
pub struct Client {
    connection: Arc<dyn Connection>,
    shutdown: watch::Sender<bool>,
    // cursors of live consumers, closed along with the client
    cursors: Mutex<Vec<Weak<dyn Cursor>>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Wrap an already established transport, such as a
    /// [`crate::MemoryBroker`].
    pub fn with_connection(connection: Arc<dyn Connection>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            connection,
            shutdown,
            cursors: Mutex::new(Vec::new()),
        }
    }

    pub fn new_consumer<T, S>(&self, schema: S) -> ConsumerBuilder<'_, T>
    where
        S: Schema<T> + 'static,
    {
        ConsumerBuilder::new(self, Arc::new(schema))
    }

    pub fn new_producer<T, S>(&self, schema: S) -> ProducerBuilder<'_, T>
    where
        S: Schema<T> + 'static,
    {
        ProducerBuilder::new(self, Arc::new(schema))
    }

    pub fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else {
            SessionState::Connected
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Close every consumer and producer of this client, then the connection.
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.shutdown.send_replace(true) {
            return Ok(());
        }
        info!("closing client");
        let cursors: Vec<_> = self
            .lock_cursors()
            .drain(..)
            .filter_map(|cursor| cursor.upgrade())
            .collect();
        for cursor in cursors {
            if let Err(e) = cursor.close().await {
                warn!(error = %e, "failed to close consumer cursor");
            }
        }
        self.connection.close().await
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Register a consumer's cursor to be closed with the client. Fails if
    /// the client already closed.
    pub(crate) fn track(&self, cursor: &Arc<dyn Cursor>) -> Result<()> {
        let mut cursors = self.lock_cursors();
        // checked under the lock so `close` cannot miss this cursor
        if self.is_closed() {
            return Err(Error::Closed);
        }
        cursors.retain(|cursor| cursor.strong_count() > 0);
        cursors.push(Arc::downgrade(cursor));
        Ok(())
    }

    fn lock_cursors(&self) -> std::sync::MutexGuard<'_, Vec<Weak<dyn Cursor>>> {
        self.cursors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A receiver that observes this client closing; fails if it already has.
    pub(crate) fn shutdown_signal(&self) -> Result<watch::Receiver<bool>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(self.shutdown.subscribe())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.shutdown.send_replace(true) {
            debug!("client dropped without close");
        }
    }
}
