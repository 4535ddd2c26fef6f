use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by clients, consumers, producers and schemas.
#[derive(Error, Debug)]
pub enum Error {
    /// The broker could not be reached or rejected a request.
    #[error("connection error: {0}")]
    Connection(String),

    /// No message arrived before the deadline. The caller may retry.
    #[error("no message received within {0:?}")]
    Timeout(Duration),

    /// The payload does not match the expected schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The consumer, producer or client has been closed.
    #[error("already closed")]
    Closed,

    #[error("invalid topic name '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("invalid subscription name: {0}")]
    InvalidSubscription(String),

    #[error("invalid schema definition: {0}")]
    InvalidSchema(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The message was received by a different consumer.
    #[error("message {0} was not received by this consumer")]
    ForeignMessage(String),
}

impl Error {
    /// Whether retrying the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub(crate) fn invalid_topic(topic: &str, reason: impl Into<String>) -> Self {
        Error::InvalidTopic {
            topic: topic.to_owned(),
            reason: reason.into(),
        }
    }
}

impl From<rdkafka::error::KafkaError> for Error {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        Error::Connection(e.to_string())
    }
}

impl From<apache_avro::Error> for Error {
    fn from(e: apache_avro::Error) -> Self {
        Error::SchemaMismatch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
