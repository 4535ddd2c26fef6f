use std::fmt;

use crate::error::{Error, Result};

const MAX_TOPIC_LEN: usize = 249;

/// Where a subscription without acknowledged history starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPosition {
    /// The earliest retained entry of the topic.
    Earliest,
    /// The head of the log: only messages published after subscribing.
    #[default]
    Latest,
}

impl InitialPosition {
    /// Value of the Kafka `auto.offset.reset` property.
    pub fn as_offset_reset(&self) -> &'static str {
        match self {
            InitialPosition::Earliest => "earliest",
            InitialPosition::Latest => "latest",
        }
    }
}

impl fmt::Display for InitialPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_offset_reset())
    }
}

/// A named, durable subscription on a topic. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    topic: String,
    name: String,
    initial_position: InitialPosition,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        name: impl Into<String>,
        initial_position: InitialPosition,
    ) -> Result<Self> {
        let topic = topic.into();
        let name = name.into();
        validate_topic(&topic)?;
        if name.trim().is_empty() {
            return Err(Error::InvalidSubscription(
                "subscription name must not be empty".to_owned(),
            ));
        }
        Ok(Self {
            topic,
            name,
            initial_position,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_position(&self) -> InitialPosition {
        self.initial_position
    }
}

/// Checks a topic name against the legal character set and length.
pub(crate) fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::invalid_topic(topic, "name is empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::invalid_topic(
            topic,
            format!("name is longer than {MAX_TOPIC_LEN} characters"),
        ));
    }
    if topic == "." || topic == ".." {
        return Err(Error::invalid_topic(topic, "name is reserved"));
    }
    if let Some(c) = topic
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::invalid_topic(
            topic,
            format!("illegal character {c:?}"),
        ));
    }
    Ok(())
}
