//! A small pub/sub client: subscribe to a topic, receive schema-encoded
//! messages with a timeout, and acknowledge them.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use avrosub::{AvroSchema, Client, InitialPosition, User, USER_SCHEMA};
//!
//! # async fn run() -> avrosub::Result<()> {
//! let client = Client::builder()
//!     .service_url("kafka://localhost:9092")
//!     .build()
//!     .await?;
//! let consumer = client
//!     .new_consumer(AvroSchema::<User>::new(USER_SCHEMA)?)
//!     .topic("my-topic-avro")
//!     .subscription_name("sub")
//!     .subscription_initial_position(InitialPosition::Earliest)
//!     .subscribe()
//!     .await?;
//! let message = consumer.receive(Duration::from_secs(3)).await?;
//! let user = message.value()?;
//! consumer.acknowledge(&message).await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
mod consumer;
pub mod drivers;
mod error;
pub mod models;
mod producer;
pub mod schema;

pub use client::{Client, ClientBuilder};
pub use consumer::{Consumer, ConsumerBuilder, SessionState};
pub use drivers::memory::MemoryBroker;
pub use error::{Error, Result};
pub use models::{InitialPosition, Message, MessageId, Subscription, User, USER_SCHEMA};
pub use producer::{Producer, ProducerBuilder};
pub use schema::{AvroEncoding, AvroSchema, Int32Schema, Schema, SchemaInfo, SchemaType};
