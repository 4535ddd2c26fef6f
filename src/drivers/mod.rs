//! Broker transports behind the client.
//!
//! A [`Connection`] publishes messages and opens subscriptions; each
//! subscription yields a [`Cursor`] that hands out messages in order and
//! records acknowledgments. Cursors must treat a repeated acknowledgment as
//! a no-op.

mod acks;
pub mod kafka;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{MessageId, OutgoingMessage, RawMessage, Subscription};

#[async_trait]
pub trait Connection: Send + Sync {
    async fn subscribe(&self, subscription: &Subscription) -> Result<Box<dyn Cursor>>;

    async fn send(&self, topic: &str, message: OutgoingMessage) -> Result<MessageId>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Cursor: Send + Sync {
    /// Wait for the next message of the subscription.
    async fn next(&self) -> Result<RawMessage>;

    /// Mark a delivered message as consumed. Acknowledgment is synchronous:
    /// once this returns the position is durable on the broker. The durable
    /// position is the first unacknowledged offset, so acking out of order
    /// never skips a message.
    async fn ack(&self, id: MessageId) -> Result<()>;

    /// Stop delivering. A pending `next` fails with `Closed`.
    async fn close(&self) -> Result<()>;
}
