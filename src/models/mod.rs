mod message;
mod subscription;
mod user;

pub use message::{Message, MessageId, OutgoingMessage, RawMessage};
pub(crate) use subscription::validate_topic;
pub use subscription::{InitialPosition, Subscription};
pub use user::{User, USER_SCHEMA};
