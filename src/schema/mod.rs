//! Payload schemas: typed encoding and decoding of message bodies.

mod avro;
mod int;

use std::fmt;

pub use avro::{AvroEncoding, AvroSchema};
pub use int::Int32Schema;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Avro,
    Int32,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaType::Avro => f.write_str("AVRO"),
            SchemaType::Int32 => f.write_str("INT32"),
        }
    }
}

/// Describes a schema to peers and to logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    pub schema_type: SchemaType,
    pub name: String,
    /// Schema source text; empty for primitive schemas.
    pub definition: String,
}

/// Converts values of `T` to and from message payloads.
///
/// `decode` fails with [`crate::Error::SchemaMismatch`] when the bytes do not
/// have the layout the schema expects.
pub trait Schema<T>: Send + Sync {
    fn info(&self) -> &SchemaInfo;

    fn encode(&self, value: &T) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<T>;
}
