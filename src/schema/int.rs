use crate::error::{Error, Result};
use crate::schema::{Schema, SchemaInfo, SchemaType};

/// A 32-bit signed integer, 4 bytes big-endian.
#[derive(Debug, Clone)]
pub struct Int32Schema {
    info: SchemaInfo,
}

impl Int32Schema {
    pub fn new() -> Self {
        Self {
            info: SchemaInfo {
                schema_type: SchemaType::Int32,
                name: "INT32".to_owned(),
                definition: String::new(),
            },
        }
    }
}

impl Default for Int32Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema<i32> for Int32Schema {
    fn info(&self) -> &SchemaInfo {
        &self.info
    }

    fn encode(&self, value: &i32) -> Result<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    // Bytes past the first four are ignored.
    fn decode(&self, bytes: &[u8]) -> Result<i32> {
        match bytes.get(..4) {
            Some(head) => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(head);
                Ok(i32::from_be_bytes(buf))
            }
            None => Err(Error::SchemaMismatch(format!(
                "wrong int32 size {}",
                bytes.len()
            ))),
        }
    }
}
