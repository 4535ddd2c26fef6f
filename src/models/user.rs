use serde::{Deserialize, Serialize};

/// Avro schema of [`User`]. The string field is nullable so the record stays
/// readable by clients that derive their schemas reflectively.
pub const USER_SCHEMA: &str = r#"{
    "type": "record",
    "namespace": "org.example",
    "name": "User",
    "fields": [
        {"name": "age", "type": "int"},
        {"name": "name", "type": ["null", "string"]}
    ]
}"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub name: String,
    pub age: i32,
}

impl User {
    pub fn new(name: impl Into<String>, age: i32) -> Self {
        Self {
            name: name.into(),
            age,
        }
    }
}
