use std::marker::PhantomData;

use apache_avro::rabin::Rabin;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::schema::{Schema, SchemaInfo, SchemaType};

/// Two-byte marker opening an Avro single-object encoded payload.
const SINGLE_OBJECT_MARKER: [u8; 2] = [0xC3, 0x01];
const FINGERPRINT_LEN: usize = 8;
const HEADER_LEN: usize = SINGLE_OBJECT_MARKER.len() + FINGERPRINT_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvroEncoding {
    /// Marker, schema fingerprint, then the binary datum. Payloads carry
    /// enough to detect a reader/writer schema mismatch.
    #[default]
    SingleObject,
    /// Bare binary datum; the schema travels out of band.
    Datum,
}

/// Avro schema for a serde-mapped record type `T`.
pub struct AvroSchema<T> {
    info: SchemaInfo,
    schema: apache_avro::Schema,
    fingerprint: Vec<u8>,
    encoding: AvroEncoding,
    _record: PhantomData<fn() -> T>,
}

impl<T> AvroSchema<T> {
    /// Compile a JSON schema definition using single-object encoding.
    pub fn new(definition: &str) -> Result<Self> {
        Self::with_encoding(definition, AvroEncoding::SingleObject)
    }

    /// Compile a JSON schema definition using bare datum encoding.
    pub fn datum(definition: &str) -> Result<Self> {
        Self::with_encoding(definition, AvroEncoding::Datum)
    }

    pub fn with_encoding(definition: &str, encoding: AvroEncoding) -> Result<Self> {
        let schema = apache_avro::Schema::parse_str(definition)
            .map_err(|e| Error::InvalidSchema(e.to_string()))?;
        let name = schema
            .name()
            .map(|n| n.fullname(None))
            .unwrap_or_else(|| "avro".to_owned());
        let fingerprint = schema.fingerprint::<Rabin>().bytes;
        Ok(Self {
            info: SchemaInfo {
                schema_type: SchemaType::Avro,
                name,
                definition: definition.to_owned(),
            },
            schema,
            fingerprint,
            encoding,
            _record: PhantomData,
        })
    }

    pub fn encoding(&self) -> AvroEncoding {
        self.encoding
    }

    /// CRC-64-AVRO fingerprint of the schema, little-endian.
    pub fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }

    fn strip_header<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8]> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::SchemaMismatch(format!(
                "payload of {} bytes is shorter than the single-object header",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        if header[..2] != SINGLE_OBJECT_MARKER {
            return Err(Error::SchemaMismatch(
                "missing single-object marker".to_owned(),
            ));
        }
        if header[2..] != self.fingerprint[..] {
            return Err(Error::SchemaMismatch(format!(
                "payload written with a different schema than {}",
                self.info.name
            )));
        }
        Ok(body)
    }
}

impl<T> Schema<T> for AvroSchema<T>
where
    T: Serialize + DeserializeOwned,
{
    fn info(&self) -> &SchemaInfo {
        &self.info
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        let value = apache_avro::to_value(value)?.resolve(&self.schema)?;
        let datum = apache_avro::to_avro_datum(&self.schema, value)?;
        match self.encoding {
            AvroEncoding::Datum => Ok(datum),
            AvroEncoding::SingleObject => {
                let mut out = Vec::with_capacity(HEADER_LEN + datum.len());
                out.extend_from_slice(&SINGLE_OBJECT_MARKER);
                out.extend_from_slice(&self.fingerprint);
                out.extend_from_slice(&datum);
                Ok(out)
            }
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        let mut body = match self.encoding {
            AvroEncoding::SingleObject => self.strip_header(bytes)?,
            AvroEncoding::Datum => bytes,
        };
        let value = apache_avro::from_avro_datum(&self.schema, &mut body, None)?;
        if !body.is_empty() {
            return Err(Error::SchemaMismatch(format!(
                "{} trailing bytes after {} datum",
                body.len(),
                self.info.name
            )));
        }
        Ok(apache_avro::from_value::<T>(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::models::{User, USER_SCHEMA};

    const PROFILE_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Profile",
        "fields": [
            {"name": "nickname", "type": ["null", "string"], "default": null},
            {"name": "score", "type": "long"}
        ]
    }"#;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        nickname: Option<String>,
        score: i64,
    }

    #[test]
    fn datum_matches_reference_wire_layout() {
        let schema = AvroSchema::<User>::datum(USER_SCHEMA).unwrap();
        let bytes = schema.encode(&User::new("xyz", 18)).unwrap();
        // age=18, union branch 1 (string), length 3, "xyz"
        assert_eq!(bytes, vec![0x24, 0x02, 0x06, b'x', b'y', b'z']);
        assert_eq!(schema.decode(&bytes).unwrap(), User::new("xyz", 18));
    }

    #[test]
    fn single_object_carries_fingerprint() {
        let schema = AvroSchema::<User>::new(USER_SCHEMA).unwrap();
        let bytes = schema.encode(&User::new("xyz", 18)).unwrap();
        assert_eq!(bytes[..2], SINGLE_OBJECT_MARKER);
        assert_eq!(&bytes[2..HEADER_LEN], schema.fingerprint());
        assert_eq!(bytes.len(), HEADER_LEN + 6);
        assert_eq!(schema.info().name, "org.example.User");
    }

    #[test]
    fn round_trips_records() {
        let schema = AvroSchema::<User>::new(USER_SCHEMA).unwrap();
        for user in [
            User::default(),
            User::new("xyz", 18),
            User::new("ünïcödé ✓", i32::MIN),
            User::new("x".repeat(4096), i32::MAX),
        ] {
            let bytes = schema.encode(&user).unwrap();
            assert_eq!(schema.decode(&bytes).unwrap(), user);
        }
    }

    #[test]
    fn round_trips_optional_fields() {
        let schema = AvroSchema::<Profile>::new(PROFILE_SCHEMA).unwrap();
        for profile in [
            Profile { nickname: None, score: -5 },
            Profile { nickname: Some("ace".to_owned()), score: i64::MAX },
        ] {
            let bytes = schema.encode(&profile).unwrap();
            assert_eq!(schema.decode(&bytes).unwrap(), profile);
        }
    }

    #[test]
    fn absent_fields_take_their_schema_defaults() {
        const ACCOUNT_SCHEMA: &str = r#"{
            "type": "record",
            "name": "Account",
            "fields": [
                {"name": "nickname", "type": ["null", "string"], "default": null},
                {"name": "region", "type": "string", "default": "eu"},
                {"name": "score", "type": "long"}
            ]
        }"#;

        #[derive(Serialize, Deserialize)]
        struct NewAccount {
            score: i64,
        }

        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Account {
            nickname: Option<String>,
            region: String,
            score: i64,
        }

        let bytes = AvroSchema::<NewAccount>::new(ACCOUNT_SCHEMA)
            .unwrap()
            .encode(&NewAccount { score: 7 })
            .unwrap();
        let account = AvroSchema::<Account>::new(ACCOUNT_SCHEMA)
            .unwrap()
            .decode(&bytes)
            .unwrap();
        assert_eq!(
            account,
            Account {
                nickname: None,
                region: "eu".to_owned(),
                score: 7,
            }
        );
    }

    #[test]
    fn other_writer_schema_is_a_mismatch() {
        let writer = AvroSchema::<Profile>::new(PROFILE_SCHEMA).unwrap();
        let reader = AvroSchema::<User>::new(USER_SCHEMA).unwrap();
        let bytes = writer
            .encode(&Profile { nickname: None, score: 1 })
            .unwrap();
        assert!(matches!(reader.decode(&bytes), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn malformed_payloads_are_mismatches() {
        let single = AvroSchema::<User>::new(USER_SCHEMA).unwrap();
        let datum = AvroSchema::<User>::datum(USER_SCHEMA).unwrap();

        assert!(matches!(single.decode(&[0xC3]), Err(Error::SchemaMismatch(_))));
        assert!(matches!(
            single.decode(&[0u8; HEADER_LEN + 2]),
            Err(Error::SchemaMismatch(_))
        ));
        // age only, union branch missing
        assert!(matches!(datum.decode(&[0x24]), Err(Error::SchemaMismatch(_))));

        let mut trailing = datum.encode(&User::new("xyz", 18)).unwrap();
        trailing.push(0);
        assert!(matches!(datum.decode(&trailing), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn invalid_definition_is_rejected() {
        assert!(matches!(
            AvroSchema::<User>::new("{\"type\": \"record\""),
            Err(Error::InvalidSchema(_))
        ));
    }
}
