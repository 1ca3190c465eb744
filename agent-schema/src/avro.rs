//! Binary Avro codec.

use apache_avro::Schema as ParsedSchema;
use serde_json::Value;
use tracing::debug;

use crate::schema::AVRO_MIME_TYPE;
use crate::{Message, MessageType, Schema, SchemaError, SchemaRegistry, SchemaResult};

/// Schema backed by an Avro named type.
///
/// The identity is the full name of the record (`namespace.name`). Schemas
/// already present in the registry are made available as named references, so
/// a record may use types declared by previously loaded schemas.
#[derive(Debug)]
pub struct AvroSchema {
    id: String,
    title: String,
    raw: String,
    schema: ParsedSchema,
    schemata: Vec<ParsedSchema>,
}

impl AvroSchema {
    /// Parses `raw`, resolving references against the Avro schemas currently
    /// held by `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Avro`] when parsing fails and
    /// [`SchemaError::MissingIdentity`] when the schema is not a named type.
    pub fn load(raw: impl Into<String>, registry: &SchemaRegistry) -> SchemaResult<Self> {
        let raw = raw.into();
        let document: Value = serde_json::from_str(&raw)?;
        let title = document
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let id = full_name(&document)?;

        let references: Vec<_> = registry
            .by_mime_type(AVRO_MIME_TYPE)
            .into_iter()
            .filter(|schema| schema.id() != id)
            .collect();
        let mut inputs: Vec<&str> = references.iter().map(|schema| schema.raw()).collect();
        inputs.push(&raw);

        let schemata = ParsedSchema::parse_list(&inputs)?;
        let schema = schemata
            .last()
            .cloned()
            .ok_or_else(|| SchemaError::invalid("avro parser returned no schema"))?;
        debug!(schema_id = %id, references = references.len(), "loaded avro schema");

        Ok(Self {
            id,
            title,
            raw,
            schema,
            schemata,
        })
    }

    /// Returns the parsed Avro schema.
    #[must_use]
    pub fn parsed(&self) -> &ParsedSchema {
        &self.schema
    }
}

fn full_name(document: &Value) -> SchemaResult<String> {
    let missing = |reason: &str| SchemaError::MissingIdentity {
        mime_type: AVRO_MIME_TYPE,
        reason: reason.into(),
    };
    let name = document
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| missing("avro schema must be a named type"))?;
    if name.contains('.') {
        return Ok(name.to_owned());
    }
    match document.get("namespace").and_then(Value::as_str) {
        Some(namespace) if !namespace.is_empty() => Ok(format!("{namespace}.{name}")),
        _ => Ok(name.to_owned()),
    }
}

impl Schema for AvroSchema {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn mime_type(&self) -> &'static str {
        AVRO_MIME_TYPE
    }

    fn raw(&self) -> &str {
        &self.raw
    }

    fn decode(&self, bytes: &[u8], ty: &MessageType) -> SchemaResult<Box<dyn Message>> {
        let mut reader = bytes;
        let value = apache_avro::from_avro_datum_schemata(
            &self.schema,
            self.schemata.iter().collect(),
            &mut reader,
            None,
        )?;
        Ok(ty.from_avro(value)?)
    }

    fn encode(&self, value: &dyn Message) -> SchemaResult<Vec<u8>> {
        let value = value.to_avro()?;
        Ok(apache_avro::to_avro_datum_schemata(
            &self.schema,
            self.schemata.iter().collect(),
            value,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::*;

    const ADDRESS: &str = r#"{
        "type": "record",
        "name": "Address",
        "namespace": "demo.people",
        "fields": [
            {"name": "street", "type": "string"},
            {"name": "city", "type": "string"}
        ]
    }"#;

    const PERSON: &str = r#"{
        "type": "record",
        "name": "Person",
        "namespace": "demo.people",
        "title": "A person",
        "fields": [
            {"name": "name", "type": "string"},
            {"name": "age", "type": "long"},
            {"name": "home", "type": "demo.people.Address"}
        ]
    }"#;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Address {
        street: String,
        city: String,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Person {
        name: String,
        age: i64,
        home: Address,
    }

    #[test]
    fn identity_is_the_full_name() {
        let registry = SchemaRegistry::new();
        let schema = AvroSchema::load(ADDRESS, &registry).unwrap();

        assert_eq!(schema.id(), "demo.people.Address");
        assert_eq!(schema.title(), "");
        assert_eq!(schema.mime_type(), AVRO_MIME_TYPE);
    }

    #[test]
    fn round_trip_with_cross_schema_reference() {
        let registry = SchemaRegistry::new();
        let address = AvroSchema::load(ADDRESS, &registry).unwrap();
        registry.register(Arc::new(address));
        let person = AvroSchema::load(PERSON, &registry).unwrap();
        assert_eq!(person.id(), "demo.people.Person");
        assert_eq!(person.title(), "A person");

        let value = Person {
            name: "Ada".into(),
            age: 36,
            home: Address {
                street: "12 Analytical Row".into(),
                city: "London".into(),
            },
        };
        let bytes = person.encode(&value).unwrap();
        let decoded = person
            .decode(&bytes, &MessageType::of::<Person>())
            .unwrap();

        assert_eq!(decoded.as_any().downcast_ref::<Person>(), Some(&value));
    }

    #[test]
    fn unresolved_reference_fails_to_load() {
        let registry = SchemaRegistry::new();
        let err = AvroSchema::load(PERSON, &registry).expect_err("address is unknown");
        assert!(matches!(err, SchemaError::Avro { .. }));
    }

    #[test]
    fn unnamed_schema_is_rejected() {
        let registry = SchemaRegistry::new();
        let err = AvroSchema::load(r#"{"type": "string"}"#, &registry).expect_err("unnamed");
        assert!(matches!(err, SchemaError::MissingIdentity { .. }));
    }
}
