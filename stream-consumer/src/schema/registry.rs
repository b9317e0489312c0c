use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Decode function bound to one schema id. Takes the payload with the wire
/// header already stripped.
pub type DecodeFn =
    Arc<dyn Fn(&[u8]) -> Result<serde_json::Value, anyhow::Error> + Send + Sync>;

/// A registered schema: id, the topic it is bound to, and its decode
/// function. Lives for the process lifetime once registered.
#[derive(Clone)]
pub struct SchemaDescriptor {
    schema_id: u32,
    topic: String,
    decode: DecodeFn,
}

impl SchemaDescriptor {
    pub fn schema_id(&self) -> u32 {
        self.schema_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn decode(&self, payload: &[u8]) -> Result<serde_json::Value, anyhow::Error> {
        (self.decode)(payload)
    }
}

impl fmt::Debug for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDescriptor")
            .field("schema_id", &self.schema_id)
            .field("topic", &self.topic)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("schema id {0} is already registered")]
    DuplicateSchemaId(u32),

    #[error("topic '{0}' is already bound to schema id {1}")]
    DuplicateTopicBinding(String, u32),
}

/// Registry of schema descriptors, keyed by schema id and by topic binding.
///
/// Populated once at startup by the external registrar, then shared
/// read-only behind an `Arc`; decode calls never mutate it.
#[derive(Default)]
pub struct SchemaRegistry {
    by_id: HashMap<u32, SchemaDescriptor>,
    topic_bindings: HashMap<String, u32>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema id, its topic binding, and its decode function.
    pub fn register(
        &mut self,
        schema_id: u32,
        topic: impl Into<String>,
        decode: DecodeFn,
    ) -> Result<(), RegistryError> {
        let topic = topic.into();

        if self.by_id.contains_key(&schema_id) {
            return Err(RegistryError::DuplicateSchemaId(schema_id));
        }
        if let Some(existing) = self.topic_bindings.get(&topic) {
            return Err(RegistryError::DuplicateTopicBinding(topic, *existing));
        }

        self.topic_bindings.insert(topic.clone(), schema_id);
        self.by_id.insert(
            schema_id,
            SchemaDescriptor {
                schema_id,
                topic,
                decode,
            },
        );
        Ok(())
    }

    pub fn by_id(&self, schema_id: u32) -> Option<&SchemaDescriptor> {
        self.by_id.get(&schema_id)
    }

    /// Whether any schema is bound to `topic`. Topics without a binding
    /// pass through the decoder as raw bytes.
    pub fn is_topic_bound(&self, topic: &str) -> bool {
        self.topic_bindings.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// JSON decode function: the payload is a JSON document.
pub fn json_decode_fn() -> DecodeFn {
    Arc::new(|payload| {
        serde_json::from_slice(payload).map_err(anyhow::Error::from)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.register(7, "cars", json_decode_fn()).unwrap();

        assert!(registry.is_topic_bound("cars"));
        assert!(!registry.is_topic_bound("messages"));

        let descriptor = registry.by_id(7).unwrap();
        assert_eq!(descriptor.schema_id(), 7);
        assert_eq!(descriptor.topic(), "cars");

        let value = descriptor.decode(br#"{"make":"Toyota"}"#).unwrap();
        assert_eq!(value["make"], "Toyota");
    }

    #[test]
    fn duplicate_schema_id_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register(7, "cars", json_decode_fn()).unwrap();

        let err = registry.register(7, "trucks", json_decode_fn()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSchemaId(7)));
    }

    #[test]
    fn duplicate_topic_binding_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register(7, "cars", json_decode_fn()).unwrap();

        let err = registry.register(8, "cars", json_decode_fn()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTopicBinding(_, 7)));
    }

    #[test]
    fn decode_failure_propagates() {
        let mut registry = SchemaRegistry::new();
        registry.register(7, "cars", json_decode_fn()).unwrap();

        assert!(registry.by_id(7).unwrap().decode(b"not json").is_err());
    }
}
