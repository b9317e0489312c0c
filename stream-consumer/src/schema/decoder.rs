use std::sync::Arc;

use thiserror::Error;

use crate::kafka::batch::FetchedRecord;
use crate::schema::registry::SchemaRegistry;
use crate::schema::wire::{split_wire_payload, WireFormatError};

/// What a record decoded to.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    /// The topic is schema-bound and the payload decoded through its
    /// registered schema.
    Typed {
        schema_id: u32,
        value: serde_json::Value,
    },
    /// The topic has no registered schema; the payload passes through
    /// untouched for the topic handler to interpret.
    Raw(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record has no payload")]
    EmptyPayload,

    #[error("wire format error: {0}")]
    WireFormat(#[from] WireFormatError),

    #[error("no schema registered for id {0}")]
    UnknownSchemaId(u32),

    #[error("schema {schema_id} decode failed: {source}")]
    Decode {
        schema_id: u32,
        source: anyhow::Error,
    },
}

/// Turns a raw payload plus its wire-format header into a typed value,
/// dispatched by topic through the shared schema registry.
#[derive(Clone)]
pub struct RecordDecoder {
    registry: Arc<SchemaRegistry>,
}

impl RecordDecoder {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Decode one record. A failure here is a per-record condition; the
    /// caller decides what "handled" means for a record that cannot decode.
    pub fn decode(&self, record: &FetchedRecord) -> Result<DecodedPayload, DecodeError> {
        let payload = record
            .payload
            .as_deref()
            .ok_or(DecodeError::EmptyPayload)?;

        if !self.registry.is_topic_bound(record.topic()) {
            return Ok(DecodedPayload::Raw(payload.to_vec()));
        }

        let (schema_id, body) = split_wire_payload(payload)?;
        let descriptor = self
            .registry
            .by_id(schema_id)
            .ok_or(DecodeError::UnknownSchemaId(schema_id))?;

        let value = descriptor
            .decode(body)
            .map_err(|source| DecodeError::Decode { schema_id, source })?;

        Ok(DecodedPayload::Typed { schema_id, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::Partition;
    use crate::schema::registry::json_decode_fn;
    use crate::schema::wire::WIRE_FORMAT_MAGIC;
    use std::time::SystemTime;

    fn wire_payload(schema_id: u32, body: &[u8]) -> Vec<u8> {
        let mut out = vec![WIRE_FORMAT_MAGIC];
        out.extend_from_slice(&schema_id.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn record(topic: &str, payload: Option<Vec<u8>>) -> FetchedRecord {
        FetchedRecord::new(
            Partition::new(topic.to_string(), 0),
            1,
            None,
            payload,
            vec![],
            SystemTime::now(),
        )
    }

    fn decoder_with_cars_schema() -> RecordDecoder {
        let mut registry = SchemaRegistry::new();
        registry.register(7, "cars", json_decode_fn()).unwrap();
        RecordDecoder::new(Arc::new(registry))
    }

    #[test]
    fn bound_topic_decodes_through_schema() {
        let decoder = decoder_with_cars_schema();
        let rec = record("cars", Some(wire_payload(7, br#"{"make":"Toyota"}"#)));

        match decoder.decode(&rec).unwrap() {
            DecodedPayload::Typed { schema_id, value } => {
                assert_eq!(schema_id, 7);
                assert_eq!(value["make"], "Toyota");
            }
            other => panic!("expected typed payload, got {other:?}"),
        }
    }

    #[test]
    fn unbound_topic_passes_through_raw() {
        let decoder = decoder_with_cars_schema();
        let rec = record("messages", Some(b"plain text".to_vec()));

        assert_eq!(
            decoder.decode(&rec).unwrap(),
            DecodedPayload::Raw(b"plain text".to_vec())
        );
    }

    #[test]
    fn missing_payload_is_an_error() {
        let decoder = decoder_with_cars_schema();
        let rec = record("cars", None);
        assert!(matches!(
            decoder.decode(&rec),
            Err(DecodeError::EmptyPayload)
        ));
    }

    #[test]
    fn bad_wire_header_is_an_error() {
        let decoder = decoder_with_cars_schema();
        let rec = record("cars", Some(b"\x42rest".to_vec()));
        assert!(matches!(
            decoder.decode(&rec),
            Err(DecodeError::WireFormat(WireFormatError::BadMagic(0x42)))
        ));
    }

    #[test]
    fn unknown_schema_id_is_an_error() {
        let decoder = decoder_with_cars_schema();
        let rec = record("cars", Some(wire_payload(99, b"{}")));
        assert!(matches!(
            decoder.decode(&rec),
            Err(DecodeError::UnknownSchemaId(99))
        ));
    }

    #[test]
    fn schema_decode_failure_is_an_error() {
        let decoder = decoder_with_cars_schema();
        let rec = record("cars", Some(wire_payload(7, b"not json")));
        assert!(matches!(
            decoder.decode(&rec),
            Err(DecodeError::Decode { schema_id: 7, .. })
        ));
    }
}
