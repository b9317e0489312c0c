//! Schema-registry wire format: `[magic:1][schema-id:4 big-endian][payload]`.

use thiserror::Error;

/// Magic byte prefixing every registry-encoded payload.
pub const WIRE_FORMAT_MAGIC: u8 = 0x00;

/// Bytes occupied by the header: magic + big-endian schema id.
pub const WIRE_HEADER_LEN: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireFormatError {
    #[error("payload too short for wire-format header: {0} byte(s)")]
    TooShort(usize),

    #[error("bad wire-format magic byte: {0:#04x}")]
    BadMagic(u8),
}

/// Split a registry-encoded payload into its schema id and encoded body.
pub fn split_wire_payload(payload: &[u8]) -> Result<(u32, &[u8]), WireFormatError> {
    if payload.len() < WIRE_HEADER_LEN {
        return Err(WireFormatError::TooShort(payload.len()));
    }
    if payload[0] != WIRE_FORMAT_MAGIC {
        return Err(WireFormatError::BadMagic(payload[0]));
    }

    let schema_id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok((schema_id, &payload[WIRE_HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(schema_id: u32, body: &[u8]) -> Vec<u8> {
        let mut out = vec![WIRE_FORMAT_MAGIC];
        out.extend_from_slice(&schema_id.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn splits_header_and_body() {
        let payload = encode(7, br#"{"make":"Toyota"}"#);
        let (schema_id, body) = split_wire_payload(&payload).unwrap();
        assert_eq!(schema_id, 7);
        assert_eq!(body, br#"{"make":"Toyota"}"#);
    }

    #[test]
    fn schema_id_is_big_endian() {
        let payload = encode(0x0102_0304, b"");
        let (schema_id, body) = split_wire_payload(&payload).unwrap();
        assert_eq!(schema_id, 0x0102_0304);
        assert!(body.is_empty());
    }

    #[test]
    fn rejects_short_payload() {
        assert_eq!(
            split_wire_payload(&[WIRE_FORMAT_MAGIC, 0, 0]),
            Err(WireFormatError::TooShort(3))
        );
        assert_eq!(split_wire_payload(&[]), Err(WireFormatError::TooShort(0)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut payload = encode(1, b"x");
        payload[0] = 0x42;
        assert_eq!(
            split_wire_payload(&payload),
            Err(WireFormatError::BadMagic(0x42))
        );
    }
}
