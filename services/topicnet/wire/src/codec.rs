//! Encoding and decoding helpers for the wire protocol.
//!
//! This module provides the frame builder and CBOR metadata helpers used by
//! the handshake frames.

use crate::frame::{Flags, Frame, FrameKind};
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

/// CBOR metadata builder helper
#[derive(Debug, Clone)]
pub struct MetaBuilder {
    map: BTreeMap<String, ciborium::Value>,
}

impl MetaBuilder {
    /// Create a new metadata builder
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Insert a string value
    pub fn insert_str(mut self, key: &str, value: &str) -> Self {
        self.map
            .insert(key.to_string(), ciborium::Value::Text(value.to_string()));
        self
    }

    /// Insert a u32 value
    pub fn insert_u32(mut self, key: &str, value: u32) -> Self {
        self.map
            .insert(key.to_string(), ciborium::Value::Integer(value.into()));
        self
    }

    /// Insert binary data
    pub fn insert_bytes(mut self, key: &str, value: &[u8]) -> Self {
        self.map
            .insert(key.to_string(), ciborium::Value::Bytes(value.to_vec()));
        self
    }

    /// Insert a list of strings
    pub fn insert_str_list<S: AsRef<str>>(mut self, key: &str, values: &[S]) -> Self {
        let items = values
            .iter()
            .map(|v| ciborium::Value::Text(v.as_ref().to_string()))
            .collect();
        self.map.insert(key.to_string(), ciborium::Value::Array(items));
        self
    }

    /// Check whether no metadata was inserted
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Build the metadata as CBOR bytes
    pub fn build(self) -> Result<Bytes, CodecError> {
        let value = ciborium::Value::Map(
            self.map
                .into_iter()
                .map(|(k, v)| (ciborium::Value::Text(k), v))
                .collect(),
        );

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf).map_err(|_| CodecError::MetaEncode)?;

        Ok(Bytes::from(buf))
    }
}

impl Default for MetaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame builder for constructing wire frames
#[derive(Debug)]
pub struct FrameBuilder {
    kind: FrameKind,
    flags: Flags,
    topic: String,
    meta: MetaBuilder,
    payload: Bytes,
}

impl FrameBuilder {
    /// Create a new frame builder
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            flags: Flags::empty(),
            topic: String::new(),
            meta: MetaBuilder::new(),
            payload: Bytes::new(),
        }
    }

    /// Set the topic
    pub fn topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    /// Mark the payload as sealed
    pub fn sealed(mut self) -> Self {
        self.flags |= Flags::SEALED;
        self
    }

    /// Insert string metadata
    pub fn meta_insert_str(mut self, key: &str, value: &str) -> Self {
        self.meta = self.meta.insert_str(key, value);
        self
    }

    /// Insert u32 metadata
    pub fn meta_insert_u32(mut self, key: &str, value: u32) -> Self {
        self.meta = self.meta.insert_u32(key, value);
        self
    }

    /// Insert binary metadata
    pub fn meta_insert_bytes(mut self, key: &str, value: &[u8]) -> Self {
        self.meta = self.meta.insert_bytes(key, value);
        self
    }

    /// Insert a string list as metadata
    pub fn meta_insert_str_list<S: AsRef<str>>(mut self, key: &str, values: &[S]) -> Self {
        self.meta = self.meta.insert_str_list(key, values);
        self
    }

    /// Set payload
    pub fn payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Build the frame without encoding it
    pub fn into_frame(self) -> Result<Frame, CodecError> {
        let meta_raw = if self.meta.is_empty() {
            Bytes::new()
        } else {
            self.meta.build()?
        };

        Ok(Frame {
            kind: self.kind,
            flags: self.flags,
            topic: self.topic,
            meta_raw,
            payload: self.payload,
        })
    }

    /// Build and encode the frame
    pub fn build(self, max_frame: usize) -> Result<Bytes, CodecError> {
        self.into_frame()?.encode(max_frame).map_err(CodecError::Wire)
    }
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Wire protocol error
    #[error("wire error: {0}")]
    Wire(#[from] crate::WireError),
    /// Metadata encoding error
    #[error("metadata encoding failed")]
    MetaEncode,
    /// Metadata decoding error
    #[error("metadata decoding failed")]
    MetaDecode,
}

/// Parse CBOR metadata into a map
pub fn parse_meta(meta_raw: &[u8]) -> Result<BTreeMap<String, ciborium::Value>, CodecError> {
    if meta_raw.is_empty() {
        return Ok(BTreeMap::new());
    }

    let value: ciborium::Value =
        ciborium::from_reader(meta_raw).map_err(|_| CodecError::MetaDecode)?;

    if let ciborium::Value::Map(map) = value {
        let mut result = BTreeMap::new();
        for (key, value) in map {
            if let ciborium::Value::Text(key_str) = key {
                result.insert(key_str, value);
            }
        }
        Ok(result)
    } else {
        Err(CodecError::MetaDecode)
    }
}

/// Get string value from metadata
pub fn get_meta_str(meta: &BTreeMap<String, ciborium::Value>, key: &str) -> Option<String> {
    meta.get(key).and_then(|v| {
        if let ciborium::Value::Text(s) = v {
            Some(s.clone())
        } else {
            None
        }
    })
}

/// Get u32 value from metadata
pub fn get_meta_u32(meta: &BTreeMap<String, ciborium::Value>, key: &str) -> Option<u32> {
    meta.get(key).and_then(|v| {
        if let ciborium::Value::Integer(i) = v {
            (*i).try_into().ok()
        } else {
            None
        }
    })
}

/// Get binary value from metadata
pub fn get_meta_bytes(meta: &BTreeMap<String, ciborium::Value>, key: &str) -> Option<Vec<u8>> {
    meta.get(key).and_then(|v| {
        if let ciborium::Value::Bytes(b) = v {
            Some(b.clone())
        } else {
            None
        }
    })
}

/// Get string list from metadata; non-text items are skipped
pub fn get_meta_str_list(
    meta: &BTreeMap<String, ciborium::Value>,
    key: &str,
) -> Option<Vec<String>> {
    meta.get(key).and_then(|v| {
        if let ciborium::Value::Array(items) = v {
            Some(
                items
                    .iter()
                    .filter_map(|item| match item {
                        ciborium::Value::Text(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect(),
            )
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
    use bytes::BytesMut;

    #[test]
    fn test_meta_builder() {
        let meta = MetaBuilder::new()
            .insert_str("content-type", "application/cbor")
            .insert_u32("version", 1)
            .insert_bytes("public_key", b"key")
            .insert_str_list("topics", &["a", "b"])
            .build()
            .unwrap();

        let parsed = parse_meta(&meta).unwrap();
        assert_eq!(
            get_meta_str(&parsed, "content-type"),
            Some("application/cbor".to_string())
        );
        assert_eq!(get_meta_u32(&parsed, "version"), Some(1));
        assert_eq!(get_meta_bytes(&parsed, "public_key"), Some(b"key".to_vec()));
        assert_eq!(
            get_meta_str_list(&parsed, "topics"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(get_meta_str(&parsed, "missing"), None);
    }

    #[test]
    fn test_empty_meta_parses_to_empty_map() {
        assert!(parse_meta(&[]).unwrap().is_empty());
        assert!(parse_meta(&[0xFF, 0x00]).is_err());
    }

    #[test]
    fn test_frame_builder() {
        let frame_bytes = FrameBuilder::new(FrameKind::Hello)
            .meta_insert_u32("version", 1)
            .meta_insert_str_list("topics", &["robot"])
            .build(DEFAULT_MAX_FRAME_SIZE)
            .unwrap();

        let mut buf = BytesMut::from(&frame_bytes[..]);
        let frame = FrameDecoder::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Hello);
        assert!(!frame.is_sealed());

        let meta = parse_meta(&frame.meta_raw).unwrap();
        assert_eq!(
            get_meta_str_list(&meta, "topics"),
            Some(vec!["robot".to_string()])
        );
    }

    #[test]
    fn test_sealed_flag_survives_encoding() {
        let frame_bytes = FrameBuilder::new(FrameKind::Data)
            .topic("robot")
            .sealed()
            .payload(Bytes::from_static(b"cipher"))
            .build(DEFAULT_MAX_FRAME_SIZE)
            .unwrap();

        let mut buf = BytesMut::from(&frame_bytes[..]);
        let frame = FrameDecoder::new().decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_sealed());
        assert_eq!(frame.topic, "robot");
    }
}
