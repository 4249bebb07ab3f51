//! Message framing for the wire protocol.
//!
//! Every frame is length prefixed and carries the topic it belongs to in
//! clear text so publishers can filter without opening sealed payloads.

use crate::WireError;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Maximum frame size (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum metadata size (64 KiB)
pub const MAX_META_SIZE: usize = 64 * 1024;

/// Maximum topic name length in bytes
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Size of the fixed part after the length prefix: version, kind, flags, topic_len
const FIXED_HEADER_SIZE: usize = 1 + 1 + 1 + 2;

/// Frame kinds exchanged between publishers and subscribers
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Subscriber greeting with requested topics
    Hello = 0x01,
    /// Publisher accepted the subscriber
    Welcome = 0x02,
    /// Published message for one topic
    Data = 0x03,
    /// Connection is being closed or refused
    Bye = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Hello),
            0x02 => Ok(FrameKind::Welcome),
            0x03 => Ok(FrameKind::Data),
            0x04 => Ok(FrameKind::Bye),
            _ => Err(WireError::Kind(value)),
        }
    }
}

bitflags! {
    /// Frame flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// Payload is sealed with the channel cipher
        const SEALED = 1 << 0;
    }
}

/// Complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind
    pub kind: FrameKind,
    /// Frame flags
    pub flags: Flags,
    /// Topic the frame belongs to (empty for control frames)
    pub topic: String,
    /// Metadata as raw CBOR bytes
    pub meta_raw: Bytes,
    /// Payload or ciphertext
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame without metadata
    pub fn new(kind: FrameKind, topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            kind,
            flags: Flags::empty(),
            topic: topic.into(),
            meta_raw: Bytes::new(),
            payload,
        }
    }

    /// Check whether the payload is sealed
    pub fn is_sealed(&self) -> bool {
        self.flags.contains(Flags::SEALED)
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        4 + FIXED_HEADER_SIZE + self.topic.len() + 4 + self.meta_raw.len() + self.payload.len()
    }

    /// Encode frame to a contiguous buffer
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes, WireError> {
        if self.topic.len() > MAX_TOPIC_LEN {
            return Err(WireError::Topic);
        }
        if self.meta_raw.len() > MAX_META_SIZE {
            return Err(WireError::Meta);
        }

        let total_size = self.encoded_size();
        if total_size > max_frame_size {
            return Err(WireError::Size(total_size));
        }

        let mut buf = BytesMut::with_capacity(total_size);

        // Frame length (everything after this u32)
        buf.put_u32((total_size - 4) as u32);
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.topic.len() as u16);
        buf.put_slice(self.topic.as_bytes());
        buf.put_u32(self.meta_raw.len() as u32);
        buf.put_slice(&self.meta_raw);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }
}

/// Frame decoder for parsing incoming frames
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a decoder with a custom frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Decode one frame from a buffer
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        // Need at least 4 bytes for frame length
        if buf.len() < 4 {
            return Ok(None);
        }

        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if frame_len > self.max_frame_size {
            return Err(WireError::Size(frame_len));
        }
        if frame_len < FIXED_HEADER_SIZE + 4 {
            return Err(WireError::Malformed);
        }

        // Check if we have the complete frame
        if buf.len() < 4 + frame_len {
            return Ok(None);
        }

        buf.advance(4);
        let mut frame_buf = buf.split_to(frame_len).freeze();

        let version = frame_buf.get_u8();
        if version != WIRE_VERSION {
            return Err(WireError::Version(version));
        }

        let kind = FrameKind::try_from(frame_buf.get_u8())?;
        let flags = Flags::from_bits(frame_buf.get_u8()).ok_or(WireError::Reserved)?;

        let topic_len = frame_buf.get_u16() as usize;
        if frame_buf.len() < topic_len + 4 {
            return Err(WireError::Malformed);
        }
        let topic_raw = frame_buf.split_to(topic_len);
        let topic = std::str::from_utf8(&topic_raw)
            .map_err(|_| WireError::Topic)?
            .to_string();

        let meta_len = frame_buf.get_u32() as usize;
        if meta_len > MAX_META_SIZE || frame_buf.len() < meta_len {
            return Err(WireError::Meta);
        }
        let meta_raw = frame_buf.split_to(meta_len);

        // Remaining bytes are payload
        Ok(Some(Frame {
            kind,
            flags,
            topic,
            meta_raw,
            payload: frame_buf,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
