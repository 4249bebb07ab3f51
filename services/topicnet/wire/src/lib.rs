//! Wire protocol framing, metadata encoding and channel sealing for topicnet.
//!
//! This crate provides the low-level protocol spoken between a publisher and
//! its subscribers: length-prefixed frames tagged with a topic name, CBOR
//! metadata for the handshake, and the x25519 + ChaCha20-Poly1305 cipher used
//! by secured sessions.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 frame_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | u8 version           | WIRE_VERSION               |
//! | u8 kind              | HELLO/WELCOME/DATA/BYE     |
//! | u8 flags             | SEALED                     |
//! +----------------------+----------------------------+
//! | u16 topic_len        | topic name (UTF-8)         |
//! +----------------------+----------------------------+
//! | u32 meta_len         | canonical CBOR map length  |
//! +----------------------+----------------------------+
//! | meta_bytes           | metadata (CBOR)            |
//! +----------------------+----------------------------+
//! | payload              | plain or sealed bytes      |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod crypto;
pub mod error;
pub mod frame;

// Re-export main types
pub use codec::{
    get_meta_bytes, get_meta_str, get_meta_str_list, get_meta_u32, parse_meta, CodecError,
    FrameBuilder, MetaBuilder,
};
pub use crypto::{public_from_secret, shared_key, ChannelCipher, CryptoError, Role, KEY_LEN};
pub use error::WireError;
pub use frame::{
    Flags, Frame, FrameDecoder, FrameKind, DEFAULT_MAX_FRAME_SIZE, MAX_META_SIZE, MAX_TOPIC_LEN,
    WIRE_VERSION,
};
