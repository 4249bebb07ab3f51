//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Invalid CBOR metadata
    #[error("cbor meta invalid")]
    Meta,

    /// Topic name is not valid UTF-8 or too long
    #[error("invalid topic name")]
    Topic,

    /// Unknown frame kind
    #[error("unknown kind {0}")]
    Kind(u8),

    /// Reserved flag bits set
    #[error("reserved bits nonzero")]
    Reserved,

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
